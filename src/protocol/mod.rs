//! Peer protocol module
//!
//! Implements the line-oriented relay protocol spoken after the
//! classification marker.

pub mod command;
pub mod reply;
pub mod wire;

// Re-export main types
pub use command::{is_protocol_marker, Command, PROTOCOL_MARKER, TOKEN_LEN};
pub use reply::Reply;
pub use wire::{discard_buffered_line, read_line, read_token, split_send_body, trim_line};
