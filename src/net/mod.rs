//! Network layer
//!
//! - `peekable`: stream wrapper for non-destructive prefix inspection
//! - `sniffer`: peer protocol vs HTTP classification
//! - `http`: fallback handler for non-peer connections
//! - `listener`: the accept loop

pub mod http;
pub mod listener;
pub mod peekable;
pub mod sniffer;

pub use http::{FallbackHandler, StaticFiles};
pub use listener::{Listener, ListenerEvent, ListenerOptions};
pub use peekable::PeekableStream;
pub use sniffer::{classify, sniff, Classification};
