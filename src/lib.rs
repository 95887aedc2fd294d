//! p2p-relay
//!
//! A minimal peer-to-peer chat relay. One TCP listener accepts every
//! connection, sniffs its first four bytes and either runs the line-based
//! peer protocol on it or hands it to the HTTP fallback.

pub mod cli;
pub mod error;
pub mod net;
pub mod peer;
pub mod protocol;

pub use error::RelayError;

pub use cli::{CliArgs, Config};
pub use net::{
    classify, sniff, Classification, FallbackHandler, Listener, ListenerEvent, ListenerOptions,
    PeekableStream, StaticFiles,
};
pub use peer::{Peer, PeerAddr, PeerHandle, PeerId, PeerRegistry, Session, SessionConfig, SessionState};
pub use protocol::{Command, Reply, PROTOCOL_MARKER};
