//! Peer management module
//!
//! Handles the peer registry, per-connection sessions and the outgoing
//! write path.

pub mod connection;
pub mod registry;
pub mod session;
pub mod state;

// Re-export main types
pub use connection::{Outgoing, PeerHandle, PeerWriter};
pub use registry::PeerRegistry;
pub use session::{Session, SessionConfig};
pub use state::{Peer, PeerAddr, PeerId, SessionState};
