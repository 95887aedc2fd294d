//! Peer state module
//!
//! Defines peer identity types and the per-session protocol state.

use crate::peer::PeerHandle;
use std::fmt;
use std::net::SocketAddr;

/// Remote endpoint of one connection, e.g. `127.0.0.1:50312`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr(String);

impl PeerAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for PeerAddr {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name a peer chose for itself with `NAME`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = std::str::Utf8Error;

    /// Names are compared byte for byte, so invalid UTF-8 is rejected rather
    /// than replaced.
    fn try_from(id: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(id).map(Self::from)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered chat participant
///
/// Cloning a `Peer` is cheap: the handle only wraps the sending side of the
/// peer's outgoing queue.
#[derive(Debug, Clone)]
pub struct Peer {
    pub addr: PeerAddr,
    pub id: PeerId,
    pub handle: PeerHandle,
}

impl Peer {
    /// Create a new peer
    pub fn new(addr: PeerAddr, id: PeerId, handle: PeerHandle) -> Self {
        Self { addr, id, handle }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \t {}", self.addr, self.id)
    }
}

/// Protocol state of one peer session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no successful `NAME` yet
    Unnamed,
    /// Registered under the given identifier
    Named(PeerId),
    /// Terminal
    Closed,
}

impl SessionState {
    /// Check if the session has completed `NAME`
    pub fn is_named(&self) -> bool {
        matches!(self, SessionState::Named(_))
    }

    /// Identifier the session is registered under, if any
    pub fn id(&self) -> Option<&PeerId> {
        match self {
            SessionState::Named(id) => Some(id),
            _ => None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Unnamed
    }
}
