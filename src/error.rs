//! Error types for the relay
//!
//! This module defines the error type shared by the registry, the peer
//! sessions, the listener and the HTTP fallback.

use std::fmt;

/// Error type for relay operations
#[derive(Debug, Clone)]
pub enum RelayError {
    /// Peer protocol framing errors
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Errors tied to a single peer connection
    PeerError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// Socket level errors (bind, accept, read, write)
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// HTTP fallback errors
    HttpError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// The requested identifier is held by another peer
    NameTaken {
        id: String,
    },
}

impl RelayError {
    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        RelayError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new PeerError with peer address
    pub fn peer_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        RelayError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    /// Create a new PeerError with peer and source
    pub fn peer_error_full(message: impl Into<String>, peer: impl Into<String>, source: impl Into<String>) -> Self {
        RelayError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new NetworkError
    pub fn network_error(message: impl Into<String>) -> Self {
        RelayError::NetworkError {
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        RelayError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new HttpError
    pub fn http_error(message: impl Into<String>) -> Self {
        RelayError::HttpError {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a new HttpError with path and source
    pub fn http_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        RelayError::HttpError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        RelayError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new NameTaken error
    pub fn name_taken(id: impl Into<String>) -> Self {
        RelayError::NameTaken { id: id.into() }
    }

    /// Check whether this error is an identity conflict
    pub fn is_name_taken(&self) -> bool {
        matches!(self, RelayError::NameTaken { .. })
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::ProtocolError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            RelayError::PeerError { message, peer, source } => {
                match (peer, source) {
                    (Some(p), Some(s)) => write!(f, "Peer error: {} (peer: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Peer error: {} (peer: {})", message, p),
                    (None, Some(s)) => write!(f, "Peer error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Peer error: {}", message),
                }
            }
            RelayError::NetworkError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Network error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Network error: {}", message),
                }
            }
            RelayError::HttpError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "HTTP error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "HTTP error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "HTTP error: {} (source: {})", message, s),
                    (None, None) => write!(f, "HTTP error: {}", message),
                }
            }
            RelayError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            RelayError::NameTaken { id } => write!(f, "Name already in use: {}", id),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::NetworkError {
            message: err.to_string(),
            address: None,
            source: Some(err.kind().to_string()),
        }
    }
}
