//! Peer protocol commands
//!
//! Every request starts with a 4-byte ASCII token. The set of tokens is
//! closed; anything else maps to [`Command::Unknown`].

use std::fmt;
use tracing::trace;

/// Length of a command token
pub const TOKEN_LEN: usize = 4;

/// Prefix that marks a connection as speaking the peer protocol
pub const PROTOCOL_MARKER: [u8; TOKEN_LEN] = *b"P2PM";

/// A decoded command token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// The classification marker, accepted as a silent no-op
    Marker,
    /// `NAME <id>\n`
    Name,
    /// `LIST`
    List,
    /// `SEND <dest-id> <message>\n`
    Send,
    /// Any token not listed above
    Unknown([u8; TOKEN_LEN]),
}

impl Command {
    /// Decode a raw token
    pub fn from_token(token: [u8; TOKEN_LEN]) -> Self {
        let command = match &token {
            b"NAME" => Command::Name,
            b"LIST" => Command::List,
            b"SEND" => Command::Send,
            t if *t == PROTOCOL_MARKER => Command::Marker,
            _ => Command::Unknown(token),
        };
        trace!("Decoded token {:?} as {}", String::from_utf8_lossy(&token), command);
        command
    }

    /// Raw token for this command
    pub fn token(&self) -> [u8; TOKEN_LEN] {
        match self {
            Command::Marker => PROTOCOL_MARKER,
            Command::Name => *b"NAME",
            Command::List => *b"LIST",
            Command::Send => *b"SEND",
            Command::Unknown(token) => *token,
        }
    }
}

impl From<[u8; TOKEN_LEN]> for Command {
    fn from(token: [u8; TOKEN_LEN]) -> Self {
        Command::from_token(token)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unknown(token) => write!(f, "UNKNOWN({})", String::from_utf8_lossy(token).trim_end_matches(['\r', '\n', '\0'])),
            known => f.write_str(&String::from_utf8_lossy(&known.token())),
        }
    }
}

/// Check whether a connection prefix is the peer protocol marker
pub fn is_protocol_marker(prefix: &[u8]) -> bool {
    prefix == PROTOCOL_MARKER
}
