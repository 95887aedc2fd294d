//! Peer protocol replies
//!
//! Everything the relay writes to a peer connection is one of these lines.

use bytes::{BufMut, Bytes, BytesMut};

/// One newline-terminated line sent to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK`
    Ok,
    /// `ERR Name already in use`
    NameInUse,
    /// `ERR Empty name`
    EmptyName,
    /// `ERR Name must be valid UTF-8`
    InvalidName,
    /// `PEER\t<addr>\t<id>`
    Peer { addr: String, id: String },
    /// `ERR not found <dest>`
    NotFound { dest: String },
    /// `ERR malformed SEND target`
    MalformedTarget,
    /// `ERR <cause>`
    Error { cause: String },
    /// `MESS <from>: <body>`
    Message { from: String, body: String },
    /// `UNKNOWN_CMD`
    UnknownCommand,
}

impl Reply {
    /// Serialize the reply, including the trailing newline
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the serialized reply to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Reply::Ok => buf.put_slice(b"OK"),
            Reply::NameInUse => buf.put_slice(b"ERR Name already in use"),
            Reply::EmptyName => buf.put_slice(b"ERR Empty name"),
            Reply::InvalidName => buf.put_slice(b"ERR Name must be valid UTF-8"),
            Reply::Peer { addr, id } => {
                buf.put_slice(b"PEER\t");
                buf.put_slice(addr.as_bytes());
                buf.put_u8(b'\t');
                buf.put_slice(id.as_bytes());
            }
            Reply::NotFound { dest } => {
                buf.put_slice(b"ERR not found ");
                buf.put_slice(dest.as_bytes());
            }
            Reply::MalformedTarget => buf.put_slice(b"ERR malformed SEND target"),
            Reply::Error { cause } => {
                buf.put_slice(b"ERR ");
                buf.put_slice(cause.as_bytes());
            }
            Reply::Message { from, body } => {
                buf.put_slice(b"MESS ");
                buf.put_slice(from.as_bytes());
                buf.put_slice(b": ");
                buf.put_slice(body.as_bytes());
            }
            Reply::UnknownCommand => buf.put_slice(b"UNKNOWN_CMD"),
        }
        buf.put_u8(b'\n');
    }
}
