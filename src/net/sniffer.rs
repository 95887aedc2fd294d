//! Protocol detection
//!
//! Decides from the first bytes of a connection whether it speaks the peer
//! protocol or should be handed to the HTTP fallback.

use crate::error::RelayError;
use crate::net::PeekableStream;
use crate::protocol::{is_protocol_marker, TOKEN_LEN};
use anyhow::Result;
use tokio::io::AsyncRead;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

/// What a connection turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Starts with the peer protocol marker
    Peer,
    /// Anything else, assumed to be HTTP
    Other,
}

/// Classify a connection prefix
pub fn classify(prefix: &[u8]) -> Classification {
    if is_protocol_marker(prefix) {
        Classification::Peer
    } else {
        Classification::Other
    }
}

/// Peek the classification prefix and classify the connection
///
/// Fails if the prefix does not arrive within `limit` or the peer hangs up
/// first. The peeked bytes stay in `stream` either way.
pub async fn sniff<S: AsyncRead + Unpin>(stream: &mut PeekableStream<S>, limit: Duration) -> Result<Classification> {
    trace!("Start read peek");
    let prefix = timeout(limit, stream.peek_exact(TOKEN_LEN))
        .await
        .map_err(|_| RelayError::network_error("Timed out waiting for protocol prefix"))?
        .map_err(|e| RelayError::protocol_error_with_source("Failed to read protocol prefix", e.to_string()))?;

    let classification = classify(prefix);
    debug!("Stop read peek: {:?} -> {:?}", String::from_utf8_lossy(prefix), classification);
    Ok(classification)
}
