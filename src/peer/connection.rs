//! Peer connection module
//!
//! The write side of a peer connection. A session owns the socket's write
//! half through a [`PeerWriter`]; everybody else (the session itself for its
//! replies, other sessions for forwarded messages) goes through a cloneable
//! [`PeerHandle`] that enqueues frames for that writer. One writer per socket
//! means concurrent senders can never interleave bytes inside a line.

use crate::error::RelayError;
use crate::peer::PeerAddr;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace, warn};

/// Outcome of a single frame write, reported back to whoever queued it
type WriteAck = oneshot::Sender<Result<(), RelayError>>;

/// A frame waiting in a peer's outgoing queue
#[derive(Debug)]
pub struct Outgoing {
    frame: Bytes,
    ack: Option<WriteAck>,
}

/// Cloneable sending side of a peer's outgoing queue
#[derive(Debug, Clone)]
pub struct PeerHandle {
    addr: PeerAddr,
    tx: mpsc::Sender<Outgoing>,
}

impl PeerHandle {
    /// Create a handle and the receiving end its writer will drain
    pub fn channel(addr: PeerAddr, capacity: usize) -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { addr, tx }, rx)
    }

    /// Queue a frame without waiting for it to reach the socket
    pub async fn send(&self, frame: Bytes) -> Result<(), RelayError> {
        trace!("Queueing {} bytes for {}", frame.len(), self.addr);
        self.tx
            .send(Outgoing { frame, ack: None })
            .await
            .map_err(|_| RelayError::peer_error_with_peer("Connection closed", self.addr.to_string()))
    }

    /// Queue a frame and wait until the writer reports the write outcome
    pub async fn deliver(&self, frame: Bytes, limit: Duration) -> Result<(), RelayError> {
        match timeout(limit, self.enqueue_and_wait(frame)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Delivery to {} timed out after {:?}", self.addr, limit);
                Err(RelayError::peer_error_with_peer("Delivery timed out", self.addr.to_string()))
            }
        }
    }

    async fn enqueue_and_wait(&self, frame: Bytes) -> Result<(), RelayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Outgoing { frame, ack: Some(ack_tx) })
            .await
            .map_err(|_| RelayError::peer_error_with_peer("Connection closed", self.addr.to_string()))?;

        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Err(RelayError::peer_error_with_peer(
                "Connection closed before write completed",
                self.addr.to_string(),
            )),
        }
    }
}

/// Drains a peer's outgoing queue onto the socket's write half
pub struct PeerWriter<W> {
    addr: PeerAddr,
    writer: W,
    rx: mpsc::Receiver<Outgoing>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> PeerWriter<W> {
    pub fn new(addr: PeerAddr, writer: W, rx: mpsc::Receiver<Outgoing>) -> Self {
        Self { addr, writer, rx }
    }

    /// Run the writer on its own task
    pub fn spawn(self) -> JoinHandle<Result<(), RelayError>> {
        tokio::spawn(self.run())
    }

    /// Write queued frames until every handle is dropped or a write fails
    pub async fn run(mut self) -> Result<(), RelayError> {
        while let Some(outgoing) = self.rx.recv().await {
            let result = write_frame(&mut self.writer, &outgoing.frame)
                .await
                .map_err(|e| RelayError::peer_error_full("Failed to write to peer", self.addr.to_string(), e.to_string()));

            if let Some(ack) = outgoing.ack {
                let _ = ack.send(result.clone());
            }

            if let Err(e) = result {
                warn!("Writer for {} stopping: {}", self.addr, e);
                self.rx.close();
                return Err(e);
            }
        }

        debug!("Outgoing queue for {} drained, closing write half", self.addr);
        let _ = self.writer.shutdown().await;
        Ok(())
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_frames_written_in_queue_order() {
        let (client, server) = tokio::io::duplex(1024);
        let addr = PeerAddr::from("127.0.0.1:1");
        let (handle, rx) = PeerHandle::channel(addr.clone(), 8);
        let writer = PeerWriter::new(addr, server, rx).spawn();

        handle.send(Bytes::from_static(b"one\n")).await.unwrap();
        handle.deliver(Bytes::from_static(b"two\n"), Duration::from_secs(1)).await.unwrap();
        drop(handle);

        writer.await.unwrap().unwrap();

        let mut received = String::new();
        let mut client = client;
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_deliver_to_closed_writer_fails() {
        let (handle, rx) = PeerHandle::channel(PeerAddr::from("127.0.0.1:2"), 8);
        drop(rx);

        let err = handle.deliver(Bytes::from_static(b"hi\n"), Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("Connection closed"));
    }

    #[tokio::test]
    async fn test_deliver_times_out_when_nobody_drains() {
        let (handle, _rx) = PeerHandle::channel(PeerAddr::from("127.0.0.1:3"), 1);

        let err = handle.deliver(Bytes::from_static(b"hi\n"), Duration::from_millis(50)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_to_sender() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let addr = PeerAddr::from("127.0.0.1:4");
        let (handle, rx) = PeerHandle::channel(addr.clone(), 8);
        let writer = PeerWriter::new(addr, server, rx).spawn();

        let err = handle.deliver(Bytes::from_static(b"MESS a: b\n"), Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("Failed to write to peer"));
        assert!(writer.await.unwrap().is_err());
    }
}
