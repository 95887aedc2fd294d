//! Connection acceptor
//!
//! Accepts TCP connections, reports lifecycle events to an observer channel
//! and hands every connection to its own task for classification and
//! dispatch.

use crate::error::RelayError;
use crate::net::sniffer::{sniff, Classification};
use crate::net::{FallbackHandler, PeekableStream};
use crate::peer::{PeerAddr, PeerRegistry, Session, SessionConfig};
use anyhow::Result;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// First pause after a failed `accept`
const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(10);

/// Longest pause between failed `accept` calls
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Something that happened in the accept loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// The accept loop is running on this address
    Listening(SocketAddr),
    /// A connection was accepted
    Connected(SocketAddr),
    /// `accept` failed; the loop keeps going
    AcceptError(String),
    /// The accept loop has exited
    Stopped,
}

impl fmt::Display for ListenerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerEvent::Listening(addr) => write!(f, "listening on {}", addr),
            ListenerEvent::Connected(addr) => write!(f, "new connection: {}", addr),
            ListenerEvent::AcceptError(cause) => write!(f, "conn Accept error: {}", cause),
            ListenerEvent::Stopped => write!(f, "done"),
        }
    }
}

/// Per-connection settings handed to every spawned task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOptions {
    /// How long a new connection may take to send its first 4 bytes
    pub sniff_timeout: Duration,
    pub session: SessionConfig,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            sniff_timeout: Duration::from_secs(10),
            session: SessionConfig::default(),
        }
    }
}

/// The relay's single TCP listener
pub struct Listener {
    listener: TcpListener,
    registry: Arc<PeerRegistry>,
    fallback: Arc<dyn FallbackHandler>,
    events: mpsc::UnboundedSender<ListenerEvent>,
    options: ListenerOptions,
}

impl Listener {
    /// Bind the listening socket
    ///
    /// This is the only failure that is fatal to the process.
    pub async fn bind<A: ToSocketAddrs + fmt::Display>(
        addr: A,
        registry: Arc<PeerRegistry>,
        fallback: Arc<dyn FallbackHandler>,
        events: mpsc::UnboundedSender<ListenerEvent>,
        options: ListenerOptions,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            error!("ListenTCP {}: {}", addr, e);
            RelayError::network_error_full("Failed to bind listener", addr.to_string(), e.to_string())
        })?;

        info!("Start listen {}", listener.local_addr()?);
        Ok(Self {
            listener,
            registry,
            fallback,
            events,
            options,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires or its sender is dropped
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = self.listener.local_addr() {
            self.emit(ListenerEvent::Listening(addr));
        }

        let mut failures = 0u32;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        failures = 0;
                        self.emit(ListenerEvent::Connected(addr));
                        let registry = self.registry.clone();
                        let fallback = self.fallback.clone();
                        let options = self.options;
                        tokio::spawn(async move {
                            handle_connection(stream, addr, registry, fallback, options).await;
                        });
                    }
                    Err(e) => {
                        // Errors like EMFILE persist until some connection
                        // closes; pause before the next attempt.
                        let pause = accept_backoff(failures);
                        failures = failures.saturating_add(1);
                        warn!("Accept failed: {}, retrying in {:?}", e, pause);
                        self.emit(ListenerEvent::AcceptError(e.to_string()));
                        tokio::time::sleep(pause).await;
                    }
                },
            }
        }

        self.emit(ListenerEvent::Stopped);
    }

    fn emit(&self, event: ListenerEvent) {
        if self.events.send(event).is_err() {
            debug!("Listener event dropped, no observer");
        }
    }
}

/// Pause before the next `accept` after `failures` consecutive errors
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_START
        .saturating_mul(1u32 << failures.min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

/// Classify one connection and run the matching handler to completion
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    fallback: Arc<dyn FallbackHandler>,
    options: ListenerOptions,
) {
    let mut stream = PeekableStream::new(stream);
    let classification = match sniff(&mut stream, options.sniff_timeout).await {
        Ok(classification) => classification,
        Err(e) => {
            debug!("Read peek ERROR from {}: {}", addr, e);
            return;
        }
    };

    match classification {
        Classification::Peer => {
            info!("Peer protocol connection from {}", addr);
            let (reader, writer) = tokio::io::split(stream);
            let session = Session::new(PeerAddr::from(addr), reader, writer, registry, options.session);
            if let Err(e) = session.run().await {
                debug!("Peer session {} ended with error: {}", addr, e);
            }
        }
        Classification::Other => {
            debug!("Handing {} to the HTTP fallback ({} bytes buffered)", addr, stream.peeked().len());
            if let Err(e) = fallback.handle(stream, addr).await {
                warn!("HTTP fallback for {} failed: {}", addr, e);
            }
        }
    }
}
