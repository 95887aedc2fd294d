//! Peer session module
//!
//! Runs the protocol state machine for one peer connection: reads command
//! tokens, drives the registry and forwards messages to other peers.

use crate::error::RelayError;
use crate::peer::{PeerAddr, PeerHandle, PeerId, PeerRegistry, PeerWriter, SessionState};
use crate::protocol::{self, Command, Reply};
use anyhow::Result;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace, warn};

/// Tunables for peer sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a `SEND` waits for the destination's writer
    pub forward_timeout: Duration,
    /// Frames a peer's outgoing queue holds before senders wait
    pub outbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            forward_timeout: Duration::from_secs(10),
            outbox_capacity: 64,
        }
    }
}

/// One peer connection's protocol state machine
pub struct Session<R> {
    addr: PeerAddr,
    reader: BufReader<R>,
    handle: PeerHandle,
    writer: JoinHandle<Result<(), RelayError>>,
    registry: Arc<PeerRegistry>,
    state: SessionState,
    config: SessionConfig,
}

impl<R: AsyncRead + Unpin> Session<R> {
    /// Create a session over a split connection and start its writer task
    pub fn new<W>(addr: PeerAddr, reader: R, writer: W, registry: Arc<PeerRegistry>, config: SessionConfig) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (handle, rx) = PeerHandle::channel(addr.clone(), config.outbox_capacity);
        let writer = PeerWriter::new(addr.clone(), writer, rx).spawn();

        Self {
            addr,
            reader: BufReader::new(reader),
            handle,
            writer,
            registry,
            state: SessionState::default(),
            config,
        }
    }

    /// Current protocol state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Serve commands until the connection ends, then clean up
    ///
    /// The peer is unregistered and the connection closed whether or not it
    /// ever completed `NAME`.
    pub async fn run(mut self) -> Result<()> {
        info!("Peer session started: {}", self.addr);
        let result = self.command_loop().await;
        if !self.state.is_named() {
            debug!("{} disconnected before completing NAME", self.addr);
        }
        self.state = SessionState::Closed;
        self.close().await;
        result
    }

    async fn command_loop(&mut self) -> Result<()> {
        loop {
            let token = match protocol::read_token(&mut self.reader).await {
                Ok(token) => token,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("Disconnected by EOF: {}", self.addr);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to read command from {}: {}", self.addr, e);
                    return Err(self.read_error("Failed to read command", e).into());
                }
            };

            let command = Command::from(token);
            debug!("Received {} from {}", command, self.addr);

            match command {
                Command::Marker => trace!("Protocol marker from {}", self.addr),
                Command::Name => self.handle_name().await?,
                Command::List => self.handle_list().await?,
                Command::Send => self.handle_send().await?,
                Command::Unknown(_) => self.reply(Reply::UnknownCommand).await?,
            }
        }
    }

    async fn handle_name(&mut self) -> Result<()> {
        let line = self.read_body().await?;
        let id = match PeerId::try_from(protocol::trim_line(&line)) {
            Ok(id) => id,
            Err(e) => {
                debug!("{} sent a name that is not UTF-8: {}", self.addr, e);
                return self.reply(Reply::InvalidName).await;
            }
        };
        if id.is_empty() {
            return self.reply(Reply::EmptyName).await;
        }

        match self.registry.try_register(self.handle.clone(), self.addr.clone(), id.clone()).await {
            Ok(peer) => {
                if let Some(old) = self.state.id() {
                    debug!("{} renamed from {} to {}", self.addr, old, id);
                }
                info!("new peer: {}", peer);
                self.state = SessionState::Named(id);
                self.reply(Reply::Ok).await
            }
            Err(e) if e.is_name_taken() => {
                debug!("{} asked for {} which is already in use", self.addr, id);
                self.reply(Reply::NameInUse).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_list(&mut self) -> Result<()> {
        let discarded = protocol::discard_buffered_line(&mut self.reader);
        trace!("LIST from {} discarded {} bytes", self.addr, discarded);

        let peers = self.registry.list_all().await;
        debug!("Listing {} peers to {}", peers.len(), self.addr);
        if peers.is_empty() {
            return Ok(());
        }

        let mut buf = BytesMut::new();
        for peer in peers {
            Reply::Peer {
                addr: peer.addr.to_string(),
                id: peer.id.to_string(),
            }
            .encode_into(&mut buf);
        }
        self.handle.send(buf.freeze()).await?;
        Ok(())
    }

    async fn handle_send(&mut self) -> Result<()> {
        // The body is consumed even when it is going to be ignored so the
        // next token read starts on a command boundary.
        let line = self.read_body().await?;

        let sender = match self.state.id() {
            Some(id) => id.clone(),
            None => {
                debug!("Ignoring SEND from unnamed peer {}", self.addr);
                return Ok(());
            }
        };

        let (dest, message) = protocol::split_send_body(&line);
        if dest.is_empty() {
            return self.reply(Reply::MalformedTarget).await;
        }

        let target = match self.registry.lookup_by_id(&PeerId::new(dest.as_str())).await {
            Some(target) => target,
            None => {
                debug!("SEND from {} to unknown peer {}", sender, dest);
                return self.reply(Reply::NotFound { dest }).await;
            }
        };

        let frame = Reply::Message {
            from: sender.to_string(),
            body: message,
        }
        .encode();

        match target.handle.deliver(frame, self.config.forward_timeout).await {
            Ok(()) => {
                debug!("Forwarded message {} -> {}", sender, target.id);
                self.reply(Reply::Ok).await
            }
            Err(e) => {
                warn!("WriteMessageError {} -> {}: {}", sender, target.id, e);
                self.reply(Reply::Error { cause: e.to_string() }).await
            }
        }
    }

    async fn read_body(&mut self) -> Result<Vec<u8>, RelayError> {
        protocol::read_line(&mut self.reader)
            .await
            .map_err(|e| self.read_error("Failed to read command body", e))
    }

    async fn reply(&self, reply: Reply) -> Result<()> {
        trace!("Replying to {}: {:?}", self.addr, reply);
        self.handle.send(reply.encode()).await?;
        Ok(())
    }

    fn read_error(&self, message: &str, err: io::Error) -> RelayError {
        RelayError::peer_error_full(message, self.addr.to_string(), err.to_string())
    }

    async fn close(self) {
        let Session {
            addr,
            handle,
            mut writer,
            registry,
            config,
            ..
        } = self;

        if registry.unregister(&addr).await.is_none() {
            debug!("Session {} closed without registering", addr);
        }

        // The writer exits once every handle is gone; other sessions may
        // still hold a clone for an in-flight forward.
        drop(handle);
        match timeout(config.forward_timeout, &mut writer).await {
            Ok(Ok(Ok(()))) => debug!("Writer for {} finished", addr),
            Ok(Ok(Err(e))) => debug!("Writer for {} finished with error: {}", addr, e),
            Ok(Err(e)) => warn!("Writer task for {} failed: {}", addr, e),
            Err(_) => {
                warn!("Writer for {} did not drain in time, aborting", addr);
                writer.abort();
            }
        }
        info!("Peer session closed: {}", addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
        task: JoinHandle<Result<()>>,
    }

    impl Client {
        fn connect(registry: &Arc<PeerRegistry>, addr: &str) -> Self {
            let (client, server) = tokio::io::duplex(4096);
            let (server_read, server_write) = tokio::io::split(server);
            let session = Session::new(
                PeerAddr::from(addr),
                server_read,
                server_write,
                registry.clone(),
                SessionConfig::default(),
            );
            let task = tokio::spawn(session.run());
            let (reader, writer) = tokio::io::split(client);
            Self {
                reader: BufReader::new(reader),
                writer,
                task,
            }
        }

        async fn send(&mut self, data: &str) {
            self.writer.write_all(data.as_bytes()).await.unwrap();
        }

        async fn line(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            line
        }

        async fn disconnect(mut self) {
            self.writer.shutdown().await.unwrap();
            self.task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_name_registers_peer() {
        let registry = Arc::new(PeerRegistry::new());
        let mut alice = Client::connect(&registry, "127.0.0.1:1001");

        alice.send("NAME alice\n").await;
        assert_eq!(alice.line().await, "OK\n");

        let peer = registry.lookup_by_id(&PeerId::from("alice")).await.unwrap();
        assert_eq!(peer.addr, PeerAddr::from("127.0.0.1:1001"));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = Arc::new(PeerRegistry::new());
        let mut first = Client::connect(&registry, "127.0.0.1:1002");
        let mut second = Client::connect(&registry, "127.0.0.1:1003");

        first.send("NAME alice\n").await;
        assert_eq!(first.line().await, "OK\n");

        second.send("NAME alice\n").await;
        assert_eq!(second.line().await, "ERR Name already in use\n");
        assert!(registry.lookup_by_address(&PeerAddr::from("127.0.0.1:1003")).await.is_none());

        // Still unnamed, so a different name works.
        second.send("NAME bob\n").await;
        assert_eq!(second.line().await, "OK\n");
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let registry = Arc::new(PeerRegistry::new());
        let mut client = Client::connect(&registry, "127.0.0.1:1004");

        client.send("NAME   \n").await;
        assert_eq!(client.line().await, "ERR Empty name\n");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_empty_registry() {
        let registry = Arc::new(PeerRegistry::new());
        let mut client = Client::connect(&registry, "127.0.0.1:1005");

        client.send("LIST\n").await;
        client.send("ABCD").await;
        assert_eq!(client.line().await, "UNKNOWN_CMD\n");
    }

    #[tokio::test]
    async fn test_list_registered_peers() {
        let registry = Arc::new(PeerRegistry::new());
        let mut alice = Client::connect(&registry, "127.0.0.1:1006");
        let mut bob = Client::connect(&registry, "127.0.0.1:1007");

        alice.send("NAME alice\n").await;
        assert_eq!(alice.line().await, "OK\n");
        bob.send("NAME bob\n").await;
        assert_eq!(bob.line().await, "OK\n");

        alice.send("LIST\n").await;
        let mut lines = vec![alice.line().await, alice.line().await];
        lines.sort();
        assert_eq!(lines, vec!["PEER\t127.0.0.1:1006\talice\n", "PEER\t127.0.0.1:1007\tbob\n"]);
    }

    #[tokio::test]
    async fn test_send_forwards_message() {
        let registry = Arc::new(PeerRegistry::new());
        let mut alice = Client::connect(&registry, "127.0.0.1:1008");
        let mut bob = Client::connect(&registry, "127.0.0.1:1009");

        alice.send("NAME alice\n").await;
        assert_eq!(alice.line().await, "OK\n");
        bob.send("NAME bob\n").await;
        assert_eq!(bob.line().await, "OK\n");

        alice.send("SEND bob hello\n").await;
        assert_eq!(bob.line().await, "MESS alice: hello\n");
        assert_eq!(alice.line().await, "OK\n");
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let registry = Arc::new(PeerRegistry::new());
        let mut alice = Client::connect(&registry, "127.0.0.1:1010");

        alice.send("NAME alice\n").await;
        assert_eq!(alice.line().await, "OK\n");

        alice.send("SEND carol hi\n").await;
        assert_eq!(alice.line().await, "ERR not found carol\n");
    }

    #[tokio::test]
    async fn test_send_malformed_target() {
        let registry = Arc::new(PeerRegistry::new());
        let mut alice = Client::connect(&registry, "127.0.0.1:1011");

        alice.send("NAME alice\n").await;
        assert_eq!(alice.line().await, "OK\n");

        alice.send("SEND\n").await;
        assert_eq!(alice.line().await, "ERR malformed SEND target\n");
    }

    #[tokio::test]
    async fn test_unnamed_send_is_drained() {
        let registry = Arc::new(PeerRegistry::new());
        let mut client = Client::connect(&registry, "127.0.0.1:1012");

        client.send("SEND bob hi there\nNAME carl\n").await;
        assert_eq!(client.line().await, "OK\n");
        assert_eq!(registry.lookup_by_id(&PeerId::from("carl")).await.unwrap().addr, PeerAddr::from("127.0.0.1:1012"));
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_session() {
        let registry = Arc::new(PeerRegistry::new());
        let mut client = Client::connect(&registry, "127.0.0.1:1013");

        client.send("PING").await;
        assert_eq!(client.line().await, "UNKNOWN_CMD\n");
        client.send("NAME dora\n").await;
        assert_eq!(client.line().await, "OK\n");
    }

    #[tokio::test]
    async fn test_marker_is_silent() {
        let registry = Arc::new(PeerRegistry::new());
        let mut client = Client::connect(&registry, "127.0.0.1:1014");

        client.send("P2PMNAME eve\n").await;
        assert_eq!(client.line().await, "OK\n");
    }

    #[tokio::test]
    async fn test_rename_drops_old_identifier() {
        let registry = Arc::new(PeerRegistry::new());
        let mut client = Client::connect(&registry, "127.0.0.1:1015");

        client.send("NAME first\n").await;
        assert_eq!(client.line().await, "OK\n");
        client.send("NAME second\n").await;
        assert_eq!(client.line().await, "OK\n");

        assert!(registry.lookup_by_id(&PeerId::from("first")).await.is_none());
        assert!(registry.lookup_by_id(&PeerId::from("second")).await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let registry = Arc::new(PeerRegistry::new());
        let mut client = Client::connect(&registry, "127.0.0.1:1016");

        client.send("NAME frank\n").await;
        assert_eq!(client.line().await, "OK\n");
        client.disconnect().await;

        assert!(registry.lookup_by_id(&PeerId::from("frank")).await.is_none());
        assert!(registry.lookup_by_address(&PeerAddr::from("127.0.0.1:1016")).await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_name() {
        let registry = Arc::new(PeerRegistry::new());
        let client = Client::connect(&registry, "127.0.0.1:1017");
        client.disconnect().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_send_to_departed_peer_reports_error() {
        let registry = Arc::new(PeerRegistry::new());
        let mut alice = Client::connect(&registry, "127.0.0.1:1018");

        alice.send("NAME alice\n").await;
        assert_eq!(alice.line().await, "OK\n");

        // A registered peer whose writer is already gone.
        let (handle, rx) = PeerHandle::channel(PeerAddr::from("127.0.0.1:1019"), 1);
        drop(rx);
        registry.register(handle, PeerAddr::from("127.0.0.1:1019"), PeerId::from("ghost")).await;

        alice.send("SEND ghost boo\n").await;
        let line = alice.line().await;
        assert!(line.starts_with("ERR "), "unexpected reply: {:?}", line);
        assert!(line.contains("Connection closed"));

        // The sender's session survives the failed forward.
        alice.send("LIST\n").await;
        assert!(alice.line().await.starts_with("PEER\t"));
    }

    #[tokio::test]
    async fn test_rejected_name_leaves_session_unnamed() {
        let registry = Arc::new(PeerRegistry::new());
        let (holder, _holder_rx) = PeerHandle::channel(PeerAddr::from("127.0.0.1:1020"), 1);
        registry.register(holder, PeerAddr::from("127.0.0.1:1020"), PeerId::from("alice")).await;

        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let mut session = Session::new(
            PeerAddr::from("127.0.0.1:1021"),
            server_read,
            server_write,
            registry.clone(),
            SessionConfig::default(),
        );
        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = BufReader::new(client_read);
        let mut line = String::new();

        client_write.write_all(b" alice\n").await.unwrap();
        session.handle_name().await.unwrap();
        client_read.read_line(&mut line).await.unwrap();
        assert_eq!(line, "ERR Name already in use\n");
        assert_eq!(session.state(), &SessionState::Unnamed);

        client_write.write_all(b" \xff\n").await.unwrap();
        session.handle_name().await.unwrap();
        line.clear();
        client_read.read_line(&mut line).await.unwrap();
        assert_eq!(line, "ERR Name must be valid UTF-8\n");
        assert_eq!(session.state(), &SessionState::Unnamed);

        client_write.write_all(b" bob\n").await.unwrap();
        session.handle_name().await.unwrap();
        line.clear();
        client_read.read_line(&mut line).await.unwrap();
        assert_eq!(line, "OK\n");
        assert_eq!(session.state(), &SessionState::Named(PeerId::from("bob")));
    }

    #[tokio::test]
    async fn test_non_utf8_names_do_not_collide() {
        let registry = Arc::new(PeerRegistry::new());
        let mut first = Client::connect(&registry, "127.0.0.1:1022");
        let mut second = Client::connect(&registry, "127.0.0.1:1023");

        first.writer.write_all(b"NAME \xff\xfe\n").await.unwrap();
        assert_eq!(first.line().await, "ERR Name must be valid UTF-8\n");

        second.writer.write_all(b"NAME \xc3\x28\n").await.unwrap();
        assert_eq!(second.line().await, "ERR Name must be valid UTF-8\n");

        assert!(registry.is_empty().await);

        // The session is still usable after the rejection.
        first.send("NAME erin\n").await;
        assert_eq!(first.line().await, "OK\n");
    }
}
