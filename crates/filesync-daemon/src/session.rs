//! Sync session: one connection, one inbound loop, one outbound driver.
//!
//! The protocol is symmetric apart from two things:
//! - The initiator opens with `CheckToken` and drives cycles from a timer.
//! - The responder authenticates the initiator and answers each peer catalog
//!   with a cycle of its own.
//!
//! A cycle is delete-propagation against the last catalog we sent, then our
//! full catalog as `RequestFiles`. The peer replies with `WriteFile`s for
//! whatever we are missing.
//!
//! The initiator only starts a cycle while it holds the turn. Starting a
//! cycle hands the turn to the peer; it comes back once the peer's own
//! `RequestFiles` has been received and answered. The inbound loop reports
//! that over a channel so the turn is only ever mutated by the driver.

use filesync_core::catalog::{CatalogBuilder, FileCatalog, is_vcs_path};
use filesync_core::error::{Result, SyncError};
use filesync_core::protocol::{ProtocolError, SyncMessage, safe_relative_path};
use filesync_core::reconcile::{files_to_delete, files_to_push};
use filesync_core::transport::TransportError;
use filesync_core::{FileSystem, SharedSecret, Transport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, error, info, warn};

/// How long to wait for the peer to acknowledge our close frame.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dials out, presents the token, drives cycles on a timer
    Initiator,
    /// Accepts, checks the token, replies to each cycle
    Responder,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    pub secret: SharedSecret,
    /// Interval between cycle attempts (initiator only)
    pub cycle: Duration,
}

/// Whether the initiator may start a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Ours,
    Peers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// We sent our catalog
    CycleStarted,
    /// The peer's catalog arrived and every file it lacked has been sent
    PeerCatalogHandled,
}

impl Turn {
    pub fn on(self, event: TurnEvent) -> Turn {
        match event {
            TurnEvent::CycleStarted => Turn::Peers,
            TurnEvent::PeerCatalogHandled => Turn::Ours,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection
    PeerClosed,
    /// Local shutdown was requested and the close handshake was attempted
    Shutdown,
}

/// State shared by the inbound loop and the outbound driver.
struct SessionContext<T, F> {
    transport: T,
    fs: F,
    catalogs: Arc<CatalogBuilder>,
}

impl<T: Transport, F: FileSystem> SessionContext<T, F> {
    async fn send(&self, msg: &SyncMessage) -> Result<()> {
        let data = msg.encode()?;
        self.transport.send(&data).await?;
        Ok(())
    }

    /// Answer a peer catalog with a `WriteFile` for every file it needs.
    ///
    /// File bytes are read at send time; a file that vanished since the
    /// catalog was built fails the session. A file whose message would exceed
    /// the wire limit is skipped with a warning.
    async fn push_missing(&self, remote: &FileCatalog) -> Result<usize> {
        let local = self.catalogs.build(&self.fs).await?;
        let paths = files_to_push(&local, remote);

        let mut sent = 0;
        for path in &paths {
            let data = self.fs.read(path).await?;
            let size = data.len();
            match self.send(&SyncMessage::write_file(path.clone(), data)).await {
                Ok(()) => {
                    info!("Sending update: {} ({} bytes)", path, size);
                    sent += 1;
                }
                Err(SyncError::Protocol(ProtocolError::TooLarge { size: encoded, max })) => {
                    warn!("Skipping {}: {} bytes encoded exceeds {}", path, encoded, max);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

    async fn apply_write(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = checked_path(name)?;
        info!("Saving update to {} ({} bytes)", path, data.len());
        self.fs.write(path, data).await?;
        Ok(())
    }

    async fn apply_delete(&self, name: &str) -> Result<()> {
        let path = checked_path(name)?;
        match self.fs.delete(path).await {
            Ok(()) => {
                info!("Deleted {}", path);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Delete of {} skipped: already gone", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject peer-supplied paths that leave the root or touch VCS metadata.
fn checked_path(name: &str) -> Result<&str> {
    let path = safe_relative_path(name)?;
    if is_vcs_path(path) {
        return Err(ProtocolError::UnsafePath(name.to_string()).into());
    }
    Ok(path)
}

/// The catalog we last sent, for detecting local deletions.
#[derive(Default)]
struct CycleState {
    last_known: FileCatalog,
}

impl CycleState {
    async fn run<T: Transport, F: FileSystem>(
        &mut self,
        ctx: &SessionContext<T, F>,
    ) -> Result<()> {
        let catalog = ctx.catalogs.build(&ctx.fs).await?;

        let deleted = files_to_delete(&self.last_known, &catalog);
        for path in &deleted {
            info!("Sending delete: {}", path);
            ctx.send(&SyncMessage::delete_file(path.clone())).await?;
        }
        self.last_known = catalog.clone();

        let count = catalog.len();
        ctx.send(&SyncMessage::request_files(catalog)).await?;
        debug!(
            "Cycle sent {} delete(s) and a catalog of {} file(s)",
            deleted.len(),
            count
        );
        Ok(())
    }
}

/// Receives and dispatches messages until the connection ends or fails.
struct Inbound<T, F> {
    ctx: Arc<SessionContext<T, F>>,
    role: Role,
    secret: SharedSecret,
    auth: AuthState,
    /// Responder only: the catalog it last replied with
    cycle: CycleState,
    turn_tx: mpsc::UnboundedSender<TurnEvent>,
}

impl<T: Transport, F: FileSystem> Inbound<T, F> {
    /// Returns the error that ended the loop. A failure closes the
    /// connection without telling the peer why.
    async fn run(mut self) -> SyncError {
        let err = loop {
            if let Err(e) = self.step().await {
                break e;
            }
        };

        if !err.is_connection_closed() {
            if let Err(close_err) = self.ctx.transport.close().await {
                debug!("Close after failure also failed: {}", close_err);
            }
        }
        err
    }

    async fn step(&mut self) -> Result<()> {
        let data = self.ctx.transport.recv().await?;
        let msg = SyncMessage::decode(&data)?;
        debug!("Received {} ({} bytes)", msg.command(), data.len());
        self.dispatch(msg).await
    }

    async fn dispatch(&mut self, msg: SyncMessage) -> Result<()> {
        if let SyncMessage::CheckToken { token } = &msg {
            return self.authenticate(token);
        }
        if self.auth == AuthState::Unauthenticated {
            return Err(SyncError::Auth(format!(
                "{} received before token",
                msg.command()
            )));
        }

        match msg {
            SyncMessage::CheckToken { .. } => Ok(()),
            SyncMessage::RequestFiles { files } => {
                let pushed = self.ctx.push_missing(&files).await?;
                debug!(
                    "Answered peer catalog of {} file(s) with {} update(s)",
                    files.len(),
                    pushed
                );
                match self.role {
                    Role::Responder => self.cycle.run(&*self.ctx).await,
                    Role::Initiator => {
                        if self.turn_tx.send(TurnEvent::PeerCatalogHandled).is_err() {
                            debug!("Outbound driver gone; dropping turn event");
                        }
                        Ok(())
                    }
                }
            }
            SyncMessage::WriteFile { name, data } => self.ctx.apply_write(&name, &data).await,
            SyncMessage::DeleteFile { name } => self.ctx.apply_delete(&name).await,
        }
    }

    fn authenticate(&mut self, token: &str) -> Result<()> {
        if self.role == Role::Initiator {
            return Err(ProtocolError::Unexpected(filesync_core::Command::CheckToken).into());
        }
        if !self.secret.verify(token) {
            return Err(SyncError::Auth("token mismatch".to_string()));
        }
        if self.auth == AuthState::Unauthenticated {
            info!("Peer authenticated");
        }
        self.auth = AuthState::Authenticated;
        Ok(())
    }
}

/// A sync session over one established connection.
pub struct SyncSession<T, F> {
    ctx: Arc<SessionContext<T, F>>,
    config: SessionConfig,
}

impl<T, F> SyncSession<T, F>
where
    T: Transport + 'static,
    F: FileSystem + 'static,
{
    pub fn new(transport: T, fs: F, catalogs: Arc<CatalogBuilder>, config: SessionConfig) -> Self {
        Self {
            ctx: Arc::new(SessionContext {
                transport,
                fs,
                catalogs,
            }),
            config,
        }
    }

    /// Run until the peer closes, a fatal error occurs, or `shutdown`
    /// resolves.
    ///
    /// Errors are per-session: the caller logs them and carries on.
    pub async fn run<S>(self, shutdown: S) -> Result<SessionEnd>
    where
        S: Future<Output = ()> + Send,
    {
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();

        let auth = match self.config.role {
            Role::Initiator => {
                // Send-and-forget: the responder enforces the token
                self.ctx
                    .send(&SyncMessage::check_token(self.config.secret.as_str()))
                    .await?;
                debug!("Sent token");
                AuthState::Authenticated
            }
            Role::Responder => AuthState::Unauthenticated,
        };

        let inbound = Inbound {
            ctx: Arc::clone(&self.ctx),
            role: self.config.role,
            secret: self.config.secret.clone(),
            auth,
            cycle: CycleState::default(),
            turn_tx,
        };
        let inbound = tokio::spawn(inbound.run());

        match self.config.role {
            Role::Initiator => self.drive(inbound, turn_rx, shutdown).await,
            Role::Responder => self.wait(inbound, shutdown).await,
        }
    }

    /// Initiator: start a cycle on every tick where we hold the turn.
    async fn drive<S>(
        &self,
        mut inbound: JoinHandle<SyncError>,
        mut turn_rx: mpsc::UnboundedReceiver<TurnEvent>,
        shutdown: S,
    ) -> Result<SessionEnd>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.config.cycle);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; cycles start one interval in
        ticker.tick().await;

        let mut turn = Turn::Ours;
        let mut cycle = CycleState::default();

        loop {
            tokio::select! {
                biased;

                result = &mut inbound => return finish(result),

                Some(event) = turn_rx.recv() => {
                    turn = turn.on(event);
                    debug!("Turn is now {:?}", turn);
                }

                _ = ticker.tick() => {
                    if turn != Turn::Ours {
                        debug!("Skipping cycle: still waiting for the peer's catalog");
                        continue;
                    }
                    turn = turn.on(TurnEvent::CycleStarted);
                    if let Err(e) = cycle.run(&*self.ctx).await {
                        if e.is_connection_closed() {
                            // Let the inbound loop report how the peer left
                            return finish((&mut inbound).await);
                        }
                        error!("Sync cycle failed: {}", e);
                        inbound.abort();
                        if let Err(close_err) = self.ctx.transport.close().await {
                            debug!("Close after failed cycle also failed: {}", close_err);
                        }
                        return Err(e);
                    }
                }

                _ = &mut shutdown => return Ok(self.close_gracefully(&mut inbound).await),
            }
        }
    }

    /// Responder: all work happens in the inbound loop.
    async fn wait<S>(&self, mut inbound: JoinHandle<SyncError>, shutdown: S) -> Result<SessionEnd>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = &mut inbound => finish(result),
            _ = shutdown => Ok(self.close_gracefully(&mut inbound).await),
        }
    }

    /// Send a close frame and give the peer [`CLOSE_TIMEOUT`] to answer.
    async fn close_gracefully(&self, inbound: &mut JoinHandle<SyncError>) -> SessionEnd {
        info!("Closing session");
        if let Err(e) = self.ctx.transport.close().await {
            warn!("Failed to send close frame: {}", e);
            inbound.abort();
            return SessionEnd::Shutdown;
        }
        if timeout(CLOSE_TIMEOUT, &mut *inbound).await.is_err() {
            debug!("Peer did not acknowledge close within {:?}", CLOSE_TIMEOUT);
            inbound.abort();
        }
        SessionEnd::Shutdown
    }
}

/// Translate the inbound loop's exit into the session result.
fn finish(result: std::result::Result<SyncError, tokio::task::JoinError>) -> Result<SessionEnd> {
    let err = result.unwrap_or_else(|e| {
        SyncError::Transport(TransportError::ReceiveFailed(format!(
            "inbound task failed: {}",
            e
        )))
    });
    if err.is_connection_closed() {
        info!("Peer closed the connection");
        Ok(SessionEnd::PeerClosed)
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filesync_core::{Command, ContentHash, FileDescriptor, InMemoryFs, MemoryTransport};

    const TOKEN: &str = "XXXXXXX";

    fn config(role: Role, cycle_ms: u64) -> SessionConfig {
        SessionConfig {
            role,
            secret: SharedSecret::new(TOKEN),
            cycle: Duration::from_millis(cycle_ms),
        }
    }

    fn spawn_session(
        role: Role,
        cycle_ms: u64,
        fs: Arc<InMemoryFs>,
    ) -> (MemoryTransport, JoinHandle<Result<SessionEnd>>) {
        let (ours, theirs) = MemoryTransport::pair();
        let session = SyncSession::new(
            ours,
            fs,
            Arc::new(CatalogBuilder::new()),
            config(role, cycle_ms),
        );
        let handle = tokio::spawn(session.run(std::future::pending()));
        (theirs, handle)
    }

    async fn send(peer: &MemoryTransport, msg: SyncMessage) {
        peer.send(&msg.encode().unwrap()).await.unwrap();
    }

    async fn recv(peer: &MemoryTransport) -> SyncMessage {
        let data = timeout(Duration::from_secs(2), peer.recv())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed");
        SyncMessage::decode(&data).unwrap()
    }

    /// Collect every message that arrives within `window`.
    async fn drain(peer: &MemoryTransport, window: Duration) -> Vec<SyncMessage> {
        let mut messages = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Ok(data)) = tokio::time::timeout_at(deadline, peer.recv()).await {
            messages.push(SyncMessage::decode(&data).unwrap());
        }
        messages
    }

    fn descriptor(path: &str, mod_time: u64, content: &[u8]) -> FileDescriptor {
        FileDescriptor {
            path: path.to_string(),
            mod_time,
            content_hash: ContentHash::from_content(content),
        }
    }

    #[test]
    fn test_turn_transitions() {
        assert_eq!(Turn::Ours.on(TurnEvent::CycleStarted), Turn::Peers);
        assert_eq!(Turn::Peers.on(TurnEvent::CycleStarted), Turn::Peers);
        assert_eq!(Turn::Peers.on(TurnEvent::PeerCatalogHandled), Turn::Ours);
    }

    #[tokio::test]
    async fn test_responder_rejects_wrong_token() {
        let fs = Arc::new(InMemoryFs::new());
        let (peer, handle) = spawn_session(Role::Responder, 50, Arc::clone(&fs));

        send(&peer, SyncMessage::check_token("wrong")).await;
        // Well-formed, but must never be applied
        let _ = peer
            .send(&SyncMessage::write_file("evil.txt", b"x".to_vec()).encode().unwrap())
            .await;

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SyncError::Auth(_))));
        assert!(matches!(peer.recv().await, Err(TransportError::Closed)));
        assert!(!fs.contains("evil.txt"));
    }

    #[tokio::test]
    async fn test_responder_rejects_message_before_token() {
        let fs = Arc::new(InMemoryFs::new());
        let (peer, handle) = spawn_session(Role::Responder, 50, Arc::clone(&fs));

        send(&peer, SyncMessage::write_file("a.txt", b"a".to_vec())).await;

        assert!(matches!(handle.await.unwrap(), Err(SyncError::Auth(_))));
        assert!(!fs.contains("a.txt"));
    }

    #[tokio::test]
    async fn test_malformed_message_ends_session() {
        let fs = Arc::new(InMemoryFs::new());
        let (peer, handle) = spawn_session(Role::Responder, 50, fs);

        send(&peer, SyncMessage::check_token(TOKEN)).await;
        peer.send(b"{\"cmd\":").await.unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(SyncError::Protocol(ProtocolError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_responder_applies_writes_and_deletes() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("old.txt", b"old").await.unwrap();
        let (peer, handle) = spawn_session(Role::Responder, 50, Arc::clone(&fs));

        send(&peer, SyncMessage::check_token(TOKEN)).await;
        send(&peer, SyncMessage::write_file("dir/new.txt", b"new".to_vec())).await;
        send(&peer, SyncMessage::delete_file("old.txt")).await;
        send(&peer, SyncMessage::delete_file("never-existed.txt")).await;
        peer.close().await.unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::PeerClosed);
        assert_eq!(fs.read("dir/new.txt").await.unwrap(), b"new");
        assert!(!fs.contains("old.txt"));
    }

    #[tokio::test]
    async fn test_unsafe_path_is_fatal() {
        let fs = Arc::new(InMemoryFs::new());
        let (peer, handle) = spawn_session(Role::Responder, 50, Arc::clone(&fs));

        send(&peer, SyncMessage::check_token(TOKEN)).await;
        send(&peer, SyncMessage::write_file("../escape.txt", b"x".to_vec())).await;

        assert!(matches!(
            handle.await.unwrap(),
            Err(SyncError::Protocol(ProtocolError::UnsafePath(_)))
        ));
    }

    #[tokio::test]
    async fn test_responder_pushes_missing_then_replies_with_catalog() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("x.txt", b"hi").await.unwrap();
        let (peer, _handle) = spawn_session(Role::Responder, 50, Arc::clone(&fs));

        send(&peer, SyncMessage::check_token(TOKEN)).await;
        send(&peer, SyncMessage::request_files(FileCatalog::new())).await;

        assert_eq!(recv(&peer).await, SyncMessage::write_file("x.txt", b"hi".to_vec()));
        match recv(&peer).await {
            SyncMessage::RequestFiles { files } => {
                assert_eq!(files.len(), 1);
                assert!(files.contains("x.txt"));
            }
            other => panic!("Expected RequestFiles, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_file_is_skipped_not_fatal() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("big.bin", &vec![200u8; 38 * 1024 * 1024]).await.unwrap();
        fs.write("small.txt", b"ok").await.unwrap();
        let (peer, handle) = spawn_session(Role::Responder, 50, Arc::clone(&fs));

        send(&peer, SyncMessage::check_token(TOKEN)).await;
        send(&peer, SyncMessage::request_files(FileCatalog::new())).await;

        assert_eq!(recv(&peer).await, SyncMessage::write_file("small.txt", b"ok".to_vec()));
        assert_eq!(recv(&peer).await.command(), Command::RequestFiles);
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn test_identical_content_is_not_resent() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("x.txt", b"same").await.unwrap();
        fs.set_mtime("x.txt", 5_000);
        let (peer, _handle) = spawn_session(Role::Responder, 50, Arc::clone(&fs));

        send(&peer, SyncMessage::check_token(TOKEN)).await;
        let theirs: FileCatalog = vec![descriptor("x.txt", 1_000, b"same")].into_iter().collect();
        send(&peer, SyncMessage::request_files(theirs)).await;

        // Our copy is newer but identical: only our catalog comes back
        assert_eq!(recv(&peer).await.command(), Command::RequestFiles);
    }

    #[tokio::test]
    async fn test_responder_propagates_its_own_deletions() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("y.txt", b"y").await.unwrap();
        let (peer, _handle) = spawn_session(Role::Responder, 50, Arc::clone(&fs));

        send(&peer, SyncMessage::check_token(TOKEN)).await;
        let ours: FileCatalog = vec![descriptor("y.txt", u64::MAX, b"y")].into_iter().collect();
        send(&peer, SyncMessage::request_files(ours.clone())).await;
        assert_eq!(recv(&peer).await.command(), Command::RequestFiles);

        fs.delete("y.txt").await.unwrap();
        send(&peer, SyncMessage::request_files(ours)).await;

        assert_eq!(recv(&peer).await, SyncMessage::delete_file("y.txt"));
        assert_eq!(recv(&peer).await.command(), Command::RequestFiles);
    }

    #[tokio::test]
    async fn test_initiator_opens_with_token() {
        let fs = Arc::new(InMemoryFs::new());
        let (peer, _handle) = spawn_session(Role::Initiator, 20, fs);

        assert_eq!(recv(&peer).await, SyncMessage::check_token(TOKEN));
    }

    #[tokio::test]
    async fn test_initiator_waits_for_peer_catalog_between_cycles() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("x.txt", b"hi").await.unwrap();
        let (peer, _handle) = spawn_session(Role::Initiator, 20, Arc::clone(&fs));

        // Many ticks pass, but only one cycle may start
        let messages = drain(&peer, Duration::from_millis(200)).await;
        let commands: Vec<_> = messages.iter().map(SyncMessage::command).collect();
        assert_eq!(commands, vec![Command::CheckToken, Command::RequestFiles]);

        // Peer replies with an empty catalog: we push what it lacks, then
        // the turn is ours again
        send(&peer, SyncMessage::request_files(FileCatalog::new())).await;
        assert_eq!(recv(&peer).await, SyncMessage::write_file("x.txt", b"hi".to_vec()));
        assert_eq!(recv(&peer).await.command(), Command::RequestFiles);

        let messages = drain(&peer, Duration::from_millis(150)).await;
        assert!(messages.is_empty(), "unexpected {:?}", messages);
    }

    #[tokio::test]
    async fn test_initiator_sends_deletions_before_catalog() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("y.txt", b"y").await.unwrap();
        let (peer, _handle) = spawn_session(Role::Initiator, 20, Arc::clone(&fs));

        assert_eq!(recv(&peer).await.command(), Command::CheckToken);
        assert_eq!(recv(&peer).await.command(), Command::RequestFiles);

        fs.delete("y.txt").await.unwrap();
        send(&peer, SyncMessage::request_files(FileCatalog::new())).await;

        assert_eq!(recv(&peer).await, SyncMessage::delete_file("y.txt"));
        match recv(&peer).await {
            SyncMessage::RequestFiles { files } => assert!(files.is_empty()),
            other => panic!("Expected RequestFiles, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initiator_rejects_token_from_peer() {
        let fs = Arc::new(InMemoryFs::new());
        let (peer, handle) = spawn_session(Role::Initiator, 1_000, fs);

        send(&peer, SyncMessage::check_token(TOKEN)).await;

        assert!(matches!(
            handle.await.unwrap(),
            Err(SyncError::Protocol(ProtocolError::Unexpected(Command::CheckToken)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_within_timeout() {
        let fs = Arc::new(InMemoryFs::new());
        let (ours, peer) = MemoryTransport::pair();
        let session = SyncSession::new(
            ours,
            fs,
            Arc::new(CatalogBuilder::new()),
            config(Role::Initiator, 1_000),
        );
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(session.run(async move {
            let _ = stop_rx.await;
        }));

        assert_eq!(recv(&peer).await.command(), Command::CheckToken);
        stop_tx.send(()).unwrap();

        // Peer never answers the close; the session still returns promptly
        let result = timeout(CLOSE_TIMEOUT * 3, handle).await.unwrap().unwrap();
        assert_eq!(result.unwrap(), SessionEnd::Shutdown);
        assert!(matches!(peer.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_two_sessions_converge() {
        let a = Arc::new(InMemoryFs::new());
        let b = Arc::new(InMemoryFs::new());
        a.write("x.txt", b"hi").await.unwrap();
        a.write("y.txt", b"bye").await.unwrap();
        b.write("from-b.txt", b"b").await.unwrap();

        let (a_end, b_end) = MemoryTransport::pair();
        let initiator = SyncSession::new(
            a_end,
            Arc::clone(&a),
            Arc::new(CatalogBuilder::new()),
            config(Role::Initiator, 20),
        );
        let responder = SyncSession::new(
            b_end,
            Arc::clone(&b),
            Arc::new(CatalogBuilder::new()),
            config(Role::Responder, 20),
        );
        let _initiator = tokio::spawn(initiator.run(std::future::pending()));
        let _responder = tokio::spawn(responder.run(std::future::pending()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !(b.contains("x.txt") && b.contains("y.txt") && a.contains("from-b.txt")) {
            assert!(tokio::time::Instant::now() < deadline, "initial sync did not converge");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(b.read("x.txt").await.unwrap(), b"hi");
        assert_eq!(a.read("from-b.txt").await.unwrap(), b"b");

        a.delete("y.txt").await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while b.contains("y.txt") {
            assert!(tokio::time::Instant::now() < deadline, "delete did not propagate");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!a.contains("y.txt"));
    }
}
