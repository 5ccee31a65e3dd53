//! Transport trait: a message-oriented duplex channel to one peer.
//!
//! Implementations:
//! - `MemoryTransport` - Connected in-process pair, for testing
//! - `WsTransport` (in filesync-daemon) - WebSocket over TCP
//!
//! Messages are delivered whole and in the order sent. `send` must be safe to
//! call from several tasks at once; each call writes one message atomically
//! with respect to the others.

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::lock::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The peer closed the connection (or it was closed locally)
    #[error("Connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// An established connection to a peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Receive the next message (blocks until data available).
    ///
    /// Returns `TransportError::Closed` once the connection has ended.
    async fn recv(&self) -> Result<Vec<u8>>;

    /// Start a normal-closure close handshake.
    async fn close(&self) -> Result<()>;
}

/// One end of an in-process duplex channel.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded();
        let (b_tx, a_rx) = mpsc::unbounded();
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }

    /// Whether our outgoing half has been closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        self.tx
            .unbounded_send(data.to_vec())
            .map_err(|_| TransportError::SendFailed("channel closed".to_string()))
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        match rx.next().await {
            Some(data) => Ok(data),
            None => {
                // Answer the peer's close the way a WebSocket would
                self.tx.close_channel();
                Err(TransportError::Closed)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.tx.close_channel();
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, data: &[u8]) -> Result<()> {
        (**self).send(data).await
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        (**self).recv().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
