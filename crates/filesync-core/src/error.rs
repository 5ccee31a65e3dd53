//! Error taxonomy for a sync session.

use crate::fs::FsError;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use thiserror::Error;

/// Any failure that ends a sync session.
///
/// Sessions fail closed: every variant tears down the connection it occurred
/// on. None of them stop the process.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local filesystem read, write, stat or delete failed
    #[error("IO error: {0}")]
    Io(#[from] FsError),

    /// Peer sent something malformed or out of place
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer presented a wrong token, or spoke before presenting one
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Connection-level failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SyncError {
    /// The connection ended normally (close handshake or stream end).
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, SyncError::Transport(TransportError::Closed))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
