//! Initiator side: dial the responder and run one session.

use crate::connection::{WsTransport, ws_config};
use crate::session::{SessionConfig, SessionEnd, SyncSession};
use filesync_core::transport::TransportError;
use filesync_core::{CatalogBuilder, FileSystem};
use std::future::Future;
use std::sync::Arc;
use tokio_tungstenite::connect_async_with_config;
use tracing::info;

/// Connect to `url` and sync `fs` with the responder until either side
/// closes or `shutdown` resolves.
pub async fn run_client<F, S>(
    url: &str,
    fs: F,
    config: SessionConfig,
    shutdown: S,
) -> anyhow::Result<SessionEnd>
where
    F: FileSystem + 'static,
    S: Future<Output = ()> + Send,
{
    info!("Connecting to {}", url);
    let (ws_stream, _response) = connect_async_with_config(url, Some(ws_config()), false)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", url, e)))?;
    info!("Connected to {}", url);

    let transport = WsTransport::new(url, ws_stream);
    let session = SyncSession::new(transport, fs, Arc::new(CatalogBuilder::new()), config);
    let end = session.run(shutdown).await?;
    Ok(end)
}
