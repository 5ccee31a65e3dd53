//! Responder side: accept WebSocket connections and run one session each.
//!
//! Connections are only upgraded when the request path matches the
//! configured endpoint. Every session shares the server's
//! [`CatalogBuilder`], and with it one hash cache.

use crate::connection::{WsTransport, ws_config};
use crate::session::{SessionConfig, SessionEnd, SyncSession};
use anyhow::Result;
use filesync_core::{CatalogBuilder, FileSystem};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::{
    Error as WsError,
    handshake::server::{ErrorResponse, Request, Response},
    http::StatusCode,
};
use tracing::{debug, error, info, warn};

/// Listens for initiators and syncs `fs` with each of them.
pub struct SyncServer<F> {
    fs: Arc<F>,
    catalogs: Arc<CatalogBuilder>,
    session: SessionConfig,
    /// Request path to accept, e.g. `/echo`
    path: String,
}

impl<F: FileSystem + 'static> SyncServer<F> {
    pub fn new(fs: F, session: SessionConfig, path: String) -> Self {
        Self {
            fs: Arc::new(fs),
            catalogs: Arc::new(CatalogBuilder::new()),
            session,
            path,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Sync server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Accept connections until `shutdown` resolves, then close every live
    /// session and wait for them to finish.
    pub async fn serve<S>(self, listener: TcpListener, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let server = Arc::new(self);
        let (stop_tx, _) = watch::channel(false);
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&server);
                        let mut stop = stop_tx.subscribe();
                        sessions.spawn(async move {
                            let stopped = async move {
                                let _ = stop.changed().await;
                            };
                            server.handle_connection(stream, addr, stopped).await;
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },

                Some(joined) = sessions.join_next() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }

                _ = &mut shutdown => break,
            }
        }

        info!("Shutting down; closing {} session(s)", sessions.len());
        stop_tx.send_replace(true);
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {}", e);
            }
        }
        Ok(())
    }

    /// Upgrade one connection and run its session to completion.
    ///
    /// Failures end this session only.
    async fn handle_connection<S>(&self, stream: TcpStream, addr: SocketAddr, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        let expected = self.path.clone();
        let check_path = move |req: &Request, resp: Response| {
            if req.uri().path() == expected {
                Ok(resp)
            } else {
                debug!("Rejecting request for {}", req.uri().path());
                let mut err = ErrorResponse::new(Some("Not Found".to_string()));
                *err.status_mut() = StatusCode::NOT_FOUND;
                Err(err)
            }
        };

        let upgrade = accept_hdr_async_with_config(stream, check_path, Some(ws_config()));
        let ws_stream = match upgrade.await {
            Ok(ws) => ws,
            Err(WsError::Http(resp)) => {
                warn!(
                    "Rejected connection from {}: HTTP {}",
                    addr,
                    resp.status()
                );
                return;
            }
            Err(e) => {
                // Port scanners connect and close without a handshake
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before handshake from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return;
            }
        };

        info!("New connection from {}", addr);
        let transport = WsTransport::new(addr.to_string(), ws_stream);
        let session = SyncSession::new(
            transport,
            Arc::clone(&self.fs),
            Arc::clone(&self.catalogs),
            self.session.clone(),
        );

        match session.run(shutdown).await {
            Ok(SessionEnd::PeerClosed) => info!("Session with {} ended by peer", addr),
            Ok(SessionEnd::Shutdown) => info!("Session with {} closed", addr),
            Err(e) => warn!("Session with {} failed: {}", addr, e),
        }
    }
}
