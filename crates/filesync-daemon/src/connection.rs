//! WebSocket transport for one peer connection.
//!
//! The stream is split into read and write halves, each behind its own
//! lock: the inbound loop owns reads while any task may send.

use async_trait::async_trait;
use filesync_core::MAX_MESSAGE_SIZE;
use filesync_core::transport::{Result, Transport, TransportError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Error as WsError, Message,
        error::ProtocolError,
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
    },
};
use tracing::{debug, error};

/// WebSocket limits for both ends of a session.
///
/// Raises tungstenite's default message and frame caps to the protocol's own
/// limit, so any message that passes `SyncMessage::encode` is accepted.
pub fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

/// A WebSocket connection to a peer, usable as a [`Transport`].
pub struct WsTransport<S> {
    /// Peer label for logs (remote address or URL)
    peer: String,
    /// Write half; holding the lock makes each send atomic
    write: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    read: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(peer: impl Into<String>, ws_stream: WebSocketStream<S>) -> Self {
        let (write, read) = ws_stream.split();
        Self {
            peer: peer.into(),
            write: Mutex::new(write),
            read: Mutex::new(read),
        }
    }
}

fn map_ws_err(e: WsError, failed: fn(String) -> TransportError) -> TransportError {
    match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::SendAfterClosing) => TransportError::Closed,
        other => failed(other.to_string()),
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// All messages are sent as binary WebSocket frames.
    async fn send(&self, data: &[u8]) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| map_ws_err(e, TransportError::SendFailed))
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await {
                Some(Ok(msg)) => match msg {
                    Message::Binary(data) => return Ok(data.into()),
                    Message::Text(text) => return Ok(text.into_bytes()),
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                    Message::Close(frame) => {
                        debug!("Received close frame from {}: {:?}", self.peer, frame);
                        return Err(TransportError::Closed);
                    }
                },
                Some(Err(e)) => {
                    let err = map_ws_err(e, TransportError::ReceiveFailed);
                    match &err {
                        TransportError::Closed => debug!("Connection {} closed", self.peer),
                        _ => error!("WebSocket error on {}: {}", self.peer, err),
                    }
                    return Err(err);
                }
                None => {
                    debug!("Connection {} stream ended", self.peer);
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await
            .map_err(|e| map_ws_err(e, TransportError::SendFailed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_config_admits_largest_message() {
        let config = ws_config();
        assert_eq!(config.max_message_size, Some(MAX_MESSAGE_SIZE));
        assert_eq!(config.max_frame_size, Some(MAX_MESSAGE_SIZE));
    }
}
