//! Single WebSocket connection over tokio-tungstenite.
//!
//! [`TungsteniteConnector::open`] performs the TLS + WebSocket handshake
//! (bounded by a timeout) and spawns a task that:
//! 1. Writes outbound frames in order and confirms each write.
//! 2. Forwards inbound text frames to the session.
//! 3. Answers protocol-level pings.
//! 4. Emits exactly one [`TransportEvent::Closed`] when the socket ends.
//!
//! Reconnection is not handled here; the session decides whether and when to
//! open a new link.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::link::{OutboundFrame, TransportEvent, WsLink, WsRemote, link_pair};
use crate::error::KcError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens transport links. The session only depends on this trait.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`, failing if the handshake does not complete
    /// within `handshake_timeout`.
    async fn open(&self, url: &str, handshake_timeout: Duration) -> Result<WsLink, KcError>;
}

/// Production connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str, handshake_timeout: Duration) -> Result<WsLink, KcError> {
        info!("[ws] connecting to {}", redact_query(url));

        // tungstenite never negotiates permessage-deflate, so frames go out uncompressed.
        let (stream, _response) =
            tokio::time::timeout(handshake_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    KcError::WebSocket(format!("handshake timed out after {handshake_timeout:?}"))
                })?
                .map_err(|e| KcError::WebSocket(e.to_string()))?;

        info!("[ws] connected");
        let (link, remote) = link_pair();
        tokio::spawn(link_loop(stream, remote));
        Ok(link)
    }
}

/// Socket task: pumps frames between the tungstenite stream and the link.
async fn link_loop(stream: WsStream, mut remote: WsRemote) {
    let (mut ws_write, mut ws_read) = stream.split();

    loop {
        tokio::select! {
            // Close requested by the session (or its handle was dropped)
            _ = remote.shutdown.changed() => {
                info!("[ws] close requested");
                remote.set_writable(false);
                let _ = ws_write.close().await;
                break;
            }

            // Outbound frame from the session
            frame = remote.outbound.recv() => {
                let Some(OutboundFrame { text, done }) = frame else {
                    debug!("[ws] session dropped its sender");
                    let _ = ws_write.close().await;
                    break;
                };
                match ws_write.send(Message::Text(text.into())).await {
                    Ok(()) => {
                        let _ = done.send(Ok(()));
                    }
                    Err(e) => {
                        error!("[ws] send error: {e}");
                        let _ = done.send(Err(e.to_string()));
                        remote.emit(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }

            // Incoming message
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        remote.emit(TransportEvent::Text(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!("[ws] received close frame: {frame:?}");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("[ws] read error: {e}");
                        remote.emit(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        warn!("[ws] stream ended");
                        break;
                    }
                    _ => {} // Binary, Pong, Frame: ignored
                }
            }
        }
    }

    remote.set_writable(false);
    remote.emit(TransportEvent::Closed);
}

/// Strip the query string (it carries the session token) for logging.
fn redact_query(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut u) => {
            u.set_query(None);
            u.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_not_logged() {
        let url = "wss://ws-api-spot.kucoin.com/?token=secret&connectId=abc";
        assert_eq!(redact_query(url), "wss://ws-api-spot.kucoin.com/");
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_to_open() {
        let err = TungsteniteConnector
            .open("ws://127.0.0.1:1/", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, KcError::WebSocket(_)));
    }
}
