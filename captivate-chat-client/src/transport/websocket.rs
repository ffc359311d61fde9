//! WebSocket transport
//!
//! Opens the connection with tokio-tungstenite and splits it: the write half
//! becomes the [`TransportSink`], the read half is drained by a background
//! task into the inbound event queue.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use super::{Connector, TransportEvent, TransportPair, TransportSink};
use crate::error::{ClientError, Result};

// Type alias for WebSocket sink to simplify type signatures
type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

type WsStream = futures::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Opens WebSocket connections
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<TransportPair> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(format!("Failed to connect: {}", e)))?;
        info!("WebSocket connected, waiting for API confirmation...");

        let (write, read) = ws_stream.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_loop(read, events_tx));

        Ok(TransportPair {
            sink: Box::new(WebSocketSink { write }),
            events: events_rx,
        })
    }
}

/// Forward inbound frames until the socket ends or nobody listens
async fn read_loop(mut read: WsStream, events_tx: mpsc::UnboundedSender<TransportEvent>) {
    loop {
        let event = match read.next().await {
            Some(Ok(WsMessage::Text(text))) => TransportEvent::Text(text),
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => TransportEvent::Text(text),
                Err(e) => {
                    warn!("Dropping non UTF-8 binary frame: {}", e);
                    continue;
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => {
                info!("WebSocket connection closed");
                let _ = events_tx.send(TransportEvent::Closed);
                break;
            }
            Some(Err(e)) => {
                warn!("WebSocket error: {}", e);
                let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                break;
            }
            Some(Ok(_)) => continue,
        };

        if events_tx.send(event).is_err() {
            debug!("Inbound receiver dropped, stopping WebSocket reader");
            break;
        }
    }
}

struct WebSocketSink {
    write: WsSink,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.write
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| ClientError::Transport(format!("Failed to send: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.write
            .close()
            .await
            .map_err(|e| ClientError::Transport(format!("Failed to close: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_unreachable_endpoint_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("ws://{}/dev?apiKey=none", addr);
        let result = WebSocketConnector::new().open(&url).await;
        match result {
            Err(ClientError::Transport(msg)) => assert!(msg.contains("Failed to connect")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connection to a closed port should fail"),
        }
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_url() {
        let result = WebSocketConnector::new().open("not a url").await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
