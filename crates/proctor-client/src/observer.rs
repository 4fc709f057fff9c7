//! Observer side of the streaming channel.
//!
//! A thin WebSocket client that subscribes to sessions and yields relay events.

use futures::{SinkExt, StreamExt};
use proctor_model::{SessionId, StreamMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Connection of one remote observer to the relay.
#[derive(Debug)]
pub struct ObserverClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ObserverClient {
    /// Connects to a relay URL such as `ws://127.0.0.1:3000/ws?caller=proctor-1`.
    ///
    /// # Errors
    ///
    /// Returns `TransportDropped` if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(ClientError::transport_dropped)?;
        Ok(Self { ws })
    }

    async fn send(&mut self, message: &StreamMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.ws
            .send(Message::Text(json))
            .await
            .map_err(ClientError::transport_dropped)
    }

    /// Subscribes to a session's frames.
    ///
    /// # Errors
    ///
    /// Returns `TransportDropped` if the message cannot be sent.
    pub async fn watch(&mut self, session_id: &SessionId) -> Result<()> {
        self.send(&StreamMessage::watch(session_id.clone())).await
    }

    /// Unsubscribes from a session.
    ///
    /// # Errors
    ///
    /// Returns `TransportDropped` if the message cannot be sent.
    pub async fn unwatch(&mut self, session_id: &SessionId) -> Result<()> {
        self.send(&StreamMessage::unwatch(session_id.clone())).await
    }

    /// Waits for the next relay event. Returns `None` once the relay closes.
    ///
    /// # Errors
    ///
    /// Returns `TransportDropped` on a socket error.
    pub async fn next_event(&mut self) -> Result<Option<StreamMessage>> {
        while let Some(frame) = self.ws.next().await {
            match frame.map_err(ClientError::transport_dropped)? {
                Message::Text(text) => match serde_json::from_str(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => debug!("Ignoring malformed relay message: {}", e),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportDropped` if the close handshake fails.
    pub async fn close(mut self) -> Result<()> {
        self.ws
            .close(None)
            .await
            .map_err(ClientError::transport_dropped)
    }
}
