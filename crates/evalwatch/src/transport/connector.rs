//! Socket abstraction behind the channel transport.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::TransportError;

/// A frame the transport cares about. Control frames other than close
/// are handled by the socket layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// The peer started the close handshake.
    Close,
}

/// Receive half of one open channel connection.
#[async_trait]
pub trait ChannelStream: Send {
    /// Next frame, or `None` once the connection is gone.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Opens channel connections.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn ChannelStream>, TransportError>;
}

/// WebSocket connector backed by tokio-tungstenite.
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn ChannelStream>, TransportError> {
        let attempt = tokio_tungstenite::connect_async(url);
        let (socket, response) = match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                return Err(TransportError::ConnectFailed {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::ConnectFailed {
                    url: url.to_string(),
                    message: format!("timed out after {:?}", self.connect_timeout),
                })
            }
        };

        log::debug!("Channel handshake with {} ({})", url, response.status());
        Ok(Box::new(WsStream { socket }))
    }
}

struct WsStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChannelStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.socket.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(Frame::Text(text))),
                    Err(_) => {
                        log::warn!("Dropping non UTF-8 binary frame ({} bytes)", data.len());
                    }
                },
                Message::Close(_) => return Some(Ok(Frame::Close)),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
