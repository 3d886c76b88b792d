//! Event-stream transport seam and its WebSocket implementation.

use async_trait::async_trait;
use cadence_core::SessionToken;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Frames surfaced to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Handshake rejected with HTTP {status}")]
    Rejected { status: u16 },
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("Invalid stream endpoint: {0}")]
    Endpoint(String),
    #[error("Transport closed")]
    Closed,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::Rejected {
                status: response.status().as_u16(),
            },
            other => Self::WebSocket(Box::new(other)),
        }
    }
}

impl TransportError {
    /// Handshake refused because of the credential.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Rejected { status: 401 | 403 })
    }
}

/// One open event-stream session.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next frame, or `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>>;

    async fn close(&mut self);
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Stream URL with the bearer token as the `token` query parameter.
///
/// Browser-style handshakes cannot carry custom headers, so the backend
/// accepts the credential in the query string.
pub fn stream_url(endpoint: &str, token: &SessionToken) -> Result<String, TransportError> {
    let mut url = Url::parse(endpoint).map_err(|e| TransportError::Endpoint(e.to_string()))?;
    url.query_pairs_mut().append_pair("token", token.as_str());
    Ok(url.into())
}

// ============================================================================
// WEBSOCKET
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Box::new(WsTransport { stream }))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(err.into())),
            };
            match message {
                Message::Text(text) => return Some(Ok(InboundFrame::Text(text))),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(InboundFrame::Text(text))),
                    Err(_) => continue,
                },
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Some(Ok(InboundFrame::Closed { code, reason }));
                }
                // Control frames are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_as_query_parameter() {
        let url = stream_url("wss://api.example.com/ws?client=web", &SessionToken::new("a b"))
            .unwrap();
        assert_eq!(url, "wss://api.example.com/ws?client=web&token=a+b");
    }

    #[test]
    fn invalid_endpoint_is_reported() {
        assert!(matches!(
            stream_url("not a url", &SessionToken::new("t")),
            Err(TransportError::Endpoint(_))
        ));
    }

    #[test]
    fn only_credential_rejections_count_as_auth_failures() {
        assert!(TransportError::Rejected { status: 401 }.is_auth_rejection());
        assert!(TransportError::Rejected { status: 403 }.is_auth_rejection());
        assert!(!TransportError::Rejected { status: 502 }.is_auth_rejection());
        assert!(!TransportError::Closed.is_auth_rejection());
    }
}
