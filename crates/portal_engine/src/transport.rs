use futures_util::StreamExt;
use portal_logging::portal_debug;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("unable to connect to {url}: {message}")]
    Connect { url: String, message: String },
    #[error("{0}")]
    Receive(String),
}

/// Source of text frames for one job.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// `None` once the peer has closed the transport.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self);
}

#[async_trait::async_trait]
pub trait JobTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, TransportError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait::async_trait]
impl JobTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, TransportError> {
        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|err| TransportError::Connect {
                    url: url.to_string(),
                    message: err.to_string(),
                })?;
        portal_debug!("Websocket open: {url}");
        Ok(Box::new(WebSocketFrames {
            stream,
            failed: false,
        }))
    }
}

struct WebSocketFrames {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// A receive error ends the stream after it has been reported.
    failed: bool,
}

#[async_trait::async_trait]
impl FrameSource for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        if self.failed {
            return None;
        }
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(decode_frame(text.as_str()))),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(decode_frame(&String::from_utf8_lossy(&bytes))))
                }
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(TransportError::Receive(err.to_string())));
                }
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
        portal_debug!("Websocket close");
    }
}

/// Job frames are JSON-encoded strings; anything else is taken verbatim.
pub fn decode_frame(raw: &str) -> String {
    match serde_json::from_str::<String>(raw) {
        Ok(text) => text,
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::decode_frame;

    #[test]
    fn json_strings_are_unwrapped() {
        assert_eq!(decode_frame("\"Ingesting... 3\""), "Ingesting... 3");
        assert_eq!(decode_frame("\"line\\nbreak\""), "line\nbreak");
    }

    #[test]
    fn other_frames_are_verbatim() {
        assert_eq!(decode_frame("plain Done"), "plain Done");
        assert_eq!(decode_frame("{\"a\":1}"), "{\"a\":1}");
    }
}
