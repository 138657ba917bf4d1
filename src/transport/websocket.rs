//! WebSocket connector for the per-conversation push channel

use super::{FrameStream, TransportError};
use crate::config::ClientConfig;
use crate::runtime::StreamConnector;
use async_trait::async_trait;
use futures::{future, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

/// Connects to `{ws_base}/ws/messages/{conversation_id}`
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: Url,
}

impl WebSocketConnector {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            base_url: config.ws_base_url.clone(),
        }
    }

    pub fn stream_url(&self, conversation_id: &str) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::Address(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["ws", "messages", conversation_id]);
        Ok(url)
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self, conversation_id: &str) -> Result<FrameStream, TransportError> {
        let url = self.stream_url(conversation_id)?;
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(socket
            .filter_map(|message| future::ready(payload_of(message)))
            .boxed())
    }
}

/// Text (or UTF-8 binary) frames are payloads; control frames are not
fn payload_of(
    message: Result<Message, tungstenite::Error>,
) -> Option<Result<String, TransportError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.to_string())),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(text)),
            Err(_) => {
                tracing::debug!(len = bytes.len(), "Dropping non-UTF-8 binary frame");
                None
            }
        },
        Ok(_) => None,
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}
