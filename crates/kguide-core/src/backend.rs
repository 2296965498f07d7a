use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::error::ChatError;
use crate::session;

/// Raw response body, chunked however the transport delivered it.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChatError>>;

/// Opens the streaming response for one user message.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn open_stream(&self, token: &str, message: &str) -> Result<ByteStream, ChatError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Clone)]
pub struct HttpChatBackend {
    client: Client,
    url: String,
}

impl HttpChatBackend {
    pub fn new(stream_url: &str) -> Self {
        Self {
            client: Client::new(),
            url: stream_url.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.stream_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn open_stream(&self, token: &str, message: &str) -> Result<ByteStream, ChatError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&ChatRequest { message })
            .send()
            .await?;

        let status = response.status();
        if let Some(err) = session::status_error(status) {
            return Err(err);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::NetworkFailure(format!(
                "chat request failed with status {}: {}",
                status, text
            )));
        }

        debug!(url = %self.url, "chat stream opened");
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ChatError::from))
            .boxed())
    }
}
