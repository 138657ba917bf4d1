//! reqwest-backed implementation of the conversation API

use super::types::{
    ConversationRecord, CreateConversationRequest, ListQuery, MessageRecord, SendMessageRequest,
};
use super::ApiError;
use crate::config::ClientConfig;
use crate::runtime::ConversationApi;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

/// HTTP client for the conversation backend
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::unknown(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            token: config.token.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        endpoint(&self.base_url, segments)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.authorize(request).send().await?;
        decode(response).await
    }
}

/// Append path segments to the base URL, percent-encoding each one
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ApiError::invalid_request(format!("Base URL cannot hold a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(ApiError::from_status(status, &error_detail(&body)));
    }

    serde_json::from_str(&body)
        .map_err(|e| ApiError::decode(format!("Failed to parse response: {e} - body: {body}")))
}

/// Pull `detail` (or `message`) out of an error body, falling back to the raw text
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("detail")
                .or_else(|| v.get("message"))
                .map(|d| d.as_str().map_or_else(|| d.to_string(), ToString::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl ConversationApi for HttpApi {
    async fn history(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        let url = self.url(&["api", "v1", "threads", conversation_id, "messages"])?;
        self.execute(self.client.get(url)).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        // The backend mounts the send endpoint under the singular "thread"
        let url = self.url(&["api", "v1", "thread", conversation_id, "messages"])?;
        self.execute(self.client.post(url).json(&SendMessageRequest { content }))
            .await
    }

    async fn create_conversation(&self, title: &str) -> Result<ConversationRecord, ApiError> {
        let url = self.url(&["api", "v1", "threads"])?;
        self.execute(self.client.post(url).json(&CreateConversationRequest { title }))
            .await
    }

    async fn list_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, ApiError> {
        let url = self.url(&["api", "v1", "threads"])?;
        self.execute(self.client.get(url).query(&ListQuery { page, limit }))
            .await
    }
}
