//! Wire types for the conversation REST API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message as returned by the history and send endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// A conversation as returned by the list and create endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ConversationRecord {
    /// Title for display; untitled conversations read as "New Chat"
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("New Chat")
    }
}

/// Request to post a user message
#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub content: &'a str,
}

/// Request to create a conversation
#[derive(Debug, Serialize)]
pub struct CreateConversationRequest<'a> {
    pub title: &'a str,
}

/// Pagination for the conversation list
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
}
