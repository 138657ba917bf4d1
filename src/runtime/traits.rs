//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::api::{ApiError, ConversationRecord, MessageRecord};
use crate::transport::{FrameStream, TransportError};
use async_trait::async_trait;
use std::sync::Arc;

/// Request/response side of the backend
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Ordered transcript snapshot
    async fn history(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, ApiError>;

    /// Post a user message; returns the created records (user first, then
    /// the assistant placeholder)
    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Vec<MessageRecord>, ApiError>;

    async fn create_conversation(&self, title: &str) -> Result<ConversationRecord, ApiError>;

    async fn list_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, ApiError>;
}

/// Opens the push channel for one conversation
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, conversation_id: &str) -> Result<FrameStream, TransportError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationApi + ?Sized> ConversationApi for Arc<T> {
    async fn history(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        (**self).history(conversation_id).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        (**self).send_message(conversation_id, content).await
    }

    async fn create_conversation(&self, title: &str) -> Result<ConversationRecord, ApiError> {
        (**self).create_conversation(title).await
    }

    async fn list_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, ApiError> {
        (**self).list_conversations(page, limit).await
    }
}

#[async_trait]
impl<T: StreamConnector + ?Sized> StreamConnector for Arc<T> {
    async fn connect(&self, conversation_id: &str) -> Result<FrameStream, TransportError> {
        (**self).connect(conversation_id).await
    }
}

// ============================================================================
// Logging wrapper
// ============================================================================

/// Logs duration and outcome of every REST call
pub struct LoggingApi<A> {
    inner: A,
}

impl<A: ConversationApi> LoggingApi<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    fn record<T>(operation: &str, started: std::time::Instant, result: &Result<T, ApiError>) {
        let duration_ms = started.elapsed().as_millis();
        match result {
            Ok(_) => tracing::debug!(operation, duration_ms = %duration_ms, "API request completed"),
            Err(e) => tracing::error!(
                operation,
                duration_ms = %duration_ms,
                kind = ?e.kind,
                status = ?e.status,
                error = %e.message,
                "API request failed"
            ),
        }
    }
}

#[async_trait]
impl<A: ConversationApi> ConversationApi for LoggingApi<A> {
    async fn history(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        let started = std::time::Instant::now();
        let result = self.inner.history(conversation_id).await;
        Self::record("history", started, &result);
        result
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        let started = std::time::Instant::now();
        let result = self.inner.send_message(conversation_id, content).await;
        Self::record("send_message", started, &result);
        result
    }

    async fn create_conversation(&self, title: &str) -> Result<ConversationRecord, ApiError> {
        let started = std::time::Instant::now();
        let result = self.inner.create_conversation(title).await;
        Self::record("create_conversation", started, &result);
        result
    }

    async fn list_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, ApiError> {
        let started = std::time::Instant::now();
        let result = self.inner.list_conversations(page, limit).await;
        Self::record("list_conversations", started, &result);
        result
    }
}
