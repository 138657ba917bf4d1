//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{ChatClient, ViewEvent};
use crate::api::{ApiError, ConversationRecord, MessageRecord};
use crate::transcript::TranscriptView;
use crate::transport::{FrameStream, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

// ============================================================================
// Mock conversation API
// ============================================================================

/// In-memory backend: histories per conversation, queued send outcomes
pub struct MockApi {
    histories: Mutex<HashMap<String, Vec<MessageRecord>>>,
    history_failures: Mutex<HashMap<String, ApiError>>,
    history_calls: Mutex<HashMap<String, usize>>,
    send_results: Mutex<VecDeque<Result<Vec<MessageRecord>, ApiError>>>,
    conversations: Mutex<Vec<ConversationRecord>>,
    /// Record of all sends made as (conversation, content)
    pub sends: Mutex<Vec<(String, String)>>,
    next_id: Mutex<u64>,
    held: watch::Sender<bool>,
    history_held: watch::Sender<bool>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            histories: Mutex::new(HashMap::new()),
            history_failures: Mutex::new(HashMap::new()),
            history_calls: Mutex::new(HashMap::new()),
            send_results: Mutex::new(VecDeque::new()),
            conversations: Mutex::new(Vec::new()),
            sends: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            held: watch::Sender::new(false),
            history_held: watch::Sender::new(false),
        }
    }

    pub fn with_history(self, conversation_id: &str, records: Vec<MessageRecord>) -> Self {
        self.set_history(conversation_id, records);
        self
    }

    pub fn with_conversation(self, id: &str, title: &str) -> Self {
        self.conversations.lock().unwrap().push(ConversationRecord {
            id: id.to_string(),
            title: Some(title.to_string()),
            created_at: None,
        });
        self
    }

    pub fn set_history(&self, conversation_id: &str, records: Vec<MessageRecord>) {
        self.histories
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), records);
    }

    /// Every history fetch for `conversation_id` fails until cleared
    pub fn fail_history(&self, conversation_id: &str, error: ApiError) {
        self.history_failures
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), error);
    }

    pub fn history_calls(&self, conversation_id: &str) -> usize {
        self.history_calls
            .lock()
            .unwrap()
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }

    /// Queue the outcome of the next send; unqueued sends succeed with a
    /// user record and an empty assistant placeholder
    pub fn queue_send(&self, result: Result<Vec<MessageRecord>, ApiError>) {
        self.send_results.lock().unwrap().push_back(result);
    }

    /// Park sends (and history fetches) until `release` is called
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Park only history fetches, so sends can overtake them
    pub fn hold_history(&self) {
        self.history_held.send_replace(true);
    }

    pub fn release_history(&self) {
        self.history_held.send_replace(false);
    }

    pub fn recorded_sends(&self) -> Vec<(String, String)> {
        self.sends.lock().unwrap().clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{prefix}-{next}")
    }

    async fn wait_until_released(&self) {
        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;
    }

    async fn wait_until_history_released(&self) {
        let mut held = self.history_held.subscribe();
        let _ = held.wait_for(|held| !*held).await;
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

pub fn user_record(id: &str, content: &str) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        content: content.to_string(),
        is_bot: false,
        graphs: None,
        created_at: None,
        thread_id: None,
    }
}

pub fn bot_record(id: &str, content: &str) -> MessageRecord {
    MessageRecord {
        is_bot: true,
        ..user_record(id, content)
    }
}

#[async_trait]
impl ConversationApi for MockApi {
    async fn history(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        *self
            .history_calls
            .lock()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default() += 1;
        self.wait_until_history_released().await;
        self.wait_until_released().await;

        if let Some(error) = self.history_failures.lock().unwrap().get(conversation_id) {
            return Err(error.clone());
        }
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Vec<MessageRecord>, ApiError> {
        self.sends
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), content.to_string()));
        self.wait_until_released().await;

        let queued = self.send_results.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(vec![
                user_record(&self.next_id("user"), content),
                bot_record(&self.next_id("bot"), ""),
            ])
        })
    }

    async fn create_conversation(&self, title: &str) -> Result<ConversationRecord, ApiError> {
        let record = ConversationRecord {
            id: self.next_id("conv"),
            title: Some(title.to_string()),
            created_at: None,
        };
        self.conversations.lock().unwrap().insert(0, record.clone());
        Ok(record)
    }

    async fn list_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, ApiError> {
        let skip = (page as usize) * (limit as usize);
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .skip(skip)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Mock stream connector
// ============================================================================

type FrameSender = mpsc::UnboundedSender<Result<String, TransportError>>;

/// Connector whose streams are fed by the test
///
/// Each successful connect creates a channel; `push` and `disconnect` act on
/// the most recent connection for a conversation.
pub struct MockConnector {
    connections: Mutex<HashMap<String, Vec<FrameSender>>>,
    failures: Mutex<VecDeque<TransportError>>,
    held: watch::Sender<bool>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            held: watch::Sender::new(false),
        }
    }

    pub fn fail_next_connect(&self, error: TransportError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Park connects until `release_connects` is called
    pub fn hold_connects(&self) {
        self.held.send_replace(true);
    }

    pub fn release_connects(&self) {
        self.held.send_replace(false);
    }

    pub fn connection_count(&self, conversation_id: &str) -> usize {
        self.connections
            .lock()
            .unwrap()
            .get(conversation_id)
            .map_or(0, Vec::len)
    }

    fn latest(&self, conversation_id: &str) -> Option<FrameSender> {
        self.connections
            .lock()
            .unwrap()
            .get(conversation_id)
            .and_then(|senders| senders.last().cloned())
    }

    /// Deliver a raw payload on the latest connection
    pub fn push(&self, conversation_id: &str, payload: &str) {
        if let Some(sender) = self.latest(conversation_id) {
            let _ = sender.send(Ok(payload.to_string()));
        }
    }

    /// Deliver a read error on the latest connection
    pub fn push_error(&self, conversation_id: &str, error: TransportError) {
        if let Some(sender) = self.latest(conversation_id) {
            let _ = sender.send(Err(error));
        }
    }

    /// End every connection for the conversation cleanly
    pub fn disconnect(&self, conversation_id: &str) {
        self.connections.lock().unwrap().remove(conversation_id);
    }

    pub async fn wait_for_connections(
        &self,
        conversation_id: &str,
        count: usize,
        timeout: Duration,
    ) -> bool {
        poll_until(timeout, || self.connection_count(conversation_id) >= count).await
    }

    /// Wait until the consumer of the latest connection has gone away
    pub async fn wait_for_closed(&self, conversation_id: &str, timeout: Duration) -> bool {
        poll_until(timeout, || {
            self.latest(conversation_id)
                .map_or(true, |sender| sender.is_closed())
        })
        .await
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(&self, conversation_id: &str) -> Result<FrameStream, TransportError> {
        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default()
            .push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

async fn poll_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ============================================================================
// Test Runtime Helper
// ============================================================================

/// A spawned runtime over mock collaborators
pub struct TestRuntime {
    pub client: ChatClient<Arc<MockApi>>,
    pub api: Arc<MockApi>,
    pub connector: Arc<MockConnector>,
    pub views: broadcast::Receiver<ViewEvent>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::with_api(MockApi::new())
    }

    pub fn with_api(api: MockApi) -> Self {
        let api = Arc::new(api);
        let connector = Arc::new(MockConnector::new());
        let client = ChatClient::spawn(Arc::clone(&api), Arc::clone(&connector));
        let views = client.subscribe();
        Self {
            client,
            api,
            connector,
            views,
        }
    }

    pub async fn view(&self) -> TranscriptView {
        self.client.snapshot().await.unwrap()
    }

    /// Poll snapshots until `predicate` holds
    pub async fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl Fn(&TranscriptView) -> bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.view().await) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Activate and wait for both the stream connection and the history load
    pub async fn open(&self, conversation_id: &str) {
        let before = self.connector.connection_count(conversation_id);
        self.client.activate(Some(conversation_id)).await.unwrap();
        assert!(
            self.connector
                .wait_for_connections(conversation_id, before.max(1), Duration::from_secs(2))
                .await
        );
        assert!(self.wait_for(Duration::from_secs(2), |v| !v.loading).await);
    }

    /// Push a frame and wait until the runtime has applied it
    pub async fn push_and_settle(&self, conversation_id: &str, payload: &str) {
        self.connector.push(conversation_id, payload);
        self.settle().await;
    }

    /// Round-trip a snapshot after a short pause so queued signals drain
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = self.view().await;
    }

    /// Wait for a view event matching `predicate`
    pub async fn wait_for_event(
        &mut self,
        timeout: Duration,
        predicate: impl Fn(&ViewEvent) -> bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.views.recv()).await {
                Ok(Ok(event)) if predicate(&event) => return true,
                _ => continue,
            }
        }
        false
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClientError, DispatchError, Inbound, CONNECTION_LOST_TEXT};
    use crate::state_machine::transition::DEFAULT_FAILURE_TEXT;
    use crate::state_machine::Phase;
    use crate::transcript::Role;
    use crate::transport::{SignalKind, StreamSignal, SubscriptionId};

    const WAIT: Duration = Duration::from_secs(2);

    fn frame(kind: &str, content: &str) -> String {
        serde_json::json!({ "type": kind, "content": content }).to_string()
    }

    #[tokio::test]
    async fn test_mock_api_default_send() {
        let api = MockApi::new();
        let records = api.send_message("c1", "Hi").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_bot);
        assert!(records[1].is_bot);
        assert_eq!(api.recorded_sends(), vec![("c1".to_string(), "Hi".to_string())]);
    }

    #[tokio::test]
    async fn test_mock_api_list_pages_from_zero() {
        let api = MockApi::new()
            .with_conversation("a", "A")
            .with_conversation("b", "B")
            .with_conversation("c", "C");
        let first = api.list_conversations(0, 2).await.unwrap();
        assert_eq!(first.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        let second = api.list_conversations(1, 2).await.unwrap();
        assert_eq!(second.len(), 1);
    }

    /// Send, then stream thoughts and content to completion
    #[tokio::test]
    async fn test_send_then_stream_to_completion() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;

        let messages = rt.client.send("conv-a", "Hello").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].phase, Phase::PendingThinking);

        let view = rt.view().await;
        assert_eq!(view.messages.len(), 2);
        assert!(view.busy);

        rt.push_and_settle("conv-a", &frame("status", "Looking up context")).await;
        rt.push_and_settle("conv-a", &frame("status", "Drafting")).await;
        let view = rt.view().await;
        assert_eq!(view.messages[1].visible_thoughts(), ["Looking up context", "Drafting"]);
        assert_eq!(view.messages[1].content, "");

        rt.connector.push("conv-a", &frame("message_start", "The answer is"));
        rt.connector.push("conv-a", &frame("message_start", " 42."));
        rt.connector.push("conv-a", r#"{"type":"message_end"}"#);

        assert!(rt.wait_for(WAIT, |v| !v.busy).await);
        let view = rt.view().await;
        let answer = &view.messages[1];
        assert_eq!(answer.phase, Phase::Finalized);
        assert_eq!(answer.content, "The answer is 42.");
        assert!(answer.thoughts.is_empty());
    }

    #[tokio::test]
    async fn test_error_event_while_thinking() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Hello").await.unwrap();

        rt.connector.push("conv-a", &frame("error", "timeout"));
        assert!(rt.wait_for(WAIT, |v| !v.busy).await);

        let view = rt.view().await;
        assert_eq!(view.messages[1].phase, Phase::FinalizedError);
        assert_eq!(view.messages[1].content, "timeout");
    }

    #[tokio::test]
    async fn test_error_event_without_text_uses_default() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Hello").await.unwrap();

        rt.connector.push("conv-a", r#"{"type":"error","content":""}"#);
        assert!(rt.wait_for(WAIT, |v| !v.busy).await);
        assert_eq!(rt.view().await.messages[1].content, DEFAULT_FAILURE_TEXT);
    }

    #[tokio::test]
    async fn test_aggregate_message_frame_finalizes() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Chart please").await.unwrap();

        rt.connector.push(
            "conv-a",
            r#"{"type":"message","content":"short","full_respoinse":"Full answer","graphs":[{"id":"g1"}]}"#,
        );
        assert!(rt.wait_for(WAIT, |v| !v.busy).await);
        let answer = rt.view().await.messages[1].clone();
        assert_eq!(answer.content, "Full answer");
        assert_eq!(answer.graphs, Some(serde_json::json!([{"id": "g1"}])));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_ignored() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Hello").await.unwrap();

        rt.push_and_settle("conv-a", "not json").await;
        rt.push_and_settle("conv-a", r#"{"type":"heartbeat"}"#).await;
        rt.push_and_settle("conv-a", r#"{"type":"status","content":42}"#).await;

        let view = rt.view().await;
        assert_eq!(view.messages[1].phase, Phase::PendingThinking);
        assert!(view.messages[1].thoughts.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_message_ignores_later_events() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Hello").await.unwrap();

        rt.connector.push("conv-a", &frame("message_start", "Done"));
        rt.connector.push("conv-a", r#"{"type":"message_end"}"#);
        assert!(rt.wait_for(WAIT, |v| !v.busy).await);

        rt.push_and_settle("conv-a", &frame("message_start", " more")).await;
        rt.push_and_settle("conv-a", &frame("error", "late")).await;
        let answer = rt.view().await.messages[1].clone();
        assert_eq!(answer.phase, Phase::Finalized);
        assert_eq!(answer.content, "Done");
    }

    /// Switching conversations drops the old stream; strays are discarded
    #[tokio::test]
    async fn test_switch_discards_stray_events() {
        let api = MockApi::new().with_history("conv-b", vec![user_record("b-u1", "Hi from B")]);
        let rt = TestRuntime::with_api(api);
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Hello").await.unwrap();

        rt.open("conv-b").await;
        assert!(rt.connector.wait_for_closed("conv-a", WAIT).await);

        // A frame still in flight from A's subscription
        rt.client
            .inbox
            .send(Inbound::Stream(StreamSignal {
                subscription: SubscriptionId(1),
                kind: SignalKind::Frame(frame("message_start", "stray")),
            }))
            .await
            .unwrap();
        rt.connector.push("conv-a", &frame("message_start", "late"));
        rt.settle().await;

        let view = rt.view().await;
        assert_eq!(view.conversation_id.as_deref(), Some("conv-b"));
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].content, "Hi from B");
        assert!(!view.busy);
        assert_eq!(rt.connector.connection_count("conv-b"), 1);
    }

    #[tokio::test]
    async fn test_reactivating_same_conversation_keeps_subscription() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.activate(Some("conv-a")).await.unwrap();
        assert!(rt.wait_for(WAIT, |v| !v.loading).await);

        assert_eq!(rt.connector.connection_count("conv-a"), 1);
        assert_eq!(rt.api.history_calls("conv-a"), 2);
    }

    #[tokio::test]
    async fn test_history_refresh_keeps_streaming_message() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        let messages = rt.client.send("conv-a", "Hello").await.unwrap();
        rt.push_and_settle("conv-a", &frame("message_start", "Partial")).await;

        // Server persisted the placeholder with empty content
        rt.api.set_history(
            "conv-a",
            vec![
                user_record(&messages[0].id, "Hello"),
                bot_record(&messages[1].id, ""),
            ],
        );
        rt.client.activate(Some("conv-a")).await.unwrap();
        assert!(rt.wait_for(WAIT, |v| !v.loading).await);

        let answer = rt.view().await.messages[1].clone();
        assert_eq!(answer.phase, Phase::PendingStreaming);
        assert_eq!(answer.content, "Partial");
    }

    #[tokio::test]
    async fn test_deactivate_clears_everything() {
        let api = MockApi::new().with_history("conv-a", vec![user_record("u1", "Hi")]);
        let rt = TestRuntime::with_api(api);
        rt.open("conv-a").await;

        rt.client.activate(None).await.unwrap();
        assert!(rt.connector.wait_for_closed("conv-a", WAIT).await);
        assert_eq!(rt.view().await, TranscriptView::default());
    }

    #[tokio::test]
    async fn test_send_failure_leaves_transcript_untouched() {
        let api = MockApi::new().with_history("conv-a", vec![user_record("u1", "Hi")]);
        let rt = TestRuntime::with_api(api);
        rt.open("conv-a").await;
        rt.api.queue_send(Err(ApiError::server_error("Internal Server Error")));

        let err = rt.client.send("conv-a", "Hello").await.unwrap_err();
        assert!(matches!(err, DispatchError::Api(_)));

        let view = rt.view().await;
        assert_eq!(view.messages.len(), 1);
        assert!(!view.busy);

        // A failed send does not leave the conversation busy
        rt.client.send("conv-a", "Again").await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_content_rejected_without_request() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        let err = rt.client.send("conv-a", "   \n").await.unwrap_err();
        assert!(matches!(err, DispatchError::EmptyContent));
        assert!(rt.api.recorded_sends().is_empty());
    }

    #[tokio::test]
    async fn test_second_send_while_pending_is_busy() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "First").await.unwrap();

        let err = rt.client.send("conv-a", "Second").await.unwrap_err();
        assert!(matches!(err, DispatchError::Busy { ref conversation_id } if conversation_id == "conv-a"));
        assert_eq!(rt.api.recorded_sends().len(), 1);
    }

    #[tokio::test]
    async fn test_send_while_request_in_flight_is_busy() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.api.hold();

        let client = rt.client.clone();
        let first = tokio::spawn(async move { client.send("conv-a", "First").await });
        assert!(poll_until(WAIT, || rt.api.recorded_sends().len() == 1).await);

        let err = rt.client.send("conv-a", "Second").await.unwrap_err();
        assert!(matches!(err, DispatchError::Busy { .. }));

        rt.api.release();
        assert_eq!(first.await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_send_completing_after_switch_is_not_appended() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.api.hold();

        let client = rt.client.clone();
        let pending = tokio::spawn(async move { client.send("conv-a", "Hello").await });
        assert!(poll_until(WAIT, || rt.api.recorded_sends().len() == 1).await);

        rt.client.activate(Some("conv-b")).await.unwrap();
        rt.api.release();

        let returned = pending.await.unwrap().unwrap();
        assert_eq!(returned.len(), 2);
        assert!(rt.wait_for(WAIT, |v| !v.loading).await);
        let view = rt.view().await;
        assert_eq!(view.conversation_id.as_deref(), Some("conv-b"));
        assert!(view.messages.is_empty());
    }

    #[tokio::test]
    async fn test_history_failure_sets_error_flag() {
        let api = MockApi::new();
        api.fail_history("conv-a", ApiError::network("connection refused"));
        let rt = TestRuntime::with_api(api);
        rt.open("conv-a").await;

        let view = rt.view().await;
        assert!(view.messages.is_empty());
        assert!(view.error.as_deref().is_some_and(|e| e.contains("connection refused")));
        // The subscription is unaffected
        assert_eq!(rt.connector.connection_count("conv-a"), 1);
    }

    #[tokio::test]
    async fn test_stale_history_is_dropped() {
        let api = MockApi::new()
            .with_history("conv-a", vec![user_record("a1", "from A")])
            .with_history("conv-b", vec![user_record("b1", "from B")]);
        let rt = TestRuntime::with_api(api);
        rt.api.hold();

        rt.client.activate(Some("conv-a")).await.unwrap();
        rt.client.activate(Some("conv-b")).await.unwrap();
        rt.api.release();

        assert!(rt.wait_for(WAIT, |v| !v.loading).await);
        rt.settle().await;
        let view = rt.view().await;
        assert_eq!(view.conversation_id.as_deref(), Some("conv-b"));
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].content, "from B");
    }

    #[tokio::test]
    async fn test_transport_drop_fails_pending_message() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Hello").await.unwrap();
        rt.push_and_settle("conv-a", &frame("message_start", "Half")).await;

        rt.connector.disconnect("conv-a");
        assert!(rt.wait_for(WAIT, |v| !v.busy).await);

        let answer = rt.view().await.messages[1].clone();
        assert_eq!(answer.phase, Phase::FinalizedError);
        assert_eq!(answer.content, CONNECTION_LOST_TEXT);

        // Reselecting reopens the stream
        rt.client.activate(Some("conv-a")).await.unwrap();
        assert!(rt.connector.wait_for_connections("conv-a", 1, WAIT).await);
    }

    #[tokio::test]
    async fn test_receive_error_fails_pending_message() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Hello").await.unwrap();

        rt.connector
            .push_error("conv-a", TransportError::Receive("reset by peer".into()));
        assert!(rt.wait_for(WAIT, |v| !v.busy).await);
        assert_eq!(rt.view().await.messages[1].content, CONNECTION_LOST_TEXT);
    }

    #[tokio::test]
    async fn test_connect_failure_with_nothing_pending_is_quiet() {
        let rt = TestRuntime::new();
        rt.connector
            .fail_next_connect(TransportError::Connect("refused".into()));
        rt.client.activate(Some("conv-a")).await.unwrap();
        assert!(rt.wait_for(WAIT, |v| !v.loading).await);
        rt.settle().await;

        let view = rt.view().await;
        assert!(view.messages.is_empty());
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn test_view_events_follow_the_stream() {
        let mut rt = TestRuntime::new();
        rt.open("conv-a").await;
        rt.client.send("conv-a", "Hello").await.unwrap();
        assert!(
            rt.wait_for_event(WAIT, |e| matches!(e, ViewEvent::Appended { messages } if messages.len() == 2))
                .await
        );

        rt.connector.push("conv-a", &frame("message_start", "Hi"));
        assert!(
            rt.wait_for_event(WAIT, |e| matches!(e, ViewEvent::Updated { index: 1, message } if message.content == "Hi"))
                .await
        );

        rt.connector.push("conv-a", r#"{"type":"message_end"}"#);
        assert!(
            rt.wait_for_event(WAIT, |e| matches!(e, ViewEvent::Activity { busy: false }))
                .await
        );
    }

    #[tokio::test]
    async fn test_start_conversation_creates_activates_and_sends() {
        let rt = TestRuntime::new();
        let started = rt
            .client
            .start_conversation("What were last quarter's top selling products?")
            .await
            .unwrap();

        assert_eq!(started.conversation.title.as_deref(), Some("What were last quarter's top s"));
        assert_eq!(started.messages.len(), 2);
        assert!(rt.connector.wait_for_connections(&started.conversation.id, 1, WAIT).await);

        let view = rt.view().await;
        assert_eq!(view.conversation_id.as_deref(), Some(started.conversation.id.as_str()));
        let listed = rt.client.list_conversations(0, 20).await.unwrap();
        assert_eq!(listed[0].id, started.conversation.id);
    }

    #[tokio::test]
    async fn test_history_answering_after_first_send_keeps_the_answer() {
        let rt = TestRuntime::new();
        rt.api.hold_history();

        let started = rt.client.start_conversation("Hello").await.unwrap();
        let conv = started.conversation.id.clone();
        assert!(rt.connector.wait_for_connections(&conv, 1, WAIT).await);
        assert_eq!(rt.view().await.messages.len(), 2);

        // The snapshot predates the send
        rt.api.release_history();
        assert!(rt.wait_for(WAIT, |v| !v.loading).await);
        let view = rt.view().await;
        assert_eq!(view.messages.len(), 2);
        assert!(view.busy);

        rt.push_and_settle(&conv, &frame("message_start", "Hi there")).await;
        rt.push_and_settle(&conv, r#"{"type":"message_end"}"#).await;
        let view = rt.view().await;
        assert_eq!(view.messages[0].content, "Hello");
        assert_eq!(view.messages[1].content, "Hi there");
        assert_eq!(view.messages[1].phase, Phase::Finalized);
        assert!(!view.busy);
    }

    #[tokio::test]
    async fn test_dropping_every_client_stops_the_runtime() {
        let rt = TestRuntime::new();
        rt.open("conv-a").await;

        let TestRuntime {
            client, connector, ..
        } = rt;
        drop(client);
        // The runtime closes its subscription on the way out
        assert!(connector.wait_for_closed("conv-a", WAIT).await);
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_fail() {
        let rt = TestRuntime::new();
        rt.client.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            rt.client.activate(Some("conv-a")).await,
            Err(ClientError::RuntimeStopped)
        ));
        assert!(matches!(
            rt.client.send("conv-a", "Hello").await,
            Err(DispatchError::RuntimeStopped)
        ));
    }
}
