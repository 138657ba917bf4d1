//! Ordered message transcript of the active conversation
//!
//! The store is mutated only through reconciliation: bulk resets from
//! history, all-or-nothing appends from a send, and transition results
//! applied to the pending message. Messages are never reordered.

use crate::api::MessageRecord;
use crate::state_machine::{Phase, TransitionResult};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in the transcript
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub phase: Phase,
    /// Progress notes, kept as received; read them through
    /// [`Message::visible_thoughts`]
    pub thoughts: Vec<String>,
    /// Attached visualization payload
    pub graphs: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Serialized form of a [`Message`]; only the visible trace goes out
#[derive(Serialize)]
struct MessageOut<'a> {
    id: &'a str,
    role: Role,
    content: &'a str,
    phase: Phase,
    thoughts: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    graphs: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MessageOut {
            id: &self.id,
            role: self.role,
            content: &self.content,
            phase: self.phase,
            thoughts: self.visible_thoughts(),
            graphs: self.graphs.as_ref(),
            created_at: self.created_at,
        }
        .serialize(serializer)
    }
}

impl Message {
    /// A record from history: already complete
    pub fn from_history(record: MessageRecord) -> Self {
        Self::from_record(record, Phase::Finalized)
    }

    /// A record returned by a send: the assistant record is the placeholder
    /// that stream events will fill in
    pub fn from_send(record: MessageRecord) -> Self {
        let phase = if record.is_bot {
            Phase::PendingThinking
        } else {
            Phase::Finalized
        };
        Self::from_record(record, phase)
    }

    fn from_record(record: MessageRecord, phase: Phase) -> Self {
        Self {
            id: record.id,
            role: if record.is_bot {
                Role::Assistant
            } else {
                Role::User
            },
            content: record.content,
            phase,
            thoughts: Vec::new(),
            graphs: record.graphs.filter(|g| !g.is_null()),
            created_at: record.created_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.phase.is_pending()
    }

    /// Thoughts to display: the trace while thinking, nothing otherwise
    pub fn visible_thoughts(&self) -> &[String] {
        if self.phase == Phase::PendingThinking {
            &self.thoughts
        } else {
            &[]
        }
    }

    fn apply(&mut self, result: TransitionResult) {
        self.phase = result.new_phase;
        result.content.apply_to(&mut self.content);
        result.thoughts.apply_to(&mut self.thoughts);
        if result.graphs.is_some() {
            self.graphs = result.graphs;
        }
    }
}

/// Read-only snapshot handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TranscriptView {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    /// True whenever a message is pending
    pub busy: bool,
    /// History fetch in flight
    pub loading: bool,
    /// Last history fetch failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct TranscriptStore {
    conversation_id: Option<String>,
    messages: Vec<Message>,
    /// Transcript length when the current history fetch started; later
    /// messages are not in its snapshot
    fetch_mark: usize,
    loading: bool,
    error: Option<String>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn is_busy(&self) -> bool {
        self.pending_index().is_some()
    }

    #[cfg(test)]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Index of the pending message, located by phase
    pub fn pending_index(&self) -> Option<usize> {
        self.messages.iter().rposition(Message::is_pending)
    }

    /// Drop everything; no conversation is active
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Switch to a conversation whose history has not arrived yet
    pub fn begin_loading(&mut self, conversation_id: &str) {
        if self.conversation_id.as_deref() != Some(conversation_id) {
            self.messages.clear();
            self.conversation_id = Some(conversation_id.to_string());
        }
        self.fetch_mark = self.messages.len();
        self.loading = true;
        self.error = None;
    }

    /// Replace the transcript with a history snapshot
    ///
    /// Local messages the snapshot cannot know about survive: the pending
    /// message and anything appended after the fetch started. They keep
    /// their local state when the snapshot has the same id and go after the
    /// snapshot otherwise, so a refresh never rewinds or drops them.
    pub fn load_history(&mut self, conversation_id: &str, records: Vec<MessageRecord>) {
        let local = self.take_local(conversation_id);
        let mut messages: Vec<Message> = records.into_iter().map(Message::from_history).collect();
        for message in local {
            match messages.iter_mut().find(|m| m.id == message.id) {
                Some(slot) => *slot = message,
                None => messages.push(message),
            }
        }
        self.finish_loading(conversation_id, messages, None);
    }

    /// History fetch failed: error flag set, only local messages the fetch
    /// could not cover remain
    pub fn fail_history(&mut self, conversation_id: &str, error: String) {
        let local = self.take_local(conversation_id);
        self.finish_loading(conversation_id, local, Some(error));
    }

    /// Messages to carry over a history reset of `conversation_id`
    fn take_local(&mut self, conversation_id: &str) -> Vec<Message> {
        if self.conversation_id.as_deref() != Some(conversation_id) {
            return Vec::new();
        }
        let mark = self.fetch_mark;
        std::mem::take(&mut self.messages)
            .into_iter()
            .enumerate()
            .filter(|(index, message)| *index >= mark || message.is_pending())
            .map(|(_, message)| message)
            .collect()
    }

    fn finish_loading(&mut self, conversation_id: &str, messages: Vec<Message>, error: Option<String>) {
        self.conversation_id = Some(conversation_id.to_string());
        self.fetch_mark = messages.len();
        self.messages = messages;
        self.loading = false;
        self.error = error;
    }

    /// Append the records created by one send, in the order returned
    pub fn append(&mut self, messages: Vec<Message>) {
        self.messages.extend(messages);
    }

    /// Apply a transition result to the message at `index`
    pub fn apply(&mut self, index: usize, result: TransitionResult) -> Option<&Message> {
        let message = self.messages.get_mut(index)?;
        message.apply(result);
        Some(message)
    }

    pub fn view(&self) -> TranscriptView {
        TranscriptView {
            conversation_id: self.conversation_id.clone(),
            messages: self.messages.clone(),
            busy: self.is_busy(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}
