//! Runtime for keeping a live conversation view
//!
//! A single task owns the transcript and the session and drains one inbox
//! carrying client commands, stream signals and I/O completions. The
//! [`ChatClient`] handle is the only way in.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ChatRuntime;
pub use traits::*;

use crate::api::{ApiError, ConversationRecord, HttpApi, MessageRecord};
use crate::transcript::{Message, TranscriptView};
use crate::transport::StreamSignal;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Client wired to the real backend
pub type ProductionClient = ChatClient<LoggingApi<HttpApi>>;

/// Failure text written into the pending message when its stream drops
pub const CONNECTION_LOST_TEXT: &str = "Connection to the server was lost.";

/// Title used when a conversation is started from an empty first message
pub const DEFAULT_TITLE: &str = "New Chat";

const TITLE_CHARS: usize = 30;
const INBOX_CAPACITY: usize = 64;
const VIEW_CAPACITY: usize = 256;

/// Updates pushed to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// The whole transcript changed (activation, history load, clear)
    Reset { view: TranscriptView },
    /// Messages created by a send, in order
    Appended { messages: Vec<Message> },
    /// The message at `index` changed
    Updated { index: usize, message: Message },
    /// Whether a message is pending
    Activity { busy: bool },
}

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Message content is empty")]
    EmptyContent,
    #[error("Conversation {conversation_id} already has a response in progress")]
    Busy { conversation_id: String },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Chat runtime has stopped")]
    RuntimeStopped,
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Chat runtime has stopped")]
    RuntimeStopped,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Everything the runtime loop consumes
#[derive(Debug)]
pub(crate) enum Inbound {
    Command(Command),
    Stream(StreamSignal),
    SendCompleted {
        conversation_id: String,
        result: Result<Vec<MessageRecord>, ApiError>,
        reply: oneshot::Sender<Result<Vec<Message>, DispatchError>>,
    },
    HistoryLoaded {
        conversation_id: String,
        generation: u64,
        result: Result<Vec<MessageRecord>, ApiError>,
    },
}

impl From<StreamSignal> for Inbound {
    fn from(signal: StreamSignal) -> Self {
        Inbound::Stream(signal)
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Activate {
        conversation_id: Option<String>,
        reply: oneshot::Sender<()>,
    },
    Send {
        conversation_id: String,
        content: String,
        reply: oneshot::Sender<Result<Vec<Message>, DispatchError>>,
    },
    Snapshot {
        reply: oneshot::Sender<TranscriptView>,
    },
    Shutdown,
}

/// A conversation created by [`ChatClient::start_conversation`] and the
/// messages its first send produced
#[derive(Debug, Clone)]
pub struct StartedConversation {
    pub conversation: ConversationRecord,
    pub messages: Vec<Message>,
}

/// Handle to a running [`ChatRuntime`]
pub struct ChatClient<A> {
    inbox: mpsc::Sender<Inbound>,
    views: broadcast::Sender<ViewEvent>,
    api: Arc<A>,
}

impl<A> Clone for ChatClient<A> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
            views: self.views.clone(),
            api: Arc::clone(&self.api),
        }
    }
}

impl<A: ConversationApi + 'static> ChatClient<A> {
    /// Start a runtime on the current tokio runtime and return its handle
    pub fn spawn<C: StreamConnector + 'static>(api: A, connector: C) -> Self {
        let api = Arc::new(api);
        let (inbox, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (views, _) = broadcast::channel(VIEW_CAPACITY);

        let runtime = ChatRuntime::new(
            Arc::clone(&api),
            Arc::new(connector),
            inbox_rx,
            &inbox,
            views.clone(),
        );
        tokio::spawn(runtime.run());

        Self { inbox, views, api }
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.inbox
            .send(Inbound::Command(command))
            .await
            .map_err(|_| ClientError::RuntimeStopped)
    }

    /// Make `conversation_id` the active conversation, or clear everything
    /// with `None`
    ///
    /// Returns once the subscription has been switched; history arrives
    /// later as a [`ViewEvent::Reset`].
    pub async fn activate(&self, conversation_id: Option<&str>) -> Result<(), ClientError> {
        let (reply, done) = oneshot::channel();
        self.command(Command::Activate {
            conversation_id: conversation_id.map(ToString::to_string),
            reply,
        })
        .await?;
        done.await.map_err(|_| ClientError::RuntimeStopped)
    }

    /// Submit a user message
    ///
    /// On success the returned messages (user first, then the pending
    /// assistant placeholder) have been appended to the transcript if the
    /// conversation is still active.
    pub async fn send(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Vec<Message>, DispatchError> {
        if content.trim().is_empty() {
            return Err(DispatchError::EmptyContent);
        }
        let (reply, done) = oneshot::channel();
        self.command(Command::Send {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            reply,
        })
        .await
        .map_err(|_| DispatchError::RuntimeStopped)?;
        done.await.map_err(|_| DispatchError::RuntimeStopped)?
    }

    /// Create a conversation named after the message, activate it, then send
    pub async fn start_conversation(
        &self,
        content: &str,
    ) -> Result<StartedConversation, ClientError> {
        if content.trim().is_empty() {
            return Err(DispatchError::EmptyContent.into());
        }
        let conversation = self.create_conversation(&title_for(content)).await?;
        self.activate(Some(&conversation.id)).await?;
        let messages = self.send(&conversation.id, content).await?;
        Ok(StartedConversation {
            conversation,
            messages,
        })
    }

    pub async fn snapshot(&self) -> Result<TranscriptView, ClientError> {
        let (reply, done) = oneshot::channel();
        self.command(Command::Snapshot { reply }).await?;
        done.await.map_err(|_| ClientError::RuntimeStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.views.subscribe()
    }

    pub async fn list_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, ApiError> {
        self.api.list_conversations(page, limit).await
    }

    pub async fn create_conversation(&self, title: &str) -> Result<ConversationRecord, ApiError> {
        self.api.create_conversation(title).await
    }

    /// Stop the runtime; the subscription is closed on the way out
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.command(Command::Shutdown).await
    }
}

/// First characters of the message, or the default title when empty
fn title_for(content: &str) -> String {
    let title: String = content.chars().take(TITLE_CHARS).collect();
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title
    }
}
