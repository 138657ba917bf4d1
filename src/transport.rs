//! Push-channel transport
//!
//! One [`Subscription`] binds one conversation to one streaming connection.
//! Its pump task forwards every payload, tagged with the subscription id,
//! into the runtime inbox so that all mutation stays on the event loop. The
//! pump only holds a weak inbox sender and stops once the runtime is gone.

mod websocket;

pub use websocket::WebSocketConnector;

use crate::runtime::StreamConnector;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Raw text payloads from one connection, in delivery order
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid stream address: {0}")]
    Address(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Receive failed: {0}")]
    Receive(String),
}

/// Identity of one opened subscription; never reused within a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscription reports to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSignal {
    pub subscription: SubscriptionId,
    pub kind: SignalKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    Frame(String),
    /// The connection ended; `None` for a clean close
    Closed(Option<TransportError>),
}

/// Live binding of a conversation to a streaming connection
///
/// Dropping (or closing) the subscription cancels its pump. Closing while
/// the connect is still in flight is fine: the pump notices and exits.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    conversation_id: String,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn open<C, M>(
        id: SubscriptionId,
        conversation_id: &str,
        connector: Arc<C>,
        inbox: mpsc::WeakSender<M>,
    ) -> Self
    where
        C: StreamConnector + ?Sized + 'static,
        M: From<StreamSignal> + Send + 'static,
    {
        tracing::info!(conv_id = %conversation_id, subscription = %id, "Opening subscription");
        let cancel = CancellationToken::new();
        tokio::spawn(pump(
            id,
            conversation_id.to_string(),
            connector,
            inbox,
            cancel.clone(),
        ));
        Self {
            id,
            conversation_id: conversation_id.to_string(),
            cancel,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn close(self) {
        tracing::info!(conv_id = %self.conversation_id, subscription = %self.id, "Closing subscription");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump<C, M>(
    id: SubscriptionId,
    conversation_id: String,
    connector: Arc<C>,
    inbox: mpsc::WeakSender<M>,
    cancel: CancellationToken,
) where
    C: StreamConnector + ?Sized,
    M: From<StreamSignal>,
{
    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!(subscription = %id, "Subscription closed before connecting");
            return;
        }
        result = connector.connect(&conversation_id) => result,
    };

    let mut frames = match connected {
        Ok(frames) => frames,
        Err(e) => {
            tracing::warn!(conv_id = %conversation_id, subscription = %id, error = %e, "Stream connect failed");
            deliver(&inbox, signal(id, SignalKind::Closed(Some(e)))).await;
            return;
        }
    };
    tracing::info!(conv_id = %conversation_id, subscription = %id, "Subscription connected");

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = frames.next() => item,
        };
        let kind = match item {
            Some(Ok(payload)) => SignalKind::Frame(payload),
            Some(Err(e)) => SignalKind::Closed(Some(e)),
            None => SignalKind::Closed(None),
        };
        let closed = matches!(kind, SignalKind::Closed(_));
        if !deliver(&inbox, signal(id, kind)).await || closed {
            break;
        }
    }
    tracing::debug!(subscription = %id, "Subscription pump stopped");
}

fn signal<M: From<StreamSignal>>(subscription: SubscriptionId, kind: SignalKind) -> M {
    M::from(StreamSignal { subscription, kind })
}

/// False once the inbox is gone
async fn deliver<M>(inbox: &mpsc::WeakSender<M>, message: M) -> bool {
    match inbox.upgrade() {
        Some(inbox) => inbox.send(message).await.is_ok(),
        None => false,
    }
}
