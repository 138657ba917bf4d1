//! Chat runtime executor

use super::traits::{ConversationApi, StreamConnector};
use super::{Command, DispatchError, Inbound, ViewEvent, CONNECTION_LOST_TEXT};

use crate::api::{ApiError, MessageRecord};
use crate::session::{Activation, Session};
use crate::state_machine::{transition, Effect, StreamEvent};
use crate::transcript::{Message, TranscriptStore};
use crate::transport::{SignalKind, StreamSignal, Subscription};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Event loop owning the transcript and the session
///
/// Every mutation happens inside `handle`; network calls run in spawned
/// tasks and report back through the inbox.
pub struct ChatRuntime<A, C>
where
    A: ConversationApi + 'static,
    C: StreamConnector + 'static,
{
    api: Arc<A>,
    connector: Arc<C>,
    store: TranscriptStore,
    session: Session,
    /// Conversations with a send request on the wire
    in_flight: HashSet<String>,
    /// Bumped on every history fetch; older results are stale
    history_generation: u64,
    inbox_rx: mpsc::Receiver<Inbound>,
    /// Weak so that dropping every client lets the loop end
    inbox_tx: mpsc::WeakSender<Inbound>,
    views: broadcast::Sender<ViewEvent>,
}

impl<A, C> ChatRuntime<A, C>
where
    A: ConversationApi + 'static,
    C: StreamConnector + 'static,
{
    pub(crate) fn new(
        api: Arc<A>,
        connector: Arc<C>,
        inbox_rx: mpsc::Receiver<Inbound>,
        inbox_tx: &mpsc::Sender<Inbound>,
        views: broadcast::Sender<ViewEvent>,
    ) -> Self {
        Self {
            api,
            connector,
            store: TranscriptStore::new(),
            session: Session::new(),
            in_flight: HashSet::new(),
            history_generation: 0,
            inbox_rx,
            inbox_tx: inbox_tx.downgrade(),
            views,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Starting chat runtime");

        loop {
            tokio::select! {
                Some(inbound) = self.inbox_rx.recv() => {
                    if self.handle(inbound).is_break() {
                        break;
                    }
                }
                else => break,
            }
        }

        self.session.deactivate();
        tracing::info!("Chat runtime stopped");
    }

    fn handle(&mut self, inbound: Inbound) -> ControlFlow<()> {
        match inbound {
            Inbound::Command(command) => return self.handle_command(command),
            Inbound::Stream(signal) => self.handle_signal(signal),
            Inbound::SendCompleted {
                conversation_id,
                result,
                reply,
            } => self.handle_send_completed(&conversation_id, result, reply),
            Inbound::HistoryLoaded {
                conversation_id,
                generation,
                result,
            } => self.handle_history_loaded(&conversation_id, generation, result),
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Activate {
                conversation_id,
                reply,
            } => {
                match conversation_id {
                    Some(id) => self.activate(&id),
                    None => self.deactivate(),
                }
                let _ = reply.send(());
            }
            Command::Send {
                conversation_id,
                content,
                reply,
            } => self.dispatch(conversation_id, content, reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.store.view());
            }
            Command::Shutdown => {
                tracing::info!("Shutdown requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // ========================================================================
    // Session
    // ========================================================================

    fn activate(&mut self, conversation_id: &str) {
        let Some(inbox) = self.inbox_tx.upgrade() else {
            return;
        };

        let switching = self.session.active() != Some(conversation_id);
        if switching {
            tracing::info!(conv_id = %conversation_id, "Activating conversation");
        }
        self.store.begin_loading(conversation_id);

        let connector = Arc::clone(&self.connector);
        let stream_inbox = self.inbox_tx.clone();
        let activation = self.session.activate(conversation_id, move |id, conv| {
            Subscription::open(id, conv, connector, stream_inbox)
        });
        if activation == Activation::Unchanged {
            tracing::debug!(conv_id = %conversation_id, "Subscription already live");
        }

        self.fetch_history(conversation_id, inbox);
        self.broadcast(ViewEvent::Reset {
            view: self.store.view(),
        });
    }

    fn deactivate(&mut self) {
        tracing::info!("Deactivating conversation");
        self.session.deactivate();
        self.store.clear();
        // Invalidate any history fetch still on the wire
        self.history_generation += 1;
        self.broadcast(ViewEvent::Reset {
            view: self.store.view(),
        });
    }

    fn fetch_history(&mut self, conversation_id: &str, inbox: mpsc::Sender<Inbound>) {
        self.history_generation += 1;
        let generation = self.history_generation;
        let api = Arc::clone(&self.api);
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            let result = api.history(&conversation_id).await;
            let _ = inbox
                .send(Inbound::HistoryLoaded {
                    conversation_id,
                    generation,
                    result,
                })
                .await;
        });
    }

    fn handle_history_loaded(
        &mut self,
        conversation_id: &str,
        generation: u64,
        result: Result<Vec<MessageRecord>, ApiError>,
    ) {
        if generation != self.history_generation
            || self.store.conversation_id() != Some(conversation_id)
        {
            tracing::debug!(conv_id = %conversation_id, generation, "Discarding stale history");
            return;
        }

        match result {
            Ok(records) => {
                tracing::debug!(conv_id = %conversation_id, count = records.len(), "History loaded");
                self.store.load_history(conversation_id, records);
            }
            Err(e) => {
                self.store
                    .fail_history(conversation_id, format!("Failed to fetch messages: {e}"));
            }
        }
        self.broadcast(ViewEvent::Reset {
            view: self.store.view(),
        });
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch(
        &mut self,
        conversation_id: String,
        content: String,
        reply: oneshot::Sender<Result<Vec<Message>, DispatchError>>,
    ) {
        if content.trim().is_empty() {
            let _ = reply.send(Err(DispatchError::EmptyContent));
            return;
        }

        let pending_here =
            self.store.conversation_id() == Some(conversation_id.as_str()) && self.store.is_busy();
        if pending_here || self.in_flight.contains(&conversation_id) {
            tracing::debug!(conv_id = %conversation_id, "Send rejected, response in progress");
            let _ = reply.send(Err(DispatchError::Busy { conversation_id }));
            return;
        }

        let Some(inbox) = self.inbox_tx.upgrade() else {
            let _ = reply.send(Err(DispatchError::RuntimeStopped));
            return;
        };

        self.in_flight.insert(conversation_id.clone());
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            let result = api.send_message(&conversation_id, &content).await;
            let _ = inbox
                .send(Inbound::SendCompleted {
                    conversation_id,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn handle_send_completed(
        &mut self,
        conversation_id: &str,
        result: Result<Vec<MessageRecord>, ApiError>,
        reply: oneshot::Sender<Result<Vec<Message>, DispatchError>>,
    ) {
        self.in_flight.remove(conversation_id);

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                let _ = reply.send(Err(DispatchError::Api(e)));
                return;
            }
        };

        let messages: Vec<Message> = records.into_iter().map(Message::from_send).collect();
        let active = self.session.active() == Some(conversation_id)
            && self.store.conversation_id() == Some(conversation_id);

        if active {
            tracing::info!(conv_id = %conversation_id, count = messages.len(), "Message sent");
            self.store.append(messages.clone());
            self.broadcast(ViewEvent::Appended {
                messages: messages.clone(),
            });
            self.broadcast(ViewEvent::Activity {
                busy: self.store.is_busy(),
            });
        } else {
            tracing::debug!(conv_id = %conversation_id, "Conversation no longer active, send result not appended");
        }
        let _ = reply.send(Ok(messages));
    }

    // ========================================================================
    // Stream reconciliation
    // ========================================================================

    fn handle_signal(&mut self, signal: StreamSignal) {
        let StreamSignal { subscription, kind } = signal;
        if !self.session.is_current(subscription) {
            tracing::debug!(subscription = %subscription, "Discarding signal from stale subscription");
            return;
        }

        match kind {
            SignalKind::Frame(payload) => match StreamEvent::parse(&payload) {
                Some(event) => self.reconcile(event),
                None => tracing::debug!(subscription = %subscription, "Ignoring malformed frame"),
            },
            SignalKind::Closed(error) => {
                match &error {
                    Some(e) => tracing::warn!(subscription = %subscription, error = %e, "Stream failed"),
                    None => tracing::warn!(subscription = %subscription, "Stream closed by server"),
                }
                self.session.mark_dead(subscription);
                self.reconcile(StreamEvent::Failure(Some(CONNECTION_LOST_TEXT.to_string())));
            }
        }
    }

    /// Apply one event to the pending message, if any
    fn reconcile(&mut self, event: StreamEvent) {
        let Some(index) = self.store.pending_index() else {
            tracing::debug!(kind = event.kind(), "No pending message, event ignored");
            return;
        };
        let Some(phase) = self.store.message(index).map(|m| m.phase) else {
            return;
        };

        let kind = event.kind();
        let mut result = match transition(phase, event) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(kind, phase = phase.name(), reason = %e, "Event ignored");
                return;
            }
        };

        let effects = std::mem::take(&mut result.effects);
        let Some(message) = self.store.apply(index, result).cloned() else {
            return;
        };
        for effect in effects {
            self.execute_effect(effect, index, &message);
        }
    }

    fn execute_effect(&self, effect: Effect, index: usize, message: &Message) {
        match effect {
            Effect::NotifyUpdated => self.broadcast(ViewEvent::Updated {
                index,
                message: message.clone(),
            }),
            Effect::NotifySettled { failed } => {
                if failed {
                    tracing::warn!(message_id = %message.id, error = %message.content, "Message failed");
                } else {
                    tracing::info!(message_id = %message.id, chars = message.content.len(), "Message settled");
                }
                self.broadcast(ViewEvent::Activity {
                    busy: self.store.is_busy(),
                });
            }
        }
    }

    fn broadcast(&self, event: ViewEvent) {
        // No receivers is fine
        let _ = self.views.send(event);
    }
}
