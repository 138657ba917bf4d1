//! Active conversation and its push-channel subscription
//!
//! The session is owned by the runtime task; nothing else holds a
//! subscription, so "at most one live subscription" is structural.

use crate::transport::{Subscription, SubscriptionId};

/// What `activate` did to the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Already bound to the target and still alive
    Unchanged,
    /// A new subscription was opened (any previous one closed first)
    Opened(SubscriptionId),
}

#[derive(Debug)]
pub struct Session {
    active: Option<String>,
    subscription: Option<Subscription>,
    next_id: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            active: None,
            subscription: None,
            next_id: 1,
        }
    }

    /// The conversation currently active, if any
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.as_ref().map(Subscription::id)
    }

    /// Bind the session to `conversation_id`
    ///
    /// A subscription for another conversation is closed before `open` is
    /// called, so two never coexist. An already-bound live subscription is
    /// left alone.
    pub fn activate<F>(&mut self, conversation_id: &str, open: F) -> Activation
    where
        F: FnOnce(SubscriptionId, &str) -> Subscription,
    {
        self.active = Some(conversation_id.to_string());

        if let Some(existing) = &self.subscription {
            if existing.conversation_id() == conversation_id {
                return Activation::Unchanged;
            }
        }
        if let Some(previous) = self.subscription.take() {
            previous.close();
        }

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscription = Some(open(id, conversation_id));
        Activation::Opened(id)
    }

    /// Close the subscription and forget the active conversation
    pub fn deactivate(&mut self) {
        self.active = None;
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
    }

    /// Whether signals tagged with `id` belong to the live subscription
    pub fn is_current(&self, id: SubscriptionId) -> bool {
        self.subscription_id() == Some(id)
    }

    /// Forget a subscription whose stream has ended
    ///
    /// Returns false when `id` is not the live subscription. The active
    /// conversation is kept, so the next activation reopens the stream.
    pub fn mark_dead(&mut self, id: SubscriptionId) -> bool {
        if !self.is_current(id) {
            return false;
        }
        self.subscription = None;
        true
    }
}
