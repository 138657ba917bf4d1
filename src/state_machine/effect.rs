//! Effects produced by state transitions

/// Effects to be executed by the runtime after a transition is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The pending message changed; push it to observers
    NotifyUpdated,

    /// The pending message reached a terminal phase
    NotifySettled { failed: bool },
}

impl Effect {
    pub fn settled() -> Self {
        Effect::NotifySettled { failed: false }
    }

    pub fn failed() -> Self {
        Effect::NotifySettled { failed: true }
    }
}
