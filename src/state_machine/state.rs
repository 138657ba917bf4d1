//! Per-message lifecycle phase

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a message
///
/// Phases only move forward: thinking → streaming → finalized, or any
/// pending phase → finalized-error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Placeholder awaiting its first content; narrates progress
    PendingThinking,
    /// Content is arriving incrementally
    PendingStreaming,
    /// Complete
    Finalized,
    /// Generation failed; content holds the failure text
    FinalizedError,
}

impl Phase {
    pub fn is_pending(self) -> bool {
        matches!(self, Phase::PendingThinking | Phase::PendingStreaming)
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::PendingThinking => "pending_thinking",
            Phase::PendingStreaming => "pending_streaming",
            Phase::Finalized => "finalized",
            Phase::FinalizedError => "finalized_error",
        }
    }
}

#[cfg(test)]
impl Phase {
    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }

    /// Position in the forward ordering, used to check monotonicity
    pub fn rank(self) -> u8 {
        match self {
            Phase::PendingThinking => 0,
            Phase::PendingStreaming => 1,
            Phase::Finalized | Phase::FinalizedError => 2,
        }
    }
}
