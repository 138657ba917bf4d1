//! Pure state transition function
//!
//! Folds one push-channel event into the pending message. Given the same
//! inputs it always produces the same outputs and performs no I/O; the
//! runtime applies the result to the transcript.

use super::{Effect, Phase, StreamEvent};
use serde_json::Value;
use thiserror::Error;

/// Content written when a failure event carries no text
pub const DEFAULT_FAILURE_TEXT: &str = "Something went wrong.";

/// How the message content changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentChange {
    Unchanged,
    Replace(String),
    Append(String),
}

impl ContentChange {
    pub fn apply_to(self, content: &mut String) {
        match self {
            ContentChange::Unchanged => {}
            ContentChange::Replace(text) => *content = text,
            ContentChange::Append(text) => content.push_str(&text),
        }
    }
}

/// How the thought trace changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThoughtChange {
    Unchanged,
    Append(String),
    Clear,
}

impl ThoughtChange {
    pub fn apply_to(self, thoughts: &mut Vec<String>) {
        match self {
            ThoughtChange::Unchanged => {}
            ThoughtChange::Append(text) => thoughts.push(text),
            ThoughtChange::Clear => thoughts.clear(),
        }
    }
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_phase: Phase,
    pub content: ContentChange,
    pub thoughts: ThoughtChange,
    /// Visualization payload attached on finalization
    pub graphs: Option<Value>,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(phase: Phase) -> Self {
        Self {
            new_phase: phase,
            content: ContentChange::Unchanged,
            thoughts: ThoughtChange::Unchanged,
            graphs: None,
            effects: vec![Effect::NotifyUpdated],
        }
    }

    pub fn with_content(mut self, change: ContentChange) -> Self {
        self.content = change;
        self
    }

    pub fn with_thoughts(mut self, change: ThoughtChange) -> Self {
        self.thoughts = change;
        self
    }

    pub fn with_graphs(mut self, graphs: Option<Value>) -> Self {
        self.graphs = graphs;
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Why an event was not applied
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Message is already {}, no further events apply", .0.name())]
    NotPending(Phase),
    #[error("Status ignored: message is no longer thinking")]
    NotThinking,
}

pub fn transition(phase: Phase, event: StreamEvent) -> Result<TransitionResult, TransitionError> {
    match (phase, event) {
        // Terminal phases absorb everything
        (Phase::Finalized | Phase::FinalizedError, _) => Err(TransitionError::NotPending(phase)),

        // ============================================================
        // Thinking: progress narration
        // ============================================================
        (Phase::PendingThinking, StreamEvent::Status(text)) => {
            Ok(TransitionResult::new(Phase::PendingThinking)
                .with_thoughts(ThoughtChange::Append(text)))
        }

        (Phase::PendingStreaming, StreamEvent::Status(_)) => Err(TransitionError::NotThinking),

        // ============================================================
        // Content
        // ============================================================

        // First chunk: drop the thoughts and start fresh content
        (Phase::PendingThinking, StreamEvent::Delta(text)) => {
            Ok(TransitionResult::new(Phase::PendingStreaming)
                .with_content(ContentChange::Replace(text))
                .with_thoughts(ThoughtChange::Clear))
        }

        (Phase::PendingStreaming, StreamEvent::Delta(text)) => {
            Ok(TransitionResult::new(Phase::PendingStreaming)
                .with_content(ContentChange::Append(text)))
        }

        // ============================================================
        // Completion
        // ============================================================
        (_, StreamEvent::End) => {
            Ok(TransitionResult::new(Phase::Finalized).with_effect(Effect::settled()))
        }

        (_, StreamEvent::Final { text, graphs }) => Ok(TransitionResult::new(Phase::Finalized)
            .with_content(ContentChange::Replace(text))
            .with_thoughts(ThoughtChange::Clear)
            .with_graphs(graphs)
            .with_effect(Effect::settled())),

        (_, StreamEvent::Failure(message)) => {
            let text = message.unwrap_or_else(|| DEFAULT_FAILURE_TEXT.to_string());
            Ok(TransitionResult::new(Phase::FinalizedError)
                .with_content(ContentChange::Replace(text))
                .with_thoughts(ThoughtChange::Clear)
                .with_effect(Effect::failed()))
        }
    }
}
