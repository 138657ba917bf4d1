//! Per-message reconciliation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions: push
//! events are normalized into [`StreamEvent`]s and folded into the phase of
//! the pending message by [`transition`].

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::StreamEvent;
pub use state::Phase;
pub use transition::{transition, TransitionResult};
