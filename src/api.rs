//! REST collaborator for conversations and messages
//!
//! Thin pass-through calls: history, send, create, list.

mod client;
mod error;
mod types;

pub use client::HttpApi;
pub use error::ApiError;
pub use types::*;
