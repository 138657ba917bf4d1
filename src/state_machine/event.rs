//! Events arriving over the push channel
//!
//! Raw payloads are JSON objects with a `type` discriminator. Anything that
//! does not parse into one of the known shapes is dropped, since the channel
//! is best-effort.

use serde::Deserialize;
use serde_json::Value;

/// Normalized push-channel event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Intermediate progress note shown while the assistant is thinking
    Status(String),
    /// Content fragment: the first one replaces, later ones append
    Delta(String),
    /// Generation finished for the pending message
    End,
    /// Full replacement of the content, completing the message
    Final { text: String, graphs: Option<Value> },
    /// Generation failed; `None` uses the default failure text
    Failure(Option<String>),
}

/// Wire shape of a push-channel frame
#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default, alias = "full_respoinse")]
    full_response: Option<Value>,
    #[serde(default)]
    graphs: Option<Value>,
}

impl StreamEvent {
    /// Parse a raw payload, returning `None` for anything unrecognized
    pub fn parse(payload: &str) -> Option<Self> {
        let frame: Frame = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed stream payload");
                return None;
            }
        };

        let content = text_of(frame.content.as_ref());
        match frame.kind.as_str() {
            // A status without text carries nothing worth narrating
            "status" => content.map(|text| StreamEvent::Status(text.to_string())),
            // Used for both "begin streaming" and "append token"; the phase
            // of the pending message decides which
            "message_start" => Some(StreamEvent::Delta(content.unwrap_or_default().to_string())),
            "message_end" => Some(StreamEvent::End),
            "message" => {
                let text = non_empty(text_of(frame.full_response.as_ref()))
                    .or(non_empty(content))
                    .unwrap_or_default();
                Some(StreamEvent::Final {
                    text: text.to_string(),
                    graphs: frame.graphs.filter(|g| !g.is_null()),
                })
            }
            "error" => Some(StreamEvent::Failure(
                non_empty(content).map(ToString::to_string),
            )),
            other => {
                tracing::debug!(kind = %other, "Ignoring unknown stream event type");
                None
            }
        }
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Status(_) => "status",
            StreamEvent::Delta(_) => "delta",
            StreamEvent::End => "end",
            StreamEvent::Final { .. } => "final",
            StreamEvent::Failure(_) => "failure",
        }
    }
}

fn text_of(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}
