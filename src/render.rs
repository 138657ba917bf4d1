//! Line-oriented terminal rendering of view events

use crate::api::ConversationRecord;
use crate::runtime::ViewEvent;
use crate::state_machine::Phase;
use crate::transcript::{Message, Role, TranscriptView};
use std::collections::HashMap;
use std::io::{self, Write};

/// How much of one message has been written out
#[derive(Debug, Default)]
struct Progress {
    thoughts: usize,
    /// Content already on screen; `None` until the answer header is printed
    shown: Option<String>,
    done: bool,
}

/// Turns view events into incremental terminal output
pub struct Renderer<W> {
    out: W,
    progress: HashMap<usize, Progress>,
    len: usize,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            progress: HashMap::new(),
            len: 0,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn render(&mut self, event: &ViewEvent) -> io::Result<()> {
        match event {
            ViewEvent::Reset { view } => self.reset(view)?,
            ViewEvent::Appended { messages } => {
                for message in messages {
                    let index = self.len;
                    self.len += 1;
                    self.message(index, message)?;
                }
            }
            ViewEvent::Updated { index, message } => self.message(*index, message)?,
            ViewEvent::Activity { .. } => {}
        }
        self.out.flush()
    }

    fn reset(&mut self, view: &TranscriptView) -> io::Result<()> {
        self.progress.clear();
        self.len = view.messages.len();

        let Some(conversation_id) = &view.conversation_id else {
            return writeln!(self.out, "-- no conversation --");
        };
        if view.loading {
            return writeln!(self.out, "-- loading {conversation_id} --");
        }
        writeln!(self.out, "-- {conversation_id} --")?;
        if let Some(error) = &view.error {
            writeln!(self.out, "! {error}")?;
        }
        for (index, message) in view.messages.iter().enumerate() {
            self.message(index, message)?;
        }
        Ok(())
    }

    fn message(&mut self, index: usize, message: &Message) -> io::Result<()> {
        let progress = self.progress.entry(index).or_default();
        if progress.done {
            return Ok(());
        }

        if message.role == Role::User {
            progress.done = true;
            return writeln!(self.out, "you> {}", message.content);
        }

        match message.phase {
            Phase::PendingThinking => {
                let thoughts = message.visible_thoughts();
                if progress.thoughts == 0 && thoughts.is_empty() {
                    writeln!(self.out, "assistant is thinking...")?;
                }
                for thought in thoughts.iter().skip(progress.thoughts) {
                    writeln!(self.out, "  . {thought}")?;
                }
                progress.thoughts = progress.thoughts.max(thoughts.len());
            }
            Phase::PendingStreaming => {
                write_content(&mut self.out, progress, &message.content)?;
            }
            Phase::Finalized => {
                write_content(&mut self.out, progress, &message.content)?;
                writeln!(self.out)?;
                if message.graphs.is_some() {
                    writeln!(self.out, "  [chart attached]")?;
                }
                progress.done = true;
            }
            Phase::FinalizedError => {
                if progress.shown.is_some() {
                    writeln!(self.out)?;
                }
                writeln!(self.out, "! {}", message.content)?;
                progress.done = true;
            }
        }
        Ok(())
    }
}

/// Print only what is new; a replaced answer is reprinted on a fresh line
fn write_content<W: Write>(out: &mut W, progress: &mut Progress, content: &str) -> io::Result<()> {
    match progress.shown.as_deref().map(|shown| content.strip_prefix(shown)) {
        Some(Some(fresh)) => write!(out, "{fresh}")?,
        Some(None) => write!(out, "\nassistant> {content}")?,
        None => write!(out, "assistant> {content}")?,
    }
    progress.shown = Some(content.to_string());
    Ok(())
}

/// Conversation list for `/threads`; the active one is starred
pub fn conversation_list<W: Write>(
    out: &mut W,
    conversations: &[ConversationRecord],
    active: Option<&str>,
) -> io::Result<()> {
    if conversations.is_empty() {
        return writeln!(out, "(no conversations)");
    }
    for conversation in conversations {
        let marker = if Some(conversation.id.as_str()) == active {
            '*'
        } else {
            ' '
        };
        writeln!(
            out,
            "{marker} {}  {}",
            conversation.id,
            conversation.display_title()
        )?;
    }
    out.flush()
}
