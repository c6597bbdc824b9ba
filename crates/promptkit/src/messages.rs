//! Rendered template text → role-tagged messages.
//!
//! Text before the first role marker belongs to `user`. Each role marker
//! starts a new message, unless the message in progress holds only
//! whitespace, in which case the marker just changes its role. Media markers
//! become media parts at their position. Whitespace-only text is dropped;
//! other text is kept verbatim. Output without role or media markers is
//! always exactly one user message, even when blank.

use crate::template::markers::{self, Marker, Segment};
use crate::{Message, Part, Role};
use serde_json::Value;
use tracing::warn;

/// Metadata key marking messages that were spliced in from history.
pub const PURPOSE_KEY: &str = "purpose";
pub const HISTORY_PURPOSE: &str = "history";

/// Assemble messages from rendered output.
pub fn to_messages(rendered: &str) -> Vec<Message> {
    to_messages_with_history(rendered, &[])
}

/// Assemble messages and place `history`.
///
/// History lands at the `{{history}}` marker if the template has one;
/// otherwise before the final message when that message is from the user,
/// and at the end in every other case.
pub fn to_messages_with_history(rendered: &str, history: &[Message]) -> Vec<Message> {
    let mut asm = Assembler::new();
    let mut history_placed = false;
    let mut directives = false;

    for segment in markers::scan(rendered) {
        match segment {
            Segment::Text(text) => asm.text.push_str(text),
            Segment::Marker(Marker::Media { url, content_type }) => {
                directives = true;
                asm.flush_text();
                asm.parts.push(Part::media(url, content_type));
            }
            Segment::Marker(Marker::Role(name)) => {
                directives = true;
                let role = Role::parse(&name).unwrap_or_else(|| {
                    warn!(role = %name, "unknown role in template, using user");
                    Role::User
                });
                asm.switch_role(role);
            }
            Segment::Marker(Marker::History) => {
                asm.finish();
                asm.messages.extend(history.iter().map(tag_history));
                asm.role = Role::Model;
                history_placed = true;
            }
        }
    }
    asm.finish();
    if !directives && !history_placed && asm.messages.is_empty() {
        asm.messages.push(Message::user(rendered));
    }

    let mut messages = asm.messages;
    if !history_placed && !history.is_empty() {
        let tagged = history.iter().map(tag_history);
        match messages.last() {
            Some(last) if last.role == Role::User => {
                let at = messages.len() - 1;
                messages.splice(at..at, tagged);
            }
            _ => messages.extend(tagged),
        }
    }
    messages
}

/// Whether `message` was inserted from conversation history.
pub fn is_history(message: &Message) -> bool {
    message.metadata_value(PURPOSE_KEY).and_then(Value::as_str) == Some(HISTORY_PURPOSE)
}

fn tag_history(message: &Message) -> Message {
    message
        .clone()
        .with_metadata(PURPOSE_KEY, Value::String(HISTORY_PURPOSE.into()))
}

struct Assembler {
    role: Role,
    parts: Vec<Part>,
    text: String,
    messages: Vec<Message>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            role: Role::User,
            parts: Vec::new(),
            text: String::new(),
            messages: Vec::new(),
        }
    }

    fn flush_text(&mut self) {
        let text = std::mem::take(&mut self.text);
        if !text.trim().is_empty() {
            self.parts.push(Part::Text(text));
        }
    }

    fn is_blank(&self) -> bool {
        self.parts.is_empty() && self.text.trim().is_empty()
    }

    fn switch_role(&mut self, role: Role) {
        if self.is_blank() {
            self.text.clear();
        } else {
            self.finish();
        }
        self.role = role;
    }

    fn finish(&mut self) {
        self.flush_text();
        if !self.parts.is_empty() {
            let content = std::mem::take(&mut self.parts);
            self.messages.push(Message::new(self.role, content));
        }
    }
}
