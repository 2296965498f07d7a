//! Conversation state and the reducer that folds stream events into it.
//!
//! The transcript is passed by value: [`reduce`] consumes a snapshot and
//! returns the next one, so there is exactly one owner of the current state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::event::StreamEvent;

/// Status shown on a placeholder before the backend reports progress.
pub const SEARCHING_STATUS: &str = "🔍 Searching...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub is_user: bool,
    pub is_streaming: bool,
    pub is_error: bool,
    pub status: Option<String>,
    pub results: Vec<Value>,
    pub extracted_destinations: Vec<Value>,
    pub festivals: Vec<Value>,
    pub attractions: Vec<Value>,
    pub has_festivals: bool,
    pub has_attractions: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(id: MessageId, text: String, is_user: bool) -> Self {
        Self {
            id,
            text,
            is_user,
            is_streaming: false,
            is_error: false,
            status: None,
            results: Vec::new(),
            extracted_destinations: Vec::new(),
            festivals: Vec::new(),
            attractions: Vec::new(),
            has_festivals: false,
            has_attractions: false,
            timestamp: Utc::now(),
        }
    }

    /// Finalizes a streaming message. Finalized messages are left untouched.
    fn finish(&mut self, text: Option<String>, is_error: bool) {
        if !self.is_streaming {
            return;
        }
        if let Some(text) = text {
            self.text = text;
        }
        self.is_streaming = false;
        self.is_error = is_error;
        self.status = None;
    }
}

/// Ordered list of messages, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_id: 1,
        }
    }

    /// A transcript opening with a non-user greeting.
    pub fn with_welcome(text: impl Into<String>) -> Self {
        let mut transcript = Self::new();
        transcript.push(text.into(), false);
        transcript
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The message currently receiving stream events, if any.
    pub fn streaming(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_streaming)
    }

    pub fn push_user(mut self, text: impl Into<String>) -> (Self, MessageId) {
        let id = self.push(text.into(), true);
        (self, id)
    }

    /// Appends an empty assistant message awaiting stream events.
    pub fn push_placeholder(mut self) -> (Self, MessageId) {
        let id = self.push(String::new(), false);
        if let Some(message) = self.messages.last_mut() {
            message.is_streaming = true;
            message.status = Some(SEARCHING_STATUS.to_string());
        }
        (self, id)
    }

    /// Ends a streaming message with a local failure text.
    pub fn fail(mut self, id: MessageId, text: impl Into<String>) -> Self {
        if let Some(message) = self.get_mut(id) {
            message.finish(Some(text.into()), true);
        }
        self
    }

    /// Ends a streaming message keeping whatever text has accumulated.
    /// Falls back to `fallback` as an error when nothing arrived.
    pub fn settle(mut self, id: MessageId, fallback: impl Into<String>) -> Self {
        if let Some(message) = self.get_mut(id) {
            if message.text.is_empty() {
                message.finish(Some(fallback.into()), true);
            } else {
                message.finish(None, false);
            }
        }
        self
    }

    fn push(&mut self, text: String, is_user: bool) -> MessageId {
        let id = MessageId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        self.messages.push(Message::new(id, text, is_user));
        id
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }
}

/// Applies one event to the streaming message `target`.
///
/// Events for an unknown or already finalized message are dropped; nothing
/// is ever removed or reordered.
pub fn reduce(mut transcript: Transcript, target: MessageId, event: &StreamEvent) -> Transcript {
    let Some(message) = transcript.get_mut(target) else {
        warn!(%target, event = event.tag(), "event for unknown message dropped");
        return transcript;
    };
    if !message.is_streaming {
        warn!(%target, event = event.tag(), "event for finalized message dropped");
        return transcript;
    }

    match event {
        StreamEvent::Searching { message: status }
        | StreamEvent::Random { message: status }
        | StreamEvent::Generating { message: status } => {
            message.status = Some(status.clone());
        }
        StreamEvent::Found { title, result } => {
            message.status = Some(format!("✅ {title} found!"));
            message.results.push(result.clone());
        }
        StreamEvent::Chunk { content } => {
            message.text.push_str(content);
            message.status = None;
        }
        StreamEvent::Done(done) => {
            message.extracted_destinations = done.extracted_destinations.clone();
            message.results = done.final_results();
            message.festivals = done.festivals.clone();
            message.attractions = done.attractions.clone();
            message.has_festivals = done.has_festivals;
            message.has_attractions = done.has_attractions;
            message.finish(Some(done.full_response.clone()), false);
        }
        StreamEvent::Error(error) => {
            message.finish(Some(error.message.clone()), true);
        }
    }

    transcript
}
