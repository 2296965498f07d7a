//! Typed records carried by the chat stream.
//!
//! Every `data: ` line of the response body decodes into one [`StreamEvent`].
//! The `type` field selects the variant; the remaining fields depend on it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::markers::{self, Marker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Backend is looking up places for the query.
    Searching { message: String },
    /// Backend picked a random recommendation instead of searching.
    Random { message: String },
    /// A single search hit.
    Found { title: String, result: Value },
    /// Backend started producing the answer text.
    Generating { message: String },
    /// A fragment of the answer text.
    Chunk { content: String },
    Done(DonePayload),
    Error(ErrorPayload),
}

impl StreamEvent {
    /// Wire name of the variant, for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            StreamEvent::Searching { .. } => "searching",
            StreamEvent::Random { .. } => "random",
            StreamEvent::Found { .. } => "found",
            StreamEvent::Generating { .. } => "generating",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Done(_) => "done",
            StreamEvent::Error(_) => "error",
        }
    }

    /// `done` and `error` end the turn; everything else is progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done(_) | StreamEvent::Error(_))
    }
}

/// Final payload of a successful turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DonePayload {
    pub full_response: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub extracted_destinations: Vec<Value>,
    #[serde(default)]
    pub results: Option<Vec<Value>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub festivals: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attractions: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_festivals: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_attractions: bool,
    #[serde(default, deserialize_with = "markers::deserialize_markers")]
    pub map_markers: Vec<Marker>,
}

impl DonePayload {
    /// The result list attached to the finished message: `results` when the
    /// backend sent one, otherwise the single `result`, otherwise nothing.
    pub fn final_results(&self) -> Vec<Value> {
        match (&self.results, &self.result) {
            (Some(results), _) => results.clone(),
            (None, Some(result)) if !result.is_null() => vec![result.clone()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Structured classification of a backend `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    SessionExpired,
    #[serde(other)]
    Other,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
