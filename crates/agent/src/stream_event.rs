//! Events of a streamed chat reply.
//!
//! Serialized with a `type` tag so each SSE `data:` line reads
//! `{"type":"chunk","content":"..."}`, `{"type":"done",...}` or
//! `{"type":"error","content":"..."}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text from the model.
    Chunk { content: String },

    /// The reply is complete and persisted.
    Done { thread_id: String, tokens_used: u64 },

    /// The stream failed; nothing was persisted for the assistant.
    Error { content: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}
