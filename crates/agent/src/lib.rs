//! The study agent: prompt assembly, the tool loop and the chat service.
//!
//! A turn follows a fixed sequence:
//!
//! 1. **Format** the system prompt from the user's profile, notes and files
//! 2. **Generate** with the session's tools bound
//! 3. **Dispatch** any tool calls, lifting their payloads out of history
//! 4. Repeat 2-3 until the model answers in text (or the iteration cap hits)
//! 5. **Finalize**: pick the screen text, synthesize speech, persist one row

pub mod finalizer;
pub mod loop_runner;
pub mod prompt;
pub mod session;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use finalizer::{SpeechOutput, assistant_message, message_kind};
pub use loop_runner::{AgentLoop, TurnArtifacts, TurnInput, TurnOutcome};
pub use prompt::{FilePreview, PromptAssembler, PromptContext, PromptLimits};
pub use session::{
    AnswerFeedback, ChatReply, ChatRequest, ChatService, DocumentSummary, FALLBACK_REPLY, TestAnswer,
    TestScore, estimated_cost,
};
pub use stream_event::StreamEvent;
