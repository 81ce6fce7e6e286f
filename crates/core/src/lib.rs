//! # StudyGuide Core
//!
//! Domain types, traits, and error definitions for the StudyGuide assistant.
//! This crate has **no framework dependencies**: it defines the domain model
//! that every other crate implements against.
//!
//! Each external collaborator (language model, row store, speech, diagram
//! renderer, document extraction) is a trait here; implementations live in
//! their own crates and tests substitute scripted stand-ins.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod study;
pub mod store;
pub mod speech;
pub mod document;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, MessageToolCall, Role, ThreadId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolResult, ToolRegistry};
pub use study::{Artifact, Capability, ChatMode, Flashcard, Mcq, McqOption, MessageKind, MessagePayload};
pub use store::{NewFile, NewMessage, Note, Profile, ProfileUpdate, Store, StoredMessage, Thread, UploadedFile};
pub use speech::SpeechSynthesizer;
pub use document::{DiagramImage, DiagramRenderer, DocumentSource, ExtractedText};
pub use event::{DomainEvent, EventBus};
