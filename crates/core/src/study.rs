//! Study domain value types: modes, capabilities, flashcards, MCQs and the
//! structured artifacts a turn can produce.

use serde::{Deserialize, Serialize};

/// Session-level interaction style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Study,
    Test,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Study => "study",
            ChatMode::Test => "test",
        }
    }

    /// Lenient parse used for stored rows; anything unknown is `study`.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("test") {
            ChatMode::Test
        } else {
            ChatMode::Study
        }
    }
}

/// A tool category the client can switch on for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Voice,
    Flashcards,
    Mcqs,
    Pdf,
    Chart,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Voice,
        Capability::Flashcards,
        Capability::Mcqs,
        Capability::Pdf,
        Capability::Chart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Voice => "voice",
            Capability::Flashcards => "flashcards",
            Capability::Mcqs => "mcqs",
            Capability::Pdf => "pdf",
            Capability::Chart => "chart",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

/// A question/answer study card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub hint: Option<String>,
}

/// One of the four labelled MCQ options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McqOption {
    A,
    B,
    C,
    D,
}

/// A multiple-choice question with four options and the correct label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mcq {
    pub question: String,
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
    pub answer: McqOption,
}

/// The display category persisted with an assistant message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Flashcards,
    Mcqs,
    Voice,
    Chart,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Flashcards => "flashcards",
            MessageKind::Mcqs => "mcqs",
            MessageKind::Voice => "voice",
            MessageKind::Chart => "chart",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "flashcards" => MessageKind::Flashcards,
            "mcqs" => MessageKind::Mcqs,
            "voice" => MessageKind::Voice,
            "chart" => MessageKind::Chart,
            _ => MessageKind::Text,
        }
    }
}

/// Structured payload stored alongside an assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flashcards: Vec<Flashcard>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcqs: Vec<Mcq>,
}

impl MessagePayload {
    pub fn is_empty(&self) -> bool {
        self.flashcards.is_empty() && self.mcqs.is_empty()
    }
}

/// A structured side-channel result extracted from a tool call.
///
/// Each artifact has a textual tagged form (`TAG:<payload>`) which is what the
/// tool reports as its raw output; the agent loop swaps that out for
/// [`Artifact::confirmation`] before the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Chart { data_uri: String },
    Speech { text: String },
    Flashcards { screen_text: String, flashcards: Vec<Flashcard> },
    Mcqs { screen_text: String, mcqs: Vec<Mcq> },
}

impl Artifact {
    pub fn tag(&self) -> &'static str {
        match self {
            Artifact::Chart { .. } => "CHART_IMAGE",
            Artifact::Speech { .. } => "VOICE_OUTPUT",
            Artifact::Flashcards { .. } => "FLASHCARDS",
            Artifact::Mcqs { .. } => "MCQS",
        }
    }

    /// The sentinel-prefixed string form of this artifact.
    pub fn to_tagged(&self) -> String {
        let body = match self {
            Artifact::Chart { data_uri } => data_uri.clone(),
            Artifact::Speech { text } => text.clone(),
            Artifact::Flashcards { screen_text, flashcards } => serde_json::json!({
                "screen_text": screen_text,
                "flashcards": flashcards,
            })
            .to_string(),
            Artifact::Mcqs { screen_text, mcqs } => serde_json::json!({
                "screen_text": screen_text,
                "mcqs": mcqs,
            })
            .to_string(),
        };
        format!("{}:{}", self.tag(), body)
    }

    /// The short note the model sees in place of the raw payload.
    pub fn confirmation(&self) -> &'static str {
        match self {
            Artifact::Chart { .. } => "Chart generated successfully and displayed to user.",
            Artifact::Speech { .. } => "Audio response will be generated for the user.",
            Artifact::Flashcards { .. } => "Flashcards generated successfully.",
            Artifact::Mcqs { .. } => "MCQs generated successfully.",
        }
    }
}
