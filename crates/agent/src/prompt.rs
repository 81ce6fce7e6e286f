//! System prompt assembly.
//!
//! [`PromptAssembler::assemble`] is a pure function of its inputs: the clock
//! and the document previews are passed in, so the only disk access lives in
//! [`load_previews`].

use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::path::Path;
use studyguide_core::document::{DocumentSource, truncate_chars};
use studyguide_core::store::{Note, Profile, UploadedFile};
use studyguide_core::study::{Capability, ChatMode};
use tracing::warn;

const ROLE_LINE: &str = "You are a helpful study guide AI assistant.";

const STUDY_POLICY: &str = "You help students learn by answering questions clearly and educationally. \
Keep responses focused and helpful. Use examples when appropriate. \
Keep the student studying and do not answer questions unrelated to study.";

const TEST_MODE_LINE: &str =
    "You are in TEST MODE. Generate questions to test the student's knowledge. Be encouraging but accurate.";

const NOT_SPECIFIED: &str = "Not specified";

/// Characters of text kept for documents longer than the preview window.
const LONG_DOC_CHARS: usize = 1000;

/// Caps applied while assembling the prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub max_notes: usize,
    pub max_files: usize,
    pub preview_chars: usize,
    pub preview_pages: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_notes: 5,
            max_files: 3,
            preview_chars: 500,
            preview_pages: 5,
        }
    }
}

/// An attached file as it appears in the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePreview {
    pub filename: String,
    pub preview: Option<String>,
}

/// Everything the system prompt is built from.
pub struct PromptContext<'a> {
    pub mode: ChatMode,
    pub capabilities: &'a BTreeSet<Capability>,
    pub profile: Option<&'a Profile>,
    pub notes: &'a [Note],
    pub files: &'a [FilePreview],
    pub now: NaiveDateTime,
}

/// The sentence that tells the model when to use a capability's tool.
pub fn tool_instruction(capability: Capability) -> &'static str {
    match capability {
        Capability::Voice => "VOICE TOOL: Use the speak tool when user wants audio/voice explanation.",
        Capability::Flashcards => {
            "FLASHCARD TOOL: Use the make_flashcards tool to create flashcards when asked or when it helps learning."
        }
        Capability::Mcqs => "MCQ TOOL: Use the make_mcqs tool to generate multiple choice questions when asked.",
        Capability::Pdf => "PDF TOOL: Use the summarize_pdf tool to query or summarize uploaded PDFs.",
        Capability::Chart => {
            "CHART TOOL: Use the render_chart tool to create diagrams. The chart will be displayed as an image to the user."
        }
    }
}

fn or_not_specified(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or(NOT_SPECIFIED)
}

fn timestamp(now: NaiveDateTime) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Default)]
pub struct PromptAssembler {
    limits: PromptLimits,
}

impl PromptAssembler {
    pub fn new(limits: PromptLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &PromptLimits {
        &self.limits
    }

    /// Build the system instruction for a tool-bound turn.
    pub fn assemble(&self, ctx: &PromptContext<'_>) -> String {
        let mut prompt = format!(
            "{ROLE_LINE} Current date and time: {}.\n{STUDY_POLICY}",
            timestamp(ctx.now)
        );

        if let Some(profile) = ctx.profile {
            prompt.push_str("\n\nUSER DETAILS:");
            prompt.push_str(&format!("\n- Name: {}", profile.shown_name()));
            prompt.push_str(&format!("\n- About: {}", or_not_specified(profile.about.as_deref())));
            prompt.push_str(&format!(
                "\n- Strong subjects: {}",
                or_not_specified(profile.strengths.as_deref())
            ));
            prompt.push_str(&format!(
                "\n- Needs improvement in: {}",
                or_not_specified(profile.weaknesses.as_deref())
            ));
        }

        let today = ctx.now.date();
        let mut upcoming: Vec<&Note> = ctx.notes.iter().filter(|n| n.date >= today).collect();
        upcoming.sort_by_key(|n| n.date);
        upcoming.truncate(self.limits.max_notes);
        if !upcoming.is_empty() {
            prompt.push_str("\n\nUPCOMING IMPORTANT DATES:");
            for note in upcoming {
                prompt.push_str(&format!("\n- {}: {}", note.date.format("%Y-%m-%d"), note.text));
            }
        }

        if !ctx.files.is_empty() {
            prompt.push_str("\n\nUSER HAS UPLOADED FILES:");
            for file in ctx.files.iter().take(self.limits.max_files) {
                prompt.push_str(&format!("\n- {}", file.filename));
                if let Some(preview) = file.preview.as_deref().filter(|p| !p.is_empty()) {
                    prompt.push_str(&format!(
                        "\n  Content preview: {}...",
                        truncate_chars(preview, self.limits.preview_chars)
                    ));
                }
            }
        }

        if ctx.mode == ChatMode::Test {
            prompt.push_str("\n\n");
            prompt.push_str(TEST_MODE_LINE);
        }

        for capability in Capability::ALL {
            if ctx.capabilities.contains(&capability) {
                prompt.push_str("\n\n");
                prompt.push_str(tool_instruction(capability));
            }
        }

        prompt
    }

    /// The reduced, tool-less instruction used for streamed replies.
    pub fn streaming(&self, mode: ChatMode, now: NaiveDateTime) -> String {
        let mut prompt = format!(
            "{ROLE_LINE} Current date and time: {}.\n\
             You help students learn by answering questions clearly and educationally.",
            timestamp(now)
        );
        if mode == ChatMode::Test {
            prompt.push_str("\n\nYou are in TEST MODE. Generate questions to test the student's knowledge.");
        }
        prompt
    }
}

/// Read previews for the first `limits.max_files` files.
///
/// Missing files get no preview; extraction errors are logged and skipped.
pub async fn load_previews(
    source: &dyn DocumentSource,
    files: &[UploadedFile],
    limits: &PromptLimits,
) -> Vec<FilePreview> {
    let mut previews = Vec::new();
    for file in files.iter().take(limits.max_files) {
        let path = Path::new(&file.stored_path);
        let preview = if path.exists() {
            match source.extract(path, Some(limits.preview_pages)).await {
                Ok(text) => Some(text.preview(LONG_DOC_CHARS)),
                Err(e) => {
                    warn!(file = %file.filename, error = %e, "Could not read file preview");
                    None
                }
            }
        } else {
            None
        };
        previews.push(FilePreview {
            filename: file.filename.clone(),
            preview,
        });
    }
    previews
}
