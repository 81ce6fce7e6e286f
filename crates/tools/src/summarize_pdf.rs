//! `summarize_pdf`: answer a question about one of the user's uploaded PDFs.
//!
//! Short documents are answered in a single pass. Longer ones get an initial
//! answer from the first pages and are then refined window by window, each
//! refinement seeing the running summary plus the next window's text.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use studyguide_core::document::{DocumentSource, truncate_chars};
use studyguide_core::error::ToolError;
use studyguide_core::message::Message;
use studyguide_core::provider::{Provider, ProviderRequest};
use studyguide_core::tool::{Tool, ToolResult};
use tracing::{debug, warn};

/// Documents with fewer pages than this are answered in one pass.
const SINGLE_PASS_PAGES: usize = 10;
const SINGLE_PASS_CHARS: usize = 8000;
const INITIAL_PASS_CHARS: usize = 6000;
const WINDOW_PAGES: usize = 5;
const WINDOW_CHARS: usize = 4000;

/// An uploaded PDF the tool may read, as known at the start of the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfEntry {
    /// The name the user uploaded it under.
    pub filename: String,
    pub path: PathBuf,
}

/// Find the first entry whose name contains `needle`, ignoring case.
pub fn find_pdf<'a>(catalog: &'a [PdfEntry], needle: &str) -> Option<&'a PdfEntry> {
    let needle = needle.to_lowercase();
    catalog.iter().find(|entry| {
        let name = entry.filename.to_lowercase();
        name.contains(&needle) && name.ends_with(".pdf")
    })
}

pub struct SummarizePdfTool {
    provider: Arc<dyn Provider>,
    source: Arc<dyn DocumentSource>,
    catalog: Vec<PdfEntry>,
    model: String,
    temperature: f32,
}

impl SummarizePdfTool {
    pub fn new(
        provider: Arc<dyn Provider>,
        source: Arc<dyn DocumentSource>,
        catalog: Vec<PdfEntry>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            source,
            catalog,
            model: model.into(),
            temperature,
        }
    }

    async fn ask(&self, prompt: String) -> Result<String, String> {
        let request = ProviderRequest::plain(&self.model, self.temperature, vec![Message::user(prompt)]);
        self.provider
            .complete(request)
            .await
            .map(|resp| resp.message.content)
            .map_err(|e| e.to_string())
    }

    async fn answer(&self, entry: &PdfEntry, prompt: &str) -> Result<ToolResult, String> {
        let doc = self
            .source
            .extract(&entry.path, None)
            .await
            .map_err(|e| e.to_string())?;

        if doc.is_blank() {
            warn!(file = %entry.filename, pages = doc.total_pages, "PDF has no extractable text");
            return Ok(ToolResult::failure("Could not extract text from PDF."));
        }

        if doc.total_pages < SINGLE_PASS_PAGES {
            debug!(file = %entry.filename, pages = doc.total_pages, "Single-pass PDF answer");
            let answer = self
                .ask(format!(
                    "Based on the following PDF content, {prompt}\n\nPDF CONTENT:\n{}",
                    truncate_chars(&doc.full_text(), SINGLE_PASS_CHARS)
                ))
                .await?;
            return Ok(ToolResult::text(answer));
        }

        let initial = doc.pages_text(0, SINGLE_PASS_PAGES);
        let mut summary = self
            .ask(format!(
                "Based on the following PDF content (Pages 1-10), create an initial summary/answer for: {prompt}\n\nPDF CONTENT:\n{}",
                truncate_chars(&initial, INITIAL_PASS_CHARS)
            ))
            .await?;

        let mut start = SINGLE_PASS_PAGES;
        while start < doc.total_pages {
            let end = (start + WINDOW_PAGES).min(doc.total_pages);
            let window = doc.pages_text(start, end);
            if !window.trim().is_empty() {
                debug!(file = %entry.filename, from = start + 1, to = end, "Refining PDF summary");
                summary = self
                    .ask(format!(
                        "USER ORIGINAL INTENT: {prompt}\n\n\
                         PREVIOUS SUMMARY: {summary}\n\n\
                         NEW CONTENT (Pages {} to {end}):\n{}\n\n\
                         INSTRUCTIONS: Update the previous summary to include relevant info from the new content.",
                        start + 1,
                        truncate_chars(&window, WINDOW_CHARS)
                    ))
                    .await?;
            }
            start += WINDOW_PAGES;
        }

        Ok(ToolResult::text(summary))
    }
}

#[async_trait]
impl Tool for SummarizePdfTool {
    fn name(&self) -> &str {
        "summarize_pdf"
    }

    fn description(&self) -> &str {
        "Summarize or answer questions about a specific uploaded PDF file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Name (or part of the name) of the uploaded PDF"
                },
                "prompt": {
                    "type": "string",
                    "description": "What to summarize or answer from the document"
                }
            },
            "required": ["filename", "prompt"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let filename = arguments["filename"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'filename' argument".into()))?;
        let prompt = arguments["prompt"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'prompt' argument".into()))?;

        let Some(entry) = find_pdf(&self.catalog, filename) else {
            return Ok(ToolResult::failure(format!("Could not find PDF file: {filename}")));
        };

        match self.answer(entry, prompt).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(file = %entry.filename, error = %e, "PDF summarization failed");
                Ok(ToolResult::failure(format!("Error processing PDF: {e}")))
            }
        }
    }
}
