//! Document text extraction and diagram rendering collaborators.

use async_trait::async_trait;
use std::path::Path;
use crate::error::{DocumentError, RenderError};

/// Text pulled from the leading pages of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    /// Per-page text, in page order, for the pages that were read.
    pub pages: Vec<String>,

    /// Page count of the whole document.
    pub total_pages: usize,
}

impl ExtractedText {
    /// Concatenated text of the pages in `range`, clamped to what was read.
    pub fn pages_text(&self, start: usize, end: usize) -> String {
        let end = end.min(self.pages.len());
        if start >= end {
            return String::new();
        }
        self.pages[start..end].concat()
    }

    /// Concatenated text of every page that was read.
    pub fn full_text(&self) -> String {
        self.pages.concat()
    }

    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }

    /// The short preview embedded in the system prompt.
    ///
    /// Documents longer than the pages read are capped at `long_doc_chars`.
    pub fn preview(&self, long_doc_chars: usize) -> String {
        let text = self.full_text();
        let text = if self.total_pages > self.pages.len() {
            truncate_chars(&text, long_doc_chars)
        } else {
            text.as_str()
        };
        text.trim().to_string()
    }
}

/// Reads per-page text out of an uploaded document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Extract text from at most `max_pages` leading pages (`None` reads all).
    async fn extract(&self, path: &Path, max_pages: Option<usize>) -> std::result::Result<ExtractedText, DocumentError>;
}

/// A rendered diagram image.
#[derive(Debug, Clone)]
pub struct DiagramImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Renders diagram source (mermaid) into an image.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, source: &str) -> std::result::Result<DiagramImage, RenderError>;
}

/// Slice `s` to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
