//! PDF text extraction with `lopdf`.
//!
//! Parsing is CPU-bound, so it runs on the blocking pool and is bounded by
//! the configured extraction timeout.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use studyguide_core::document::{DocumentSource, ExtractedText};
use studyguide_core::error::DocumentError;
use tracing::debug;

pub struct LopdfSource {
    timeout: Duration,
}

impl LopdfSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for LopdfSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl DocumentSource for LopdfSource {
    async fn extract(&self, path: &Path, max_pages: Option<usize>) -> Result<ExtractedText, DocumentError> {
        let owned = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || extract_blocking(&owned, max_pages));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(DocumentError::Task(join.to_string())),
            Err(_) => Err(DocumentError::Timeout(self.timeout.as_secs())),
        }
    }
}

fn extract_blocking(path: &Path, max_pages: Option<usize>) -> Result<ExtractedText, DocumentError> {
    let doc = lopdf::Document::load(path).map_err(|e| DocumentError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let total_pages = page_numbers.len();
    let take = max_pages.unwrap_or(total_pages).min(total_pages);

    let pages = page_numbers[..take]
        .iter()
        .map(|&n| match doc.extract_text(&[n]) {
            Ok(text) => text,
            Err(e) => {
                // Pages without a text layer (scans, images) come back empty.
                debug!(page = n, error = %e, "No text on page");
                String::new()
            }
        })
        .collect();

    Ok(ExtractedText { pages, total_pages })
}
