//! Study tools for the StudyGuide agent.
//!
//! Five tools are available to the model: querying an uploaded PDF,
//! handing text to speech synthesis, rendering a mermaid diagram, and
//! emitting flashcards or multiple-choice questions. Only `summarize_pdf`
//! is always bound; the others follow the capabilities enabled for the
//! session.

pub mod flashcards;
pub mod mcqs;
pub mod pdf;
pub mod render_chart;
pub mod speak;
pub mod summarize_pdf;

use std::collections::BTreeSet;
use std::sync::Arc;
use studyguide_core::document::{DiagramRenderer, DocumentSource};
use studyguide_core::provider::Provider;
use studyguide_core::study::Capability;
use studyguide_core::tool::{Tool, ToolRegistry};

pub use pdf::LopdfSource;
pub use render_chart::MermaidInkRenderer;
pub use summarize_pdf::{PdfEntry, find_pdf};

/// The fixed dispatch table of study tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolKind {
    SummarizePdf,
    Speak,
    RenderChart,
    MakeFlashcards,
    MakeMcqs,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::SummarizePdf,
        ToolKind::Speak,
        ToolKind::RenderChart,
        ToolKind::MakeFlashcards,
        ToolKind::MakeMcqs,
    ];

    /// The name the model calls the tool by.
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::SummarizePdf => "summarize_pdf",
            ToolKind::Speak => "speak",
            ToolKind::RenderChart => "render_chart",
            ToolKind::MakeFlashcards => "make_flashcards",
            ToolKind::MakeMcqs => "make_mcqs",
        }
    }

    /// The capability that switches this tool on; `None` means always on.
    pub fn capability(&self) -> Option<Capability> {
        match self {
            ToolKind::SummarizePdf => None,
            ToolKind::Speak => Some(Capability::Voice),
            ToolKind::RenderChart => Some(Capability::Chart),
            ToolKind::MakeFlashcards => Some(Capability::Flashcards),
            ToolKind::MakeMcqs => Some(Capability::Mcqs),
        }
    }

    /// The tools bound for a session with the given capabilities.
    pub fn enabled(capabilities: &BTreeSet<Capability>) -> Vec<ToolKind> {
        Self::ALL
            .into_iter()
            .filter(|k| k.capability().is_none_or(|c| capabilities.contains(&c)))
            .collect()
    }
}

/// The shared collaborators the study tools are built from.
#[derive(Clone)]
pub struct StudyToolbox {
    provider: Arc<dyn Provider>,
    documents: Arc<dyn DocumentSource>,
    renderer: Arc<dyn DiagramRenderer>,
    model: String,
    temperature: f32,
}

impl StudyToolbox {
    pub fn new(
        provider: Arc<dyn Provider>,
        documents: Arc<dyn DocumentSource>,
        renderer: Arc<dyn DiagramRenderer>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            documents,
            renderer,
            model: model.into(),
            temperature,
        }
    }

    pub fn documents(&self) -> &Arc<dyn DocumentSource> {
        &self.documents
    }

    fn build(&self, kind: ToolKind, catalog: &[PdfEntry]) -> Box<dyn Tool> {
        match kind {
            ToolKind::SummarizePdf => Box::new(summarize_pdf::SummarizePdfTool::new(
                self.provider.clone(),
                self.documents.clone(),
                catalog.to_vec(),
                self.model.clone(),
                self.temperature,
            )),
            ToolKind::Speak => Box::new(speak::SpeakTool),
            ToolKind::RenderChart => Box::new(render_chart::RenderChartTool::new(self.renderer.clone())),
            ToolKind::MakeFlashcards => Box::new(flashcards::MakeFlashcardsTool),
            ToolKind::MakeMcqs => Box::new(mcqs::MakeMcqsTool),
        }
    }

    /// Build the registry for one turn: the tools the capabilities enable,
    /// with `summarize_pdf` reading from `catalog`.
    pub fn registry(&self, capabilities: &BTreeSet<Capability>, catalog: &[PdfEntry]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for kind in ToolKind::enabled(capabilities) {
            registry.register(self.build(kind, catalog));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use studyguide_core::document::{DiagramImage, ExtractedText};
    use studyguide_core::error::{DocumentError, ProviderError, RenderError};
    use studyguide_core::provider::{ProviderRequest, ProviderResponse};

    struct Unused;

    #[async_trait]
    impl Provider for Unused {
        fn name(&self) -> &str {
            "unused"
        }
        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("unused".into()))
        }
    }

    #[async_trait]
    impl DocumentSource for Unused {
        async fn extract(&self, _: &Path, _: Option<usize>) -> Result<ExtractedText, DocumentError> {
            Ok(ExtractedText::default())
        }
    }

    #[async_trait]
    impl DiagramRenderer for Unused {
        async fn render(&self, _: &str) -> Result<DiagramImage, RenderError> {
            Err(RenderError::Status(500))
        }
    }

    fn toolbox() -> StudyToolbox {
        StudyToolbox::new(Arc::new(Unused), Arc::new(Unused), Arc::new(Unused), "m", 0.7)
    }

    #[test]
    fn summarize_pdf_is_always_bound() {
        let registry = toolbox().registry(&BTreeSet::new(), &[]);
        assert_eq!(registry.names(), vec!["summarize_pdf"]);
    }

    #[test]
    fn capabilities_select_tools() {
        let caps: BTreeSet<Capability> = [Capability::Voice, Capability::Mcqs].into_iter().collect();
        let registry = toolbox().registry(&caps, &[]);
        assert_eq!(registry.names(), vec!["make_mcqs", "speak", "summarize_pdf"]);

        let all: BTreeSet<Capability> = Capability::ALL.into_iter().collect();
        assert_eq!(toolbox().registry(&all, &[]).len(), 5);
    }

    #[test]
    fn pdf_capability_adds_no_extra_tool() {
        let caps: BTreeSet<Capability> = [Capability::Pdf].into_iter().collect();
        assert_eq!(ToolKind::enabled(&caps), vec![ToolKind::SummarizePdf]);
    }
}
