//! `speak`: mark text for speech synthesis at the end of the turn.

use async_trait::async_trait;
use studyguide_core::error::ToolError;
use studyguide_core::study::Artifact;
use studyguide_core::tool::{Tool, ToolResult};

pub struct SpeakTool;

#[async_trait]
impl Tool for SpeakTool {
    fn name(&self) -> &str {
        "speak"
    }

    fn description(&self) -> &str {
        "Convert text to speech audio for the user. Use when the user wants an \
         audio or voice explanation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The text to convert to speech"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;

        Ok(ToolResult::with_artifact(Artifact::Speech {
            text: text.to_string(),
        }))
    }
}
