//! `make_mcqs`: validate and re-emit multiple-choice questions.

use async_trait::async_trait;
use serde::Deserialize;
use studyguide_core::error::ToolError;
use studyguide_core::study::{Artifact, Mcq};
use studyguide_core::tool::{Tool, ToolResult};

pub struct MakeMcqsTool;

#[derive(Deserialize)]
struct Args {
    screen_text: String,
    items: Vec<Mcq>,
}

#[async_trait]
impl Tool for MakeMcqsTool {
    fn name(&self) -> &str {
        "make_mcqs"
    }

    fn description(&self) -> &str {
        "Display multiple choice questions for the user. Each question has four options \
         (a, b, c, d) and the letter of the correct option."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "screen_text": {
                    "type": "string",
                    "description": "Text to display on screen alongside the questions"
                },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "question": { "type": "string" },
                            "a": { "type": "string" },
                            "b": { "type": "string" },
                            "c": { "type": "string" },
                            "d": { "type": "string" },
                            "answer": { "type": "string", "enum": ["a", "b", "c", "d"] }
                        },
                        "required": ["question", "a", "b", "c", "d", "answer"]
                    }
                }
            },
            "required": ["screen_text", "items"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: Args = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("make_mcqs: {e}")))?;

        if args.items.is_empty() {
            return Err(ToolError::InvalidArguments("make_mcqs: 'items' must not be empty".into()));
        }

        for (i, mcq) in args.items.iter().enumerate() {
            let blank = [&mcq.question, &mcq.a, &mcq.b, &mcq.c, &mcq.d]
                .iter()
                .any(|s| s.trim().is_empty());
            if blank {
                return Err(ToolError::InvalidArguments(format!(
                    "make_mcqs: question {} needs text and four non-empty options",
                    i + 1
                )));
            }
        }

        Ok(ToolResult::with_artifact(Artifact::Mcqs {
            screen_text: args.screen_text,
            mcqs: args.items,
        }))
    }
}
