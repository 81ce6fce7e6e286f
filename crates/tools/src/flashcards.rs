//! `make_flashcards`: validate and re-emit a flashcard deck.

use async_trait::async_trait;
use serde::Deserialize;
use studyguide_core::error::ToolError;
use studyguide_core::study::{Artifact, Flashcard};
use studyguide_core::tool::{Tool, ToolResult};

pub struct MakeFlashcardsTool;

#[derive(Deserialize)]
struct Args {
    screen_text: String,
    cards: Vec<Flashcard>,
}

#[async_trait]
impl Tool for MakeFlashcardsTool {
    fn name(&self) -> &str {
        "make_flashcards"
    }

    fn description(&self) -> &str {
        "Display a set of flashcards for the user. Provide the text to show on screen \
         alongside the cards, and a list of cards each with a question, an answer and \
         an optional hint."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "screen_text": {
                    "type": "string",
                    "description": "Text to display on screen alongside the flashcards"
                },
                "cards": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "question": { "type": "string" },
                            "answer": { "type": "string" },
                            "hint": { "type": "string" }
                        },
                        "required": ["question", "answer"]
                    }
                }
            },
            "required": ["screen_text", "cards"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: Args = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("make_flashcards: {e}")))?;

        if args.cards.is_empty() {
            return Err(ToolError::InvalidArguments("make_flashcards: 'cards' must not be empty".into()));
        }

        for (i, card) in args.cards.iter().enumerate() {
            if card.question.trim().is_empty() || card.answer.trim().is_empty() {
                return Err(ToolError::InvalidArguments(format!(
                    "make_flashcards: card {} needs a question and an answer",
                    i + 1
                )));
            }
        }

        Ok(ToolResult::with_artifact(Artifact::Flashcards {
            screen_text: args.screen_text,
            flashcards: args.cards,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_deck_becomes_artifact() {
        let result = MakeFlashcardsTool
            .execute(serde_json::json!({
                "screen_text": "Three cards on cells",
                "cards": [
                    {"question": "What is ATP?", "answer": "Energy currency"},
                    {"question": "Nucleus role?", "answer": "Holds DNA", "hint": "control centre"}
                ]
            }))
            .await
            .unwrap();

        assert!(result.output.starts_with("FLASHCARDS:"));
        match result.artifact.unwrap() {
            Artifact::Flashcards { screen_text, flashcards } => {
                assert_eq!(screen_text, "Three cards on cells");
                assert_eq!(flashcards.len(), 2);
                assert!(flashcards[0].hint.is_none());
                assert_eq!(flashcards[1].hint.as_deref(), Some("control centre"));
            }
            other => panic!("unexpected artifact {other:?}"),
        }
    }

    #[tokio::test]
    async fn card_without_answer_is_rejected() {
        let err = MakeFlashcardsTool
            .execute(serde_json::json!({
                "screen_text": "x",
                "cards": [{"question": "Q only"}]
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn blank_answer_is_rejected() {
        let err = MakeFlashcardsTool
            .execute(serde_json::json!({
                "screen_text": "x",
                "cards": [{"question": "Q", "answer": "  "}]
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("card 1"));
    }
}
