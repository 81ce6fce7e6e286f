//! Turning a finished turn into audio and a persisted message row.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use studyguide_core::error::SpeechError;
use studyguide_core::event::{DomainEvent, EventBus};
use studyguide_core::message::ThreadId;
use studyguide_core::speech::SpeechSynthesizer;
use studyguide_core::store::NewMessage;
use studyguide_core::study::{MessageKind, MessagePayload};
use tracing::{info, warn};
use uuid::Uuid;

use crate::loop_runner::TurnOutcome;

/// Writes synthesized speech into the audio directory.
#[derive(Clone)]
pub struct SpeechOutput {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    audio_dir: PathBuf,
}

impl SpeechOutput {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            synthesizer,
            audio_dir: audio_dir.into(),
        }
    }

    async fn write(&self, text: &str, voice: &str) -> Result<(String, usize), SpeechError> {
        let bytes = self.synthesizer.synthesize(text, voice).await?;
        let file_name = format!("audio_{}.mp3", Uuid::new_v4().simple());
        let path = self.audio_dir.join(&file_name);

        let write_err = |e: std::io::Error| SpeechError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.audio_dir).await.map_err(write_err)?;
        tokio::fs::write(&path, &bytes).await.map_err(write_err)?;

        Ok((file_name, bytes.len()))
    }

    /// Synthesize `text` and return the audio file name.
    ///
    /// Failures are logged and yield `None`; a turn never fails on speech.
    pub async fn render(&self, thread_id: &ThreadId, text: &str, voice: &str, events: &EventBus) -> Option<String> {
        match self.write(text, voice).await {
            Ok((file_name, bytes)) => {
                info!(thread_id = %thread_id, file = %file_name, bytes, "Speech synthesized");
                events.publish(DomainEvent::SpeechSynthesized {
                    thread_id: thread_id.to_string(),
                    file_name: file_name.clone(),
                    bytes,
                    timestamp: Utc::now(),
                });
                Some(file_name)
            }
            Err(e) => {
                warn!(thread_id = %thread_id, backend = self.synthesizer.name(), error = %e, "Speech synthesis failed");
                None
            }
        }
    }
}

/// The persisted type of a turn. Later checks win: chart over voice over
/// MCQs over flashcards.
pub fn message_kind(outcome: &TurnOutcome) -> MessageKind {
    let mut kind = MessageKind::Text;
    if !outcome.flashcards.is_empty() {
        kind = MessageKind::Flashcards;
    }
    if !outcome.mcqs.is_empty() {
        kind = MessageKind::Mcqs;
    }
    if outcome.audio_file.is_some() {
        kind = MessageKind::Voice;
    }
    if outcome.chart_image.is_some() {
        kind = MessageKind::Chart;
    }
    kind
}

/// The assistant row written once per completed turn.
pub fn assistant_message(thread_id: &ThreadId, outcome: &TurnOutcome) -> NewMessage {
    let payload = MessagePayload {
        flashcards: outcome.flashcards.clone(),
        mcqs: outcome.mcqs.clone(),
    };

    NewMessage {
        kind: message_kind(outcome),
        payload: (!payload.is_empty()).then_some(payload),
        audio_file: outcome.audio_file.clone(),
        ..NewMessage::assistant(thread_id.clone(), outcome.screen_text.clone(), outcome.tokens_used)
    }
}
