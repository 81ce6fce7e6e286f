//! Speech synthesis collaborator.

use async_trait::async_trait;
use crate::error::SpeechError;

/// Turns text into encoded audio (mp3) for a given voice id.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// A human-readable backend name (e.g., "openai-speech").
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, voice: &str) -> std::result::Result<Vec<u8>, SpeechError>;
}
