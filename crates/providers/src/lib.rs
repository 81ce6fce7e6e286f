//! Provider implementations for StudyGuide.
//!
//! The chat provider implements `studyguide_core::Provider`; the speech
//! synthesizer implements `studyguide_core::SpeechSynthesizer`. Both are
//! built from `AppConfig`.

pub mod openai_compat;
pub mod speech;

pub use openai_compat::OpenAiCompatProvider;
pub use speech::OpenAiSpeech;

use std::sync::Arc;
use std::time::Duration;
use studyguide_config::AppConfig;
use studyguide_core::error::{ProviderError, SpeechError};
use studyguide_core::{Provider, SpeechSynthesizer};

/// Build the chat provider from configuration.
///
/// A missing API key still yields a provider; requests then fail with
/// `ProviderError::NotConfigured`.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = if config.provider_url.contains("groq.com") {
        "groq"
    } else {
        "openai-compatible"
    };

    let provider = OpenAiCompatProvider::new(
        name,
        &config.provider_url,
        config.api_key.clone().unwrap_or_default(),
        Duration::from_secs(config.timeouts.provider_secs),
    )?;

    Ok(Arc::new(provider))
}

/// Build the speech synthesizer from configuration.
pub fn build_speech_from_config(config: &AppConfig) -> Result<Arc<dyn SpeechSynthesizer>, SpeechError> {
    let speech = OpenAiSpeech::new(
        &config.speech.api_url,
        config.speech.api_key.clone(),
        &config.speech.model,
        Duration::from_secs(config.timeouts.speech_secs),
    )?;

    Ok(Arc::new(speech))
}
