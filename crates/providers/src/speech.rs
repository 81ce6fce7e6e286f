//! OpenAI-compatible speech synthesizer (`POST {base}/audio/speech`).
//!
//! Voice ids are passed through unchanged, so an endpoint that speaks the
//! neural voice names from the config (e.g. an edge-tts bridge) works as-is.

use async_trait::async_trait;
use std::time::Duration;
use studyguide_core::error::SpeechError;
use studyguide_core::speech::SpeechSynthesizer;
use tracing::{debug, warn};

pub struct OpenAiSpeech {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiSpeech {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpeechError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            timeout,
            client,
        })
    }

    fn request_body(&self, text: &str, voice: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "response_format": "mp3",
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    fn name(&self) -> &str {
        "openai-speech"
    }

    async fn synthesize(&self, text: &str, voice: &str) -> std::result::Result<Vec<u8>, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::NotConfigured("nothing to synthesize".into()));
        }

        let url = format!("{}/audio/speech", self.base_url);
        debug!(voice, chars = text.len(), "Sending speech request");

        let mut req = self.client.post(&url).json(&self.request_body(text, voice));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                SpeechError::Timeout(self.timeout.as_secs())
            } else {
                SpeechError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Speech endpoint returned error");
            return Err(SpeechError::ApiError {
                status_code: status,
                message: body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
