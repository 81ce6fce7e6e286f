//! Shared test helpers: a scripted provider and a fake speech backend.

use async_trait::async_trait;
use std::sync::Mutex;
use studyguide_core::error::{ProviderError, SpeechError};
use studyguide_core::message::{Message, MessageToolCall};
use studyguide_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use studyguide_core::speech::SpeechSynthesizer;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request. Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    pub fn scripted(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let call = requests.len();

        if call >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{call}, have {})",
                responses.len()
            );
        }

        requests.push(request);
        responses[call].clone()
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, content: &str) -> ProviderResponse {
    let mut msg = Message::assistant(content);
    msg.tool_calls = tool_calls;
    ProviderResponse {
        message: msg,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// Speech backend returning fixed bytes, or failing on demand.
pub struct FakeSpeech {
    pub fail: bool,
    pub voices: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn new() -> Self {
        Self { fail: false, voices: Mutex::new(Vec::new()) }
    }

    pub fn broken() -> Self {
        Self { fail: true, voices: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    fn name(&self) -> &str {
        "fake"
    }

    async fn synthesize(&self, _text: &str, voice: &str) -> Result<Vec<u8>, SpeechError> {
        self.voices.lock().unwrap().push(voice.to_string());
        if self.fail {
            return Err(SpeechError::Network("connection refused".into()));
        }
        Ok(b"ID3fake-mp3".to_vec())
    }
}
