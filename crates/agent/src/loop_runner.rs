//! The agent loop: a state machine that runs one study turn.
//!
//! ```text
//! Formatting -> Generating -> (Dispatching -> Generating)* -> Finalizing -> Done
//! ```
//!
//! Each state carries only what is meaningful at that stage. Tool payloads
//! (charts, speech text, flashcards, MCQs) are lifted out of the tool results
//! into [`TurnArtifacts`]; the model only ever sees their confirmations.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use studyguide_core::error::ToolError;
use studyguide_core::event::{DomainEvent, EventBus};
use studyguide_core::message::{Message, MessageToolCall, Role, ThreadId};
use studyguide_core::provider::{Provider, ProviderRequest, ToolDefinition};
use studyguide_core::study::{Artifact, Flashcard, Mcq};
use studyguide_core::tool::{ToolCall, ToolRegistry};
use tracing::{debug, info, warn};

use crate::finalizer::SpeechOutput;

const ITERATION_LIMIT_TEXT: &str =
    "I've reached the maximum number of tool call iterations. Please provide further guidance.";

/// What a turn starts from.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub thread_id: ThreadId,
    pub system_prompt: String,
    /// Prior user/assistant messages of the thread, oldest first.
    pub history: Vec<Message>,
    pub user_message: String,
    /// Voice id used if the turn asks for speech.
    pub voice: String,
}

/// What a finished turn yields.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub screen_text: String,
    pub chart_image: Option<String>,
    pub speech_text: Option<String>,
    pub audio_file: Option<String>,
    pub flashcards: Vec<Flashcard>,
    pub mcqs: Vec<Mcq>,
    /// Summed over every model call of the turn.
    pub tokens_used: u64,
    pub iterations: u32,
}

/// Payloads collected from tool results. A later payload of the same kind
/// replaces an earlier one.
#[derive(Debug, Clone, Default)]
pub struct TurnArtifacts {
    pub chart_image: Option<String>,
    pub speech_text: Option<String>,
    pub flashcards: Vec<Flashcard>,
    pub mcqs: Vec<Mcq>,
    pub screen_text_override: Option<String>,
}

impl TurnArtifacts {
    fn absorb(&mut self, artifact: Artifact) {
        match artifact {
            Artifact::Chart { data_uri } => self.chart_image = Some(data_uri),
            Artifact::Speech { text } => self.speech_text = Some(text),
            Artifact::Flashcards { screen_text, flashcards } => {
                self.flashcards = flashcards;
                self.screen_text_override = Some(screen_text);
            }
            Artifact::Mcqs { screen_text, mcqs } => {
                self.mcqs = mcqs;
                self.screen_text_override = Some(screen_text);
            }
        }
    }
}

struct Generating {
    messages: Vec<Message>,
    artifacts: TurnArtifacts,
    tokens: u64,
    iteration: u32,
}

struct Dispatching {
    messages: Vec<Message>,
    calls: Vec<MessageToolCall>,
    artifacts: TurnArtifacts,
    tokens: u64,
    iteration: u32,
}

struct Finalizing {
    messages: Vec<Message>,
    artifacts: TurnArtifacts,
    tokens: u64,
    iterations: u32,
    hit_limit: bool,
}

enum LoopState {
    Formatting(TurnInput),
    Generating(Generating),
    Dispatching(Dispatching),
    Finalizing(Finalizing),
    Done(TurnOutcome),
}

/// Runs turns against a provider with a per-turn tool registry.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: u32,
    event_bus: Arc<EventBus>,
    speech: Option<SpeechOutput>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            max_iterations: 10,
            event_bus,
            speech: None,
        }
    }

    /// Set the maximum number of model calls per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Set the default max tokens per model response.
    pub fn with_max_tokens(mut self, max: Option<u32>) -> Self {
        self.max_tokens = max;
        self
    }

    /// Attach speech output for turns that call `speak`.
    pub fn with_speech(mut self, speech: SpeechOutput) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Run one turn to completion.
    ///
    /// Model failures abort the turn; tool failures are reported back to the
    /// model and the loop continues.
    pub async fn run(&self, tools: &ToolRegistry, input: TurnInput) -> Result<TurnOutcome, studyguide_core::Error> {
        let thread_id = input.thread_id.clone();
        let voice = input.voice.clone();
        let definitions = tools.definitions();

        info!(
            thread_id = %thread_id,
            history = input.history.len(),
            tools = definitions.len(),
            "Running study turn"
        );

        let mut state = LoopState::Formatting(input);
        loop {
            state = match state {
                LoopState::Formatting(input) => Self::format(input),
                LoopState::Generating(step) => self.generate(step, &definitions, &thread_id).await?,
                LoopState::Dispatching(step) => self.dispatch(step, tools).await,
                LoopState::Finalizing(step) => self.finalize(step, &thread_id, &voice).await,
                LoopState::Done(outcome) => return Ok(outcome),
            };
        }
    }

    fn format(input: TurnInput) -> LoopState {
        let mut messages = Vec::with_capacity(input.history.len() + 2);
        messages.push(Message::system(input.system_prompt));
        messages.extend(input.history.into_iter().filter(|m| m.role != Role::System));
        messages.push(Message::user(input.user_message));

        LoopState::Generating(Generating {
            messages,
            artifacts: TurnArtifacts::default(),
            tokens: 0,
            iteration: 0,
        })
    }

    async fn generate(
        &self,
        step: Generating,
        definitions: &[ToolDefinition],
        thread_id: &ThreadId,
    ) -> Result<LoopState, studyguide_core::Error> {
        let Generating {
            mut messages,
            artifacts,
            mut tokens,
            iteration,
        } = step;

        if iteration >= self.max_iterations {
            warn!(thread_id = %thread_id, iterations = iteration, "Max tool iterations reached, finalizing");
            return Ok(LoopState::Finalizing(Finalizing {
                messages,
                artifacts,
                tokens,
                iterations: iteration,
                hit_limit: true,
            }));
        }

        let iteration = iteration + 1;
        debug!(thread_id = %thread_id, iteration, "Agent loop iteration");

        let request = ProviderRequest {
            model: self.model.clone(),
            messages: messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: definitions.to_vec(),
        };
        let response = self.provider.complete(request).await?;

        let used = response.total_tokens();
        tokens += used;
        self.event_bus.publish(DomainEvent::ResponseGenerated {
            thread_id: thread_id.to_string(),
            model: response.model.clone(),
            tokens_used: used,
            timestamp: Utc::now(),
        });

        let calls = response.message.tool_calls.clone();
        messages.push(response.message);

        if calls.is_empty() {
            return Ok(LoopState::Finalizing(Finalizing {
                messages,
                artifacts,
                tokens,
                iterations: iteration,
                hit_limit: false,
            }));
        }

        Ok(LoopState::Dispatching(Dispatching {
            messages,
            calls,
            artifacts,
            tokens,
            iteration,
        }))
    }

    async fn dispatch(&self, step: Dispatching, tools: &ToolRegistry) -> LoopState {
        let Dispatching {
            mut messages,
            calls,
            mut artifacts,
            tokens,
            iteration,
        } = step;

        debug!(tool_count = calls.len(), "Executing tool calls");

        for tc in &calls {
            let call = ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: serde_json::from_str(&tc.arguments).unwrap_or_default(),
            };

            let start = Instant::now();
            let result = tools.execute(&call).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, content) = match result {
                Ok(mut tool_result) => {
                    let content = tool_result.model_content();
                    if let Some(artifact) = tool_result.artifact.take() {
                        debug!(tool = %tc.name, tag = artifact.tag(), "Captured tool artifact");
                        artifacts.absorb(artifact);
                    }
                    (tool_result.success, content)
                }
                Err(ToolError::NotFound(name)) => {
                    warn!(tool = %name, "Model requested an unknown tool");
                    (false, format!("Unknown tool: {name}"))
                }
                Err(e) => {
                    warn!(tool = %tc.name, error = %e, "Tool execution failed");
                    (false, format!("Error: {e}"))
                }
            };

            self.event_bus.publish(DomainEvent::ToolExecuted {
                tool_name: tc.name.clone(),
                success,
                duration_ms,
                timestamp: Utc::now(),
            });

            messages.push(Message::tool_result(&tc.id, content));
        }

        LoopState::Generating(Generating {
            messages,
            artifacts,
            tokens,
            iteration,
        })
    }

    async fn finalize(&self, step: Finalizing, thread_id: &ThreadId, voice: &str) -> LoopState {
        let Finalizing {
            messages,
            artifacts,
            tokens,
            iterations,
            hit_limit,
        } = step;

        let last_reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.clone());

        let screen_text = match (artifacts.screen_text_override, last_reply) {
            (Some(text), _) => text,
            (None, Some(text)) => text,
            (None, None) if hit_limit => ITERATION_LIMIT_TEXT.to_string(),
            (None, None) => String::new(),
        };

        let speech_text = artifacts.speech_text.filter(|t| !t.trim().is_empty());
        let audio_file = match (&speech_text, &self.speech) {
            (Some(text), Some(speech)) => speech.render(thread_id, text, voice, &self.event_bus).await,
            (Some(_), None) => {
                warn!(thread_id = %thread_id, "Speech requested but no synthesizer is configured");
                None
            }
            _ => None,
        };

        info!(thread_id = %thread_id, iterations, tokens, "Turn complete");

        LoopState::Done(TurnOutcome {
            screen_text,
            chart_image: artifacts.chart_image,
            speech_text,
            audio_file,
            flashcards: artifacts.flashcards,
            mcqs: artifacts.mcqs,
            tokens_used: tokens,
            iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer::{assistant_message, message_kind};
    use crate::test_helpers::*;
    use studyguide_core::error::ProviderError;
    use studyguide_core::study::MessageKind;
    use studyguide_tools::flashcards::MakeFlashcardsTool;
    use studyguide_tools::mcqs::MakeMcqsTool;
    use studyguide_tools::speak::SpeakTool;

    fn input(message: &str) -> TurnInput {
        TurnInput {
            thread_id: ThreadId::from("thread-1"),
            system_prompt: "You are a helpful study guide AI assistant.".into(),
            history: vec![],
            user_message: message.into(),
            voice: "en-US-AriaNeural".into(),
        }
    }

    fn agent(provider: Arc<SequentialMockProvider>) -> AgentLoop {
        AgentLoop::new(provider, "mock-model", 0.7, Arc::new(EventBus::default()))
    }

    fn study_tools() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SpeakTool));
        registry.register(Box::new(MakeFlashcardsTool));
        registry.register(Box::new(MakeMcqsTool));
        registry
    }

    fn flashcards_call() -> MessageToolCall {
        make_tool_call(
            "make_flashcards",
            serde_json::json!({
                "screen_text": "Here are your flashcards",
                "cards": [{"question": "What is ATP?", "answer": "Energy currency"}]
            }),
        )
    }

    fn mcqs_call() -> MessageToolCall {
        make_tool_call(
            "make_mcqs",
            serde_json::json!({
                "screen_text": "Now a quick quiz",
                "items": [{"question": "Powerhouse?", "a": "Nucleus", "b": "Mitochondria",
                           "c": "Ribosome", "d": "Golgi", "answer": "b"}]
            }),
        )
    }

    #[tokio::test]
    async fn simple_text_response() {
        let provider = Arc::new(SequentialMockProvider::single_text("Osmosis is diffusion of water."));
        let outcome = agent(provider.clone())
            .run(&ToolRegistry::new(), input("What is osmosis?"))
            .await
            .unwrap();

        assert_eq!(outcome.screen_text, "Osmosis is diffusion of water.");
        assert_eq!(outcome.tokens_used, 15);
        assert_eq!(outcome.iterations, 1);

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "What is osmosis?");
    }

    #[tokio::test]
    async fn history_sits_between_system_and_new_message() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let mut turn = input("And plants?");
        turn.history = vec![
            Message::system("stale instruction"),
            Message::user("What is respiration?"),
            Message::assistant("Cells release energy."),
        ];
        agent(provider.clone()).run(&ToolRegistry::new(), turn).await.unwrap();

        let messages = &provider.requests()[0].messages;
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert!(!messages.iter().any(|m| m.content == "stale instruction"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_and_loop_continues() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("nonexistent_tool", serde_json::json!({}))], ""),
            make_text_response("Sorry, let me answer directly."),
        ]));
        let outcome = agent(provider.clone()).run(&study_tools(), input("hi")).await.unwrap();

        assert_eq!(provider.call_count(), 2);
        let second = &provider.requests()[1];
        let tool_msg = second.messages.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.content, "Unknown tool: nonexistent_tool");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_nonexistent_tool"));
        assert_eq!(outcome.screen_text, "Sorry, let me answer directly.");
        assert_eq!(outcome.tokens_used, 30);
    }

    #[tokio::test]
    async fn invalid_tool_arguments_are_fed_back() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![make_tool_call("make_mcqs", serde_json::json!({"screen_text": "x", "items": []}))],
                "",
            ),
            make_text_response("Let me explain instead."),
        ]));
        let outcome = agent(provider.clone()).run(&study_tools(), input("quiz me")).await.unwrap();

        let tool_msg = provider.requests()[1].messages.last().cloned().unwrap();
        assert!(tool_msg.content.starts_with("Error: Invalid tool arguments"));
        assert!(outcome.mcqs.is_empty());
        assert_eq!(message_kind(&outcome), MessageKind::Text);
    }

    #[tokio::test]
    async fn flashcards_then_mcqs_keeps_both_and_persists_as_mcqs() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![flashcards_call()], ""),
            make_tool_call_response(vec![mcqs_call()], ""),
            make_text_response("Done! Good luck."),
        ]));
        let outcome = agent(provider.clone()).run(&study_tools(), input("cards and quiz")).await.unwrap();

        assert_eq!(outcome.flashcards.len(), 1);
        assert_eq!(outcome.mcqs.len(), 1);
        assert_eq!(outcome.screen_text, "Now a quick quiz");
        assert_eq!(outcome.iterations, 3);

        let row = assistant_message(&ThreadId::from("thread-1"), &outcome);
        assert_eq!(row.kind, MessageKind::Mcqs);
        assert_eq!(row.content, "Now a quick quiz");
    }

    #[tokio::test]
    async fn model_sees_confirmations_not_payloads() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![flashcards_call()], ""),
            make_text_response("Enjoy."),
        ]));
        agent(provider.clone()).run(&study_tools(), input("cards")).await.unwrap();

        let tool_msg = provider.requests()[1].messages.last().cloned().unwrap();
        assert_eq!(tool_msg.content, "Flashcards generated successfully.");
        assert!(!tool_msg.content.contains("FLASHCARDS:"));
    }

    #[tokio::test]
    async fn iteration_cap_stops_a_tool_happy_model() {
        let looping = || make_tool_call_response(vec![make_tool_call("nonexistent_tool", serde_json::json!({}))], "");
        let provider = Arc::new(SequentialMockProvider::new(vec![looping(), looping(), looping()]));
        let outcome = agent(provider.clone())
            .with_max_iterations(3)
            .run(&study_tools(), input("loop"))
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 3);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.screen_text, ITERATION_LIMIT_TEXT);
    }

    #[tokio::test]
    async fn speech_is_synthesized_with_requested_voice() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(FakeSpeech::new());
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("speak", serde_json::json!({"text": "Listen up"}))], ""),
            make_text_response("Here is the audio explanation."),
        ]));
        let outcome = agent(provider)
            .with_speech(SpeechOutput::new(speech.clone(), dir.path()))
            .run(&study_tools(), TurnInput { voice: "hi-IN-SwaraNeural".into(), ..input("say it") })
            .await
            .unwrap();

        let file = outcome.audio_file.clone().unwrap();
        assert!(dir.path().join(&file).exists());
        assert_eq!(outcome.speech_text.as_deref(), Some("Listen up"));
        assert_eq!(outcome.screen_text, "Here is the audio explanation.");
        assert_eq!(speech.voices.lock().unwrap()[0], "hi-IN-SwaraNeural");
        assert_eq!(message_kind(&outcome), MessageKind::Voice);
    }

    #[tokio::test]
    async fn speech_failure_does_not_fail_the_turn() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("speak", serde_json::json!({"text": "Listen"}))], ""),
            make_text_response("Audio coming."),
        ]));
        let outcome = agent(provider)
            .with_speech(SpeechOutput::new(Arc::new(FakeSpeech::broken()), "/tmp"))
            .run(&study_tools(), input("say it"))
            .await
            .unwrap();

        assert!(outcome.audio_file.is_none());
        assert_eq!(message_kind(&outcome), MessageKind::Text);
    }

    #[tokio::test]
    async fn model_failure_aborts_the_turn() {
        let provider = Arc::new(SequentialMockProvider::failing(ProviderError::NotConfigured("no key".into())));
        let err = agent(provider).run(&ToolRegistry::new(), input("hi")).await.unwrap_err();
        assert!(matches!(err, studyguide_core::Error::Provider(_)));
    }

    #[tokio::test]
    async fn events_are_published_per_call_and_tool() {
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![flashcards_call()], ""),
            make_text_response("ok"),
        ]));
        AgentLoop::new(provider, "mock-model", 0.7, bus.clone())
            .run(&study_tools(), input("cards"))
            .await
            .unwrap();

        let mut generated = 0;
        let mut tools = 0;
        while let Ok(event) = events.try_recv() {
            match &*event {
                DomainEvent::ResponseGenerated { .. } => generated += 1,
                DomainEvent::ToolExecuted { success, .. } => {
                    assert!(success);
                    tools += 1;
                }
                _ => {}
            }
        }
        assert_eq!((generated, tools), (2, 1));
    }
}
