//! `ChatService`: the persistence boundary around the agent loop.
//!
//! A turn bootstraps its thread, persists the user message, runs the loop
//! and writes exactly one assistant row. Turns on the same thread are
//! serialized by a per-thread lock.

use chrono::{Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use studyguide_config::{AppConfig, SpeechConfig};
use studyguide_core::Error;
use studyguide_core::event::{DomainEvent, EventBus};
use studyguide_core::message::{Message, Role, ThreadId};
use studyguide_core::provider::{Provider, ProviderRequest};
use studyguide_core::store::{NewMessage, Store, StoredMessage, UploadedFile};
use studyguide_core::study::{Capability, ChatMode, Flashcard, Mcq, MessageKind};
use studyguide_core::document::truncate_chars;
use studyguide_tools::{PdfEntry, StudyToolbox};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::finalizer::{SpeechOutput, assistant_message};
use crate::loop_runner::{AgentLoop, TurnInput};
use crate::prompt::{PromptAssembler, PromptContext, PromptLimits, load_previews};
use crate::stream_event::StreamEvent;

type Result<T> = std::result::Result<T, Error>;

pub const FALLBACK_REPLY: &str = "Sorry, there was an error processing your request.";

const TITLE_CHARS: usize = 30;
const SUMMARY_CHARS: usize = 8000;
const NO_TEXT: &str = "Could not extract text from PDF.";

/// USD per million tokens used for the usage estimate.
const COST_PER_MILLION: f64 = 2.0;

/// Approximate spend for a token count, rounded to four decimals.
pub fn estimated_cost(tokens: u64) -> f64 {
    let cost = tokens as f64 / 1_000_000.0 * COST_PER_MILLION;
    (cost * 10_000.0).round() / 10_000.0
}

/// Thread title from the first message of the thread.
pub fn thread_title(first_message: &str) -> String {
    if first_message.chars().count() > TITLE_CHARS {
        format!("{}...", truncate_chars(first_message, TITLE_CHARS))
    } else {
        first_message.to_string()
    }
}

/// One chat turn as requested by the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    #[serde(default)]
    pub mode: ChatMode,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub voice_style: Option<String>,
}

/// What the client gets back for a turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub thread_id: ThreadId,
    pub kind: MessageKind,
    pub flashcards: Vec<Flashcard>,
    pub mcqs: Vec<Mcq>,
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_image: Option<String>,
}

impl ChatReply {
    fn fallback(thread_id: ThreadId) -> Self {
        Self {
            response: FALLBACK_REPLY.to_string(),
            thread_id,
            kind: MessageKind::Text,
            flashcards: Vec::new(),
            mcqs: Vec::new(),
            tokens_used: 0,
            audio_file: None,
            chart_image: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub summary: String,
    pub tokens_used: u64,
}

/// A student's answer to one test question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAnswer {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default)]
    pub user_answer: String,
    #[serde(rename = "type", default = "default_answer_type")]
    pub kind: String,
}

fn default_answer_type() -> String {
    "text".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerFeedback {
    #[serde(default)]
    pub correct: bool,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestScore {
    pub score: f64,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<AnswerFeedback>,
    #[serde(default)]
    pub tokens_used: u64,
}

fn grading_prompt(answers: &[TestAnswer]) -> String {
    let mut prompt = String::from(
        "You are a test evaluator. Score the following student answers and provide feedback.\n\nANSWERS TO EVALUATE:\n",
    );
    for (i, ans) in answers.iter().enumerate() {
        prompt.push_str(&format!("\n{}. Question: {}", i + 1, ans.question));
        prompt.push_str(&format!("\n   Correct Answer: {}", ans.correct_answer));
        prompt.push_str(&format!("\n   Student Answer: {}", ans.user_answer));
        prompt.push_str(&format!("\n   Type: {}\n", ans.kind));
    }
    prompt.push_str(
        "\n\nEvaluate each answer and provide:\n\
         1. A score out of 100 (be fair but accurate)\n\
         2. Brief feedback for each answer\n\
         3. Overall feedback\n\n\
         Respond in this exact JSON format:\n\
         {\"score\": <number>, \"feedback\": \"<overall feedback>\", \"details\": [{\"correct\": true/false, \"comment\": \"<brief comment>\"}]}",
    );
    prompt
}

/// Parse the model's grading reply: the first `{` to the last `}`.
fn parse_score(raw: &str) -> Option<TestScore> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

/// Per-thread async locks, pruned once no turn holds them.
#[derive(Default)]
struct ThreadLocks {
    inner: Mutex<HashMap<ThreadId, Arc<Mutex<()>>>>,
}

impl ThreadLocks {
    async fn acquire(&self, id: &ThreadId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

fn to_model_message(stored: StoredMessage) -> Option<Message> {
    match stored.role {
        Role::User => Some(Message::user(stored.content)),
        Role::Assistant => Some(Message::assistant(stored.content)),
        _ => None,
    }
}

fn pdf_catalog(files: Vec<UploadedFile>) -> Vec<PdfEntry> {
    files
        .into_iter()
        .map(|f| PdfEntry {
            filename: f.filename,
            path: PathBuf::from(f.stored_path),
        })
        .collect()
}

pub struct ChatService {
    store: Arc<dyn Store>,
    provider: Arc<dyn Provider>,
    toolbox: StudyToolbox,
    agent: AgentLoop,
    assembler: PromptAssembler,
    speech: SpeechConfig,
    model: String,
    temperature: f32,
    history_limit: usize,
    event_bus: Arc<EventBus>,
    locks: ThreadLocks,
    clock: fn() -> NaiveDateTime,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn Provider>,
        toolbox: StudyToolbox,
        event_bus: Arc<EventBus>,
        config: &AppConfig,
    ) -> Self {
        let agent = AgentLoop::new(
            provider.clone(),
            config.default_model.clone(),
            config.default_temperature,
            event_bus.clone(),
        )
        .with_max_iterations(config.agent.max_iterations)
        .with_max_tokens(config.default_max_tokens);

        let assembler = PromptAssembler::new(PromptLimits {
            max_notes: config.agent.max_notes,
            max_files: config.agent.max_files,
            preview_chars: config.agent.preview_chars,
            preview_pages: config.agent.preview_pages,
        });

        Self {
            store,
            provider,
            toolbox,
            agent,
            assembler,
            speech: config.speech.clone(),
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            history_limit: config.agent.history_limit,
            event_bus,
            locks: ThreadLocks::default(),
            clock: local_now,
        }
    }

    /// Attach speech output for turns that call `speak`.
    pub fn with_speech(mut self, speech: SpeechOutput) -> Self {
        self.agent = self.agent.with_speech(speech);
        self
    }

    /// Replace the wall clock used in prompts.
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Resolve the caller's thread, or start a new one titled after the
    /// first message with the caller's pending files attached.
    async fn open_thread(
        &self,
        username: &str,
        requested: Option<&ThreadId>,
        first_message: &str,
        mode: ChatMode,
    ) -> Result<ThreadId> {
        if let Some(id) = requested {
            return match self.store.get_thread(username, id).await? {
                Some(thread) => Ok(thread.id),
                None => Err(Error::NotFound(format!("thread {id}"))),
            };
        }

        let id = ThreadId::new();
        self.store
            .create_thread(username, &id, &thread_title(first_message), mode)
            .await?;
        let attached = self.store.attach_pending_files(username, &id).await?;
        info!(thread_id = %id, username, attached, "Started thread");
        Ok(id)
    }

    async fn history(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        let stored = self
            .store
            .thread_messages(thread_id, Some(self.history_limit))
            .await?;
        Ok(stored.into_iter().filter_map(to_model_message).collect())
    }

    async fn system_prompt(&self, username: &str, thread_id: &ThreadId, request: &ChatRequest) -> Result<String> {
        let profile = self.store.profile(username).await?;
        let notes = self.store.list_notes(username).await?;
        let files = self.store.thread_files(thread_id).await?;
        let previews = load_previews(self.toolbox.documents().as_ref(), &files, self.assembler.limits()).await;

        Ok(self.assembler.assemble(&PromptContext {
            mode: request.mode,
            capabilities: &request.capabilities,
            profile: profile.as_ref(),
            notes: &notes,
            files: &previews,
            now: (self.clock)(),
        }))
    }

    /// Run one tool-augmented turn.
    ///
    /// A model failure yields the fallback reply with nothing persisted for
    /// the assistant; store failures are returned as errors.
    pub async fn chat(&self, username: &str, request: ChatRequest) -> Result<ChatReply> {
        let thread_id = self
            .open_thread(username, request.thread_id.as_ref(), &request.message, request.mode)
            .await?;
        let _turn = self.locks.acquire(&thread_id).await;

        let history = self.history(&thread_id).await?;
        self.store
            .append_message(NewMessage::user(thread_id.clone(), request.message.clone()))
            .await?;

        let system_prompt = self.system_prompt(username, &thread_id, &request).await?;
        let catalog = pdf_catalog(self.store.user_files(username).await?);
        let tools = self.toolbox.registry(&request.capabilities, &catalog);

        let input = TurnInput {
            thread_id: thread_id.clone(),
            system_prompt,
            history,
            user_message: request.message.clone(),
            voice: self.speech.voice_for(request.voice_style.as_deref()),
        };

        let outcome = match self.agent.run(&tools, input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Chat turn failed");
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: "chat".into(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Ok(ChatReply::fallback(thread_id));
            }
        };

        let row = assistant_message(&thread_id, &outcome);
        let kind = row.kind;
        self.store.append_message(row).await?;
        self.store.add_tokens(username, outcome.tokens_used).await?;

        Ok(ChatReply {
            response: outcome.screen_text,
            thread_id,
            kind,
            flashcards: outcome.flashcards,
            mcqs: outcome.mcqs,
            tokens_used: outcome.tokens_used,
            audio_file: outcome.audio_file,
            chart_image: outcome.chart_image,
        })
    }

    /// Stream a tool-less reply.
    ///
    /// Returns the thread id and a channel of [`StreamEvent`]s ending in
    /// `Done` or `Error`. Token usage is estimated as twice the word count.
    pub async fn chat_stream(
        self: &Arc<Self>,
        username: &str,
        request: ChatRequest,
    ) -> Result<(ThreadId, mpsc::Receiver<StreamEvent>)> {
        let thread_id = self
            .open_thread(username, request.thread_id.as_ref(), &request.message, request.mode)
            .await?;
        let guard = self.locks.acquire(&thread_id).await;

        self.store
            .append_message(NewMessage::user(thread_id.clone(), request.message.clone()))
            .await?;

        let provider_request = ProviderRequest::plain(
            &self.model,
            self.temperature,
            vec![
                Message::system(self.assembler.streaming(request.mode, (self.clock)())),
                Message::user(request.message),
            ],
        );

        let (tx, rx) = mpsc::channel(64);
        let service = Arc::clone(self);
        let username = username.to_string();
        let stream_thread = thread_id.clone();

        tokio::spawn(async move {
            let _turn = guard;
            let event = service.pump_stream(&username, &stream_thread, provider_request, &tx).await;
            if let Some(event) = event {
                let _ = tx.send(event).await;
            }
        });

        Ok((thread_id, rx))
    }

    /// Forward chunks to `tx` and persist the reply. Returns the terminal
    /// event, or `None` if the client went away.
    async fn pump_stream(
        &self,
        username: &str,
        thread_id: &ThreadId,
        request: ProviderRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Option<StreamEvent> {
        let mut chunks = match self.provider.stream(request).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Stream request failed");
                return Some(StreamEvent::Error { content: e.to_string() });
            }
        };

        let mut full = String::new();
        while let Some(chunk) = chunks.recv().await {
            match chunk {
                Ok(chunk) => {
                    if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                        full.push_str(&content);
                        if tx.send(StreamEvent::Chunk { content }).await.is_err() {
                            debug!(thread_id = %thread_id, "Stream client disconnected");
                            return None;
                        }
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(e) => {
                    warn!(thread_id = %thread_id, error = %e, "Stream interrupted");
                    return Some(StreamEvent::Error { content: e.to_string() });
                }
            }
        }

        let tokens_used = full.split_whitespace().count() as u64 * 2;
        let persisted = async {
            self.store
                .append_message(NewMessage::assistant(thread_id.clone(), full, tokens_used))
                .await?;
            self.store.add_tokens(username, tokens_used).await
        };
        if let Err(e) = persisted.await {
            warn!(thread_id = %thread_id, error = %e, "Could not persist streamed reply");
            return Some(StreamEvent::Error { content: e.to_string() });
        }

        self.event_bus.publish(DomainEvent::ResponseGenerated {
            thread_id: thread_id.to_string(),
            model: self.model.clone(),
            tokens_used,
            timestamp: Utc::now(),
        });

        Some(StreamEvent::Done {
            thread_id: thread_id.to_string(),
            tokens_used,
        })
    }

    /// Summarize one of the caller's uploads as a whole.
    pub async fn summarize_document(&self, username: &str, file_id: i64) -> Result<DocumentSummary> {
        let file = self
            .store
            .get_file(username, file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {file_id}")))?;

        let text = self
            .toolbox
            .documents()
            .extract(std::path::Path::new(&file.stored_path), None)
            .await?
            .full_text();

        if text.trim().is_empty() {
            return Ok(DocumentSummary {
                summary: NO_TEXT.into(),
                tokens_used: 0,
            });
        }

        let prompt = format!(
            "Please provide a comprehensive summary of the following document:\n\n{}",
            truncate_chars(&text, SUMMARY_CHARS)
        );
        let response = self
            .provider
            .complete(ProviderRequest::plain(&self.model, self.temperature, vec![Message::user(prompt)]))
            .await?;

        let tokens_used = response.total_tokens();
        self.store.add_tokens(username, tokens_used).await?;
        info!(username, file = %file.filename, tokens_used, "Document summarized");

        Ok(DocumentSummary {
            summary: response.message.content,
            tokens_used,
        })
    }

    /// Grade a submitted test with the model.
    pub async fn score_test(&self, username: &str, answers: &[TestAnswer]) -> Result<TestScore> {
        if answers.is_empty() {
            return Ok(TestScore {
                score: 0.0,
                feedback: "No answers provided".into(),
                details: Vec::new(),
                tokens_used: 0,
            });
        }

        let response = self
            .provider
            .complete(ProviderRequest::plain(
                &self.model,
                self.temperature,
                vec![Message::user(grading_prompt(answers))],
            ))
            .await?;

        let tokens_used = response.total_tokens();
        self.store.add_tokens(username, tokens_used).await?;

        let raw = response.message.content;
        let score = match parse_score(&raw) {
            Some(score) => TestScore { tokens_used, ..score },
            None => {
                debug!(username, "Grading reply was not JSON, using fallback score");
                TestScore {
                    score: 50.0,
                    feedback: raw,
                    details: Vec::new(),
                    tokens_used,
                }
            }
        };
        Ok(score)
    }

    /// Delete one of the caller's threads with everything it owns.
    pub async fn delete_thread(&self, username: &str, thread_id: &ThreadId) -> Result<bool> {
        let _turn = self.locks.acquire(thread_id).await;
        let deleted = self.store.delete_thread(username, thread_id).await?;
        if deleted {
            info!(thread_id = %thread_id, username, "Thread deleted");
            self.event_bus.publish(DomainEvent::ThreadDeleted {
                thread_id: thread_id.to_string(),
                username: username.to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(deleted)
    }

    /// Messages of one of the caller's threads, oldest first.
    ///
    /// A thread that no longer exists has no history. Another user's thread
    /// with messages is refused.
    pub async fn thread_history(&self, username: &str, thread_id: &ThreadId) -> Result<Vec<StoredMessage>> {
        let owned = self.store.get_thread(username, thread_id).await?.is_some();
        let messages = self.store.thread_messages(thread_id, None).await?;
        if !owned && !messages.is_empty() {
            return Err(Error::NotFound(format!("thread {thread_id}")));
        }
        Ok(messages)
    }
}
