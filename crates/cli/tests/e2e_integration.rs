//! End-to-end integration tests for the StudyGuide backend.
//!
//! These tests drive whole turns through `ChatService` (prompt assembly,
//! the tool loop, artifact extraction, speech output and persistence) and
//! the HTTP router on top of it, against an in-memory SQLite store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use studyguide_agent::{ChatRequest, ChatService, SpeechOutput};
use studyguide_config::AppConfig;
use studyguide_core::document::{DiagramImage, DiagramRenderer, DocumentSource, ExtractedText};
use studyguide_core::error::{DocumentError, ProviderError, RenderError, SpeechError};
use studyguide_core::message::{Message, MessageToolCall, Role};
use studyguide_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use studyguide_core::{Capability, EventBus, MessageKind, NewFile, SpeechSynthesizer, Store};
use studyguide_storage::SqliteStore;
use studyguide_tools::StudyToolbox;

// ── Mock collaborators ───────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence and keeps
/// every request it saw.
struct ScriptedProvider {
    responses: Vec<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let call = requests.len();
        if call >= self.responses.len() {
            panic!("ScriptedProvider exhausted: call #{call}, have {}", self.responses.len());
        }
        requests.push(request);
        Ok(self.responses[call].clone())
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
    }
}

fn tool_response(name: &str, args: serde_json::Value) -> ProviderResponse {
    let mut msg = Message::assistant("");
    msg.tool_calls = vec![MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }];
    ProviderResponse {
        message: msg,
        usage: Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
        }),
        model: "mock".into(),
    }
}

/// Every document has `pages` pages reading "page N".
struct PagedDocs {
    pages: usize,
}

#[async_trait]
impl DocumentSource for PagedDocs {
    async fn extract(&self, _path: &Path, max_pages: Option<usize>) -> Result<ExtractedText, DocumentError> {
        let take = max_pages.unwrap_or(self.pages).min(self.pages);
        Ok(ExtractedText {
            pages: (1..=take).map(|n| format!("page {n} ")).collect(),
            total_pages: self.pages,
        })
    }
}

struct PngRenderer;

#[async_trait]
impl DiagramRenderer for PngRenderer {
    async fn render(&self, _source: &str) -> Result<DiagramImage, RenderError> {
        Ok(DiagramImage {
            content_type: "image/png".into(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        })
    }
}

struct RecordingSpeech {
    voices: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesizer for RecordingSpeech {
    fn name(&self) -> &str {
        "recording"
    }

    async fn synthesize(&self, _text: &str, voice: &str) -> Result<Vec<u8>, SpeechError> {
        self.voices.lock().unwrap().push(voice.to_string());
        Ok(b"ID3 fake mp3".to_vec())
    }
}

struct Harness {
    service: Arc<ChatService>,
    store: Arc<SqliteStore>,
    provider: Arc<ScriptedProvider>,
    speech: Arc<RecordingSpeech>,
    config: AppConfig,
    dir: tempfile::TempDir,
}

async fn harness(responses: Vec<ProviderResponse>, pages: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.audio_dir = dir.path().join("audio");
    config.storage.uploads_dir = dir.path().join("uploads");
    config.auth.bcrypt_cost = 4;
    std::fs::create_dir_all(&config.storage.audio_dir).unwrap();
    std::fs::create_dir_all(&config.storage.uploads_dir).unwrap();

    let store = Arc::new(
        SqliteStore::new("sqlite::memory:", config.storage.audio_dir.clone())
            .await
            .unwrap(),
    );
    store.create_user("ana", "hash").await.unwrap();

    let provider = Arc::new(ScriptedProvider::new(responses));
    let speech = Arc::new(RecordingSpeech {
        voices: Mutex::new(Vec::new()),
    });
    let toolbox = StudyToolbox::new(
        provider.clone(),
        Arc::new(PagedDocs { pages }),
        Arc::new(PngRenderer),
        "mock",
        0.7,
    );
    let service = ChatService::new(
        store.clone(),
        provider.clone(),
        toolbox,
        Arc::new(EventBus::default()),
        &config,
    )
    .with_speech(SpeechOutput::new(speech.clone(), config.storage.audio_dir.clone()));

    Harness {
        service: Arc::new(service),
        store,
        provider,
        speech,
        config,
        dir,
    }
}

fn ask(message: &str, capabilities: &[Capability]) -> ChatRequest {
    ChatRequest {
        message: message.into(),
        capabilities: capabilities.iter().copied().collect(),
        ..Default::default()
    }
}

// ── E2E: artifact turns ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_flashcards_survive_persistence() {
    let h = harness(
        vec![
            tool_response(
                "make_flashcards",
                serde_json::json!({
                    "screen_text": "Here are your cell biology cards.",
                    "cards": [
                        {"question": "What makes ATP?", "answer": "Mitochondria", "hint": "Powerhouse"},
                        {"question": "Where is DNA stored?", "answer": "Nucleus"}
                    ]
                }),
            ),
            text_response("I made two flashcards for you."),
        ],
        1,
    )
    .await;

    let reply = h
        .service
        .chat("ana", ask("Make flashcards on cells", &[Capability::Flashcards]))
        .await
        .unwrap();

    assert_eq!(reply.kind, MessageKind::Flashcards);
    assert_eq!(reply.response, "Here are your cell biology cards.");
    assert_eq!(reply.flashcards.len(), 2);
    assert_eq!(reply.flashcards[1].hint, None);
    assert_eq!(reply.tokens_used, 45);

    // The model only ever saw the confirmation, not the card payload.
    let second = h.provider.request(1);
    let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_msg.content, "Flashcards generated successfully.");

    let rows = h.store.thread_messages(&reply.thread_id, None).await.unwrap();
    let stored = rows.last().unwrap();
    assert_eq!(stored.kind, MessageKind::Flashcards);
    assert_eq!(stored.payload.as_ref().unwrap().flashcards, reply.flashcards);
}

#[tokio::test]
async fn e2e_chart_turn_returns_data_uri() {
    let h = harness(
        vec![
            tool_response(
                "render_chart",
                serde_json::json!({"diagram_source": "```mermaid\ngraph TD; A-->B\n```"}),
            ),
            text_response("Here is the flow."),
        ],
        1,
    )
    .await;

    let reply = h
        .service
        .chat("ana", ask("Draw the flow", &[Capability::Chart]))
        .await
        .unwrap();

    assert_eq!(reply.kind, MessageKind::Chart);
    assert_eq!(reply.response, "Here is the flow.");
    assert!(reply.chart_image.unwrap().starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn e2e_disabled_tools_are_not_offered() {
    let h = harness(vec![text_response("Plain answer.")], 1).await;

    h.service.chat("ana", ask("Hi", &[])).await.unwrap();

    let tools: Vec<String> = h.provider.request(0).tools.iter().map(|t| t.name.clone()).collect();
    assert_eq!(tools, vec!["summarize_pdf".to_string()]);
}

#[tokio::test]
async fn e2e_speech_turn_writes_audio_and_thread_delete_removes_it() {
    let h = harness(
        vec![
            tool_response("speak", serde_json::json!({"text": "Osmosis moves water."})),
            text_response("Osmosis moves water across membranes."),
        ],
        1,
    )
    .await;

    let mut request = ask("Explain osmosis aloud", &[Capability::Voice]);
    request.voice_style = Some("male-english".into());
    let reply = h.service.chat("ana", request).await.unwrap();

    assert_eq!(reply.kind, MessageKind::Voice);
    let audio_file = reply.audio_file.clone().unwrap();
    let audio_path = h.config.storage.audio_dir.join(&audio_file);
    assert!(audio_path.exists());
    assert_eq!(h.speech.voices.lock().unwrap().as_slice(), ["en-US-ChristopherNeural".to_string()]);

    assert!(h.service.delete_thread("ana", &reply.thread_id).await.unwrap());
    assert!(!audio_path.exists());
    assert!(h.store.thread_messages(&reply.thread_id, None).await.unwrap().is_empty());
}

// ── E2E: tool loop edge cases ────────────────────────────────────────────

#[tokio::test]
async fn e2e_unknown_tool_is_reported_back_to_the_model() {
    let h = harness(
        vec![
            tool_response("nonexistent_tool", serde_json::json!({})),
            text_response("Sorry, let me answer directly."),
        ],
        1,
    )
    .await;

    let reply = h.service.chat("ana", ask("Do something", &[])).await.unwrap();

    assert_eq!(reply.response, "Sorry, let me answer directly.");
    assert_eq!(h.provider.calls(), 2);
    let second = h.provider.request(1);
    let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.content.contains("Unknown tool: nonexistent_tool"));
}

#[tokio::test]
async fn e2e_long_pdf_is_summarized_then_refined() {
    let h = harness(
        vec![
            tool_response(
                "summarize_pdf",
                serde_json::json!({"filename": "biology", "prompt": "Summarize the chapter"}),
            ),
            text_response("initial summary"),
            text_response("refined 1"),
            text_response("refined 2"),
            text_response("refined 3"),
            text_response("The chapter covers cells."),
        ],
        23,
    )
    .await;

    let pdf_path = h.dir.path().join("uploads").join("ana_0000abcd_biology.pdf");
    std::fs::write(&pdf_path, b"%PDF-1.4").unwrap();
    h.store
        .save_file(NewFile {
            username: "ana".into(),
            thread_id: None,
            filename: "Biology.pdf".into(),
            stored_path: pdf_path.to_string_lossy().into_owned(),
        })
        .await
        .unwrap();

    let reply = h.service.chat("ana", ask("Summarize my biology PDF", &[])).await.unwrap();

    assert_eq!(reply.response, "The chapter covers cells.");
    assert_eq!(h.provider.calls(), 6);

    let refine_windows: Vec<String> = (2..=4)
        .map(|n| h.provider.request(n).messages.last().unwrap().content.clone())
        .collect();
    assert!(refine_windows[0].contains("page 11 ") && refine_windows[0].contains("page 15 "));
    assert!(refine_windows[1].contains("page 16 ") && refine_windows[1].contains("page 20 "));
    assert!(refine_windows[2].contains("page 21 ") && refine_windows[2].contains("page 23 "));
    assert!(refine_windows[0].contains("initial summary"));

    // The pending upload was attached to the new thread.
    let files = h.store.thread_files(&reply.thread_id).await.unwrap();
    assert_eq!(files.len(), 1);
}

// ── E2E: HTTP surface over the same service ──────────────────────────────

mod http {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use studyguide_gateway::{GatewayState, build_router};
    use tower::ServiceExt;

    async fn call(app: &axum::Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    fn post(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn e2e_register_login_and_quiz_over_http() {
        let h = harness(
            vec![
                tool_response(
                    "make_mcqs",
                    serde_json::json!({
                        "screen_text": "Quiz time!",
                        "items": [{
                            "question": "Which organelle makes ATP?",
                            "a": "Nucleus", "b": "Mitochondria", "c": "Ribosome", "d": "Golgi",
                            "answer": "b"
                        }]
                    }),
                ),
                text_response("Good luck."),
            ],
            1,
        )
        .await;
        let state = Arc::new(GatewayState::new(h.config.clone(), h.service.clone()));
        let app = build_router(state);

        let creds = serde_json::json!({"username": "ben", "password": "pw"});
        let (status, _) = call(&app, post("/api/register", None, creds.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (_, login) = call(&app, post("/api/login", None, creds)).await;
        let token = login["token"].as_str().unwrap().to_string();

        let body = serde_json::json!({
            "message": "Quiz me on organelles",
            "chat_mode": "test",
            "enabled_tools": ["mcqs"],
        });
        let (status, reply) = call(&app, post("/api/chat", Some(&token), body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["type"], "mcqs");
        assert_eq!(reply["response"], "Quiz time!");
        assert_eq!(reply["mcqs"][0]["answer"], "b");

        let thread_id = reply["thread_id"].as_str().unwrap();
        let (_, history) = call(
            &app,
            Request::builder()
                .uri(format!("/api/threads/{thread_id}/messages"))
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(history[1]["type"], "mcqs");
        assert_eq!(history[1]["mcqs"][0]["question"], "Which organelle makes ATP?");

        // Test mode reached the system prompt.
        let system = &h.provider.request(0).messages[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("TEST MODE"));
    }
}
