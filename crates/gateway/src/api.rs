//! `/api` routes: accounts, profile, notes, files, threads and chat.
//!
//! Every protected handler acts as the [`CurrentUser`] resolved by the
//! session middleware. Thread-scoped routes answer 404 for threads the
//! caller does not own.

use axum::{
    Extension, Router,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Json,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::path::Path as FsPath;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use studyguide_agent::{ChatRequest, DocumentSummary, TestAnswer, TestScore, estimated_cost};
use studyguide_core::{
    Capability, ChatMode, Flashcard, Mcq, MessageKind, NewFile, ProfileUpdate, Role, ThreadId, UploadedFile,
};

use crate::SharedState;
use crate::auth::{self, CurrentUser};
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

/// Routes reachable without a session.
pub fn public_router() -> Router<SharedState> {
    Router::new()
        .route("/api/register", post(register_handler))
        .route("/api/login", post(login_handler))
        .route("/api/audio/{filename}", get(audio_handler))
}

/// Routes that require a bearer session.
pub fn protected_router() -> Router<SharedState> {
    Router::new()
        .route("/api/logout", post(logout_handler))
        .route("/api/profile", get(get_profile).post(update_profile))
        .route("/api/notes", get(list_notes).post(add_note))
        .route("/api/notes/{id}", delete(delete_note))
        .route("/api/upload", post(upload_handler))
        .route("/api/files", get(list_files))
        .route("/api/files/{id}", delete(delete_file))
        .route("/api/summarize-pdf", post(summarize_pdf_handler))
        .route("/api/score-test", post(score_test_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route("/api/threads", get(list_threads))
        .route("/api/threads/{id}", delete(delete_thread).patch(rename_thread))
        .route("/api/threads/{id}/messages", get(thread_messages))
        .route("/api/threads/{id}/files", get(thread_files))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

fn ok(status: &'static str) -> Json<StatusResponse> {
    Json(StatusResponse { status })
}

// ── Accounts ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: &'static str,
    pub token: String,
    pub username: String,
}

async fn register_handler(
    State(state): State<SharedState>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    let hash = auth::hash_password(&req.password, state.config.auth.bcrypt_cost).await?;
    if !state.store().create_user(username, &hash).await? {
        return Err(ApiError::bad_request("User exists"));
    }

    info!(user = %username, "User registered");
    Ok(ok("registered"))
}

async fn login_handler(
    State(state): State<SharedState>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let username = req.username.trim();
    let invalid = || ApiError::new(StatusCode::UNAUTHORIZED, "Invalid credentials");

    let Some(hash) = state.store().password_hash(username).await? else {
        return Err(invalid());
    };
    if !auth::verify_password(&req.password, &hash).await? {
        warn!(user = %username, "Failed login");
        return Err(invalid());
    }

    let token = state.sessions.issue(username).await;
    info!(user = %username, "User logged in");
    Ok(Json(LoginResponse {
        status: "ok",
        token,
        username: username.to_string(),
    }))
}

async fn logout_handler(State(state): State<SharedState>, headers: HeaderMap) -> Json<StatusResponse> {
    if let Some(token) = auth::bearer_token(&headers) {
        state.sessions.revoke(token).await;
    }
    ok("logged_out")
}

// ── Profile ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub username: String,
    pub display_name: String,
    pub about: Option<String>,
    pub strengths: Option<String>,
    pub weaknesses: Option<String>,
    pub tokens_used: u64,
    pub cost: f64,
}

async fn get_profile(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<ProfileResponse>> {
    let profile = state
        .store()
        .profile(&user.username)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(ProfileResponse {
        display_name: profile.shown_name().to_string(),
        cost: estimated_cost(profile.tokens_used),
        tokens_used: profile.tokens_used,
        about: profile.about,
        strengths: profile.strengths,
        weaknesses: profile.weaknesses,
        username: profile.username,
    }))
}

async fn update_profile(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<StatusResponse>> {
    state.store().update_profile(&user.username, &update).await?;
    Ok(ok("updated"))
}

// ── Notes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct NoteInfo {
    pub id: i64,
    pub date: NaiveDate,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub date: NaiveDate,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct NoteCreated {
    pub status: &'static str,
    pub id: i64,
}

async fn list_notes(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<NoteInfo>>> {
    let notes = state.store().list_notes(&user.username).await?;
    Ok(Json(
        notes
            .into_iter()
            .map(|n| NoteInfo {
                id: n.id,
                date: n.date,
                text: n.text,
            })
            .collect(),
    ))
}

async fn add_note(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<NoteRequest>,
) -> ApiResult<Json<NoteCreated>> {
    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("Note text is required"));
    }
    let id = state.store().add_note(&user.username, req.date, req.text.trim()).await?;
    Ok(Json(NoteCreated { status: "added", id }))
}

async fn delete_note(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<StatusResponse>> {
    if !state.store().delete_note(&user.username, id).await? {
        return Err(ApiError::not_found("Note not found"));
    }
    Ok(ok("deleted"))
}

// ── Files ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub id: i64,
    pub filename: String,
    pub thread_id: Option<ThreadId>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<UploadedFile> for FileInfo {
    fn from(f: UploadedFile) -> Self {
        Self {
            id: f.id,
            filename: f.filename,
            thread_id: f.thread_id,
            uploaded_at: f.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub file_id: i64,
    pub filename: String,
    pub thread_id: Option<ThreadId>,
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
}

/// Reduce an uploaded filename to a safe basename.
///
/// Directory components are dropped, whitespace becomes `_`, and anything
/// outside `[A-Za-z0-9._-]` is removed along with leading dots.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}

async fn upload_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut thread_id: Option<ThreadId> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid upload: {e}")))?;
                upload = Some((name, bytes.to_vec()));
            }
            Some("thread_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid upload: {e}")))?;
                let value = value.trim();
                if !value.is_empty() {
                    thread_id = Some(ThreadId::from(value));
                }
            }
            _ => {}
        }
    }

    let Some((original_name, bytes)) = upload else {
        return Err(ApiError::bad_request("No file part"));
    };
    if original_name.is_empty() {
        return Err(ApiError::bad_request("No selected file"));
    }

    let filename = sanitize_filename(&original_name);
    if !filename.to_ascii_lowercase().ends_with(".pdf") || filename.len() <= ".pdf".len() {
        return Err(ApiError::bad_request("Only PDF files are allowed"));
    }

    if let Some(id) = &thread_id {
        if state.store().get_thread(&user.username, id).await?.is_none() {
            return Err(ApiError::not_found("Thread not found"));
        }
    }

    let uploads_dir = &state.config.storage.uploads_dir;
    let short_id = Uuid::new_v4().simple().to_string();
    let stored_name = format!("{}_{}_{}", user.username, &short_id[..8], filename);
    let stored_path = uploads_dir.join(&stored_name);

    tokio::fs::create_dir_all(uploads_dir)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create upload dir: {e}")))?;
    tokio::fs::write(&stored_path, &bytes)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to save upload: {e}")))?;

    let saved = state
        .store()
        .save_file(NewFile {
            username: user.username.clone(),
            thread_id: thread_id.clone(),
            filename: filename.clone(),
            stored_path: stored_path.to_string_lossy().into_owned(),
        })
        .await?;

    info!(user = %user.username, file = %filename, bytes = bytes.len(), pending = thread_id.is_none(), "File uploaded");
    Ok(Json(UploadResponse {
        status: "uploaded",
        file_id: saved.id,
        filename: saved.filename,
        thread_id: saved.thread_id,
    }))
}

async fn list_files(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<FilesQuery>,
) -> ApiResult<Json<Vec<FileInfo>>> {
    let files = match query.thread_id {
        Some(id) => owned_thread_files(&state, &user, &id).await?,
        None => state.store().pending_files(&user.username).await?,
    };
    Ok(Json(files.into_iter().map(FileInfo::from).collect()))
}

async fn thread_files(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<FileInfo>>> {
    let files = owned_thread_files(&state, &user, &ThreadId(id)).await?;
    Ok(Json(files.into_iter().map(FileInfo::from).collect()))
}

async fn owned_thread_files(state: &SharedState, user: &CurrentUser, id: &ThreadId) -> ApiResult<Vec<UploadedFile>> {
    if state.store().get_thread(&user.username, id).await?.is_none() {
        return Err(ApiError::not_found("Thread not found"));
    }
    Ok(state.store().thread_files(id).await?)
}

async fn delete_file(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<StatusResponse>> {
    if !state.store().delete_file(&user.username, id).await? {
        return Err(ApiError::not_found("File not found"));
    }
    Ok(ok("deleted"))
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub file_id: i64,
}

async fn summarize_pdf_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<SummarizeRequest>,
) -> ApiResult<Json<DocumentSummary>> {
    let summary = state.service.summarize_document(&user.username, req.file_id).await?;
    Ok(Json(summary))
}

// ── Test scoring ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    #[serde(default)]
    pub answers: Vec<TestAnswer>,
}

async fn score_test_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<ScoreRequest>,
) -> ApiResult<Json<TestScore>> {
    let score = state.service.score_test(&user.username, &req.answers).await?;
    Ok(Json(score))
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// Chat request body as the web client sends it.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    #[serde(default, alias = "mode")]
    pub chat_mode: Option<String>,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub voice_style: Option<String>,
}

impl ChatBody {
    /// Unknown tool names are ignored.
    fn into_request(self) -> ApiResult<ChatRequest> {
        if self.message.trim().is_empty() {
            return Err(ApiError::bad_request("Message is required"));
        }
        let capabilities: BTreeSet<Capability> =
            self.enabled_tools.iter().filter_map(|t| Capability::parse(t)).collect();

        Ok(ChatRequest {
            message: self.message,
            thread_id: self.thread_id.filter(|id| !id.as_str().is_empty()),
            mode: self.chat_mode.as_deref().map(ChatMode::parse).unwrap_or_default(),
            capabilities,
            voice_style: self.voice_style,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub thread_id: ThreadId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub flashcards: Vec<Flashcard>,
    pub mcqs: Vec<Mcq>,
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_image: Option<String>,
}

/// The public URL of an audio file, if it is still on disk.
async fn audio_url(audio_dir: &FsPath, file: Option<&str>) -> Option<String> {
    let file = file?;
    match tokio::fs::try_exists(audio_dir.join(file)).await {
        Ok(true) => Some(format!("/api/audio/{file}")),
        _ => None,
    }
}

async fn chat_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<ChatResponse>> {
    let request = body.into_request()?;
    let reply = state.service.chat(&user.username, request).await?;

    let audio_url = audio_url(&state.config.storage.audio_dir, reply.audio_file.as_deref()).await;
    Ok(Json(ChatResponse {
        response: reply.response,
        thread_id: reply.thread_id,
        kind: reply.kind,
        flashcards: reply.flashcards,
        mcqs: reply.mcqs,
        tokens_used: reply.tokens_used,
        audio_url,
        chart_image: reply.chart_image,
    }))
}

/// Streamed chat via Server-Sent Events.
///
/// Each event is named after its type (`chunk`, `done`, `error`) and carries
/// the JSON-encoded event as data.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let request = body.into_request()?;
    let (_thread_id, rx) = state.service.chat_stream(&user.username, request).await?;

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok(SseEvent::default()
            .event(event.event_type())
            .data(serde_json::to_string(&event).unwrap_or_default()))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── Audio ─────────────────────────────────────────────────────────────────

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..")
}

async fn audio_handler(State(state): State<SharedState>, Path(filename): Path<String>) -> ApiResult<impl IntoResponse> {
    if !is_plain_file_name(&filename) {
        warn!(file = %filename, "Rejected audio path");
        return Err(ApiError::bad_request("Invalid file name"));
    }

    let path = state.config.storage.audio_dir.join(&filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "audio/mpeg")], bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ApiError::not_found("File not found")),
        Err(e) => Err(ApiError::internal(format!("Failed to read audio: {e}"))),
    }
}

// ── Threads ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub title: String,
    pub mode: ChatMode,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flashcards: Vec<Flashcard>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mcqs: Vec<Mcq>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub tokens_used: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

async fn list_threads(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<ThreadInfo>>> {
    let threads = state.store().list_threads(&user.username).await?;
    Ok(Json(
        threads
            .into_iter()
            .map(|t| ThreadInfo {
                id: t.id,
                title: t.title,
                mode: t.mode,
                created_at: t.created_at,
            })
            .collect(),
    ))
}

async fn delete_thread(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    if !state.service.delete_thread(&user.username, &ThreadId(id)).await? {
        return Err(ApiError::not_found("Thread not found"));
    }
    Ok(ok("deleted"))
}

async fn rename_thread(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title is required"));
    }
    if !state.store().rename_thread(&user.username, &ThreadId(id), title).await? {
        return Err(ApiError::not_found("Thread not found"));
    }
    Ok(ok("renamed"))
}

async fn thread_messages(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<HistoryMessage>>> {
    let messages = state.service.thread_history(&user.username, &ThreadId(id)).await?;
    let audio_dir = &state.config.storage.audio_dir;

    let mut history = Vec::with_capacity(messages.len());
    for m in messages {
        let audio_url = audio_url(audio_dir, m.audio_file.as_deref()).await;
        let payload = m.payload.unwrap_or_default();
        history.push(HistoryMessage {
            role: m.role,
            content: m.content,
            kind: m.kind,
            flashcards: payload.flashcards,
            mcqs: payload.mcqs,
            audio_url,
            tokens_used: m.tokens_used,
            created_at: m.created_at,
        });
    }
    Ok(Json(history))
}
