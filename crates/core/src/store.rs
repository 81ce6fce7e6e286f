//! Store trait: the relational row store behind users, notes, threads,
//! messages and uploaded files.
//!
//! Lookups of a single row return `Option` so "not found" stays distinct from
//! an empty list.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StoreError;
use crate::message::{Role, ThreadId};
use crate::study::{ChatMode, MessageKind, MessagePayload};

/// A user's profile as stored, without credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub display_name: Option<String>,
    pub about: Option<String>,
    pub strengths: Option<String>,
    pub weaknesses: Option<String>,
    pub tokens_used: u64,
}

impl Profile {
    /// The name shown to the model and the UI; falls back to the username.
    pub fn shown_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// Editable profile fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub strengths: Option<String>,
    #[serde(default)]
    pub weaknesses: Option<String>,
}

/// A dated reminder owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub date: NaiveDate,
    pub text: String,
}

/// A conversation owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub username: String,
    pub title: String,
    pub mode: ChatMode,
    pub created_at: DateTime<Utc>,
}

/// A message row to insert.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: ThreadId,
    pub role: Role,
    pub content: String,
    pub kind: MessageKind,
    pub payload: Option<MessagePayload>,
    pub audio_file: Option<String>,
    pub tokens_used: u64,
}

impl NewMessage {
    /// A plain user turn.
    pub fn user(thread_id: ThreadId, content: impl Into<String>) -> Self {
        Self {
            thread_id,
            role: Role::User,
            content: content.into(),
            kind: MessageKind::Text,
            payload: None,
            audio_file: None,
            tokens_used: 0,
        }
    }

    /// A plain-text assistant turn.
    pub fn assistant(thread_id: ThreadId, content: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            thread_id,
            role: Role::Assistant,
            content: content.into(),
            kind: MessageKind::Text,
            payload: None,
            audio_file: None,
            tokens_used,
        }
    }
}

/// A persisted message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub thread_id: ThreadId,
    pub role: Role,
    pub content: String,
    pub kind: MessageKind,
    pub payload: Option<MessagePayload>,
    pub audio_file: Option<String>,
    pub tokens_used: u64,
    pub created_at: DateTime<Utc>,
}

/// An uploaded file row to insert.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub username: String,
    pub thread_id: Option<ThreadId>,
    pub filename: String,
    pub stored_path: String,
}

/// A user's uploaded document. `thread_id == None` means pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: i64,
    pub username: String,
    pub thread_id: Option<ThreadId>,
    pub filename: String,
    pub stored_path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// The row store used by the chat service and the HTTP layer.
#[async_trait]
pub trait Store: Send + Sync {
    /// The backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    // --- Users ---

    /// Create a user. Returns `false` when the username is taken.
    async fn create_user(&self, username: &str, password_hash: &str) -> std::result::Result<bool, StoreError>;

    async fn password_hash(&self, username: &str) -> std::result::Result<Option<String>, StoreError>;

    async fn profile(&self, username: &str) -> std::result::Result<Option<Profile>, StoreError>;

    async fn update_profile(&self, username: &str, update: &ProfileUpdate) -> std::result::Result<(), StoreError>;

    /// Add to the user's running token counter.
    async fn add_tokens(&self, username: &str, tokens: u64) -> std::result::Result<(), StoreError>;

    // --- Notes ---

    /// All notes for the user, date ascending.
    async fn list_notes(&self, username: &str) -> std::result::Result<Vec<Note>, StoreError>;

    async fn add_note(&self, username: &str, date: NaiveDate, text: &str) -> std::result::Result<i64, StoreError>;

    /// Delete one of the user's notes. Returns `false` if it did not exist.
    async fn delete_note(&self, username: &str, id: i64) -> std::result::Result<bool, StoreError>;

    // --- Threads ---

    async fn create_thread(
        &self,
        username: &str,
        id: &ThreadId,
        title: &str,
        mode: ChatMode,
    ) -> std::result::Result<Thread, StoreError>;

    /// Fetch a thread owned by `username`.
    async fn get_thread(&self, username: &str, id: &ThreadId) -> std::result::Result<Option<Thread>, StoreError>;

    /// The user's threads, newest first.
    async fn list_threads(&self, username: &str) -> std::result::Result<Vec<Thread>, StoreError>;

    async fn rename_thread(&self, username: &str, id: &ThreadId, title: &str) -> std::result::Result<bool, StoreError>;

    /// Delete a thread, its messages and files, removing on-disk artifacts
    /// before the rows. Returns `false` if the thread did not exist.
    async fn delete_thread(&self, username: &str, id: &ThreadId) -> std::result::Result<bool, StoreError>;

    // --- Messages ---

    async fn append_message(&self, message: NewMessage) -> std::result::Result<i64, StoreError>;

    /// Messages of a thread in insertion order; the most recent `limit` when
    /// given. Empty for unknown threads.
    async fn thread_messages(
        &self,
        id: &ThreadId,
        limit: Option<usize>,
    ) -> std::result::Result<Vec<StoredMessage>, StoreError>;

    // --- Files ---

    async fn save_file(&self, file: NewFile) -> std::result::Result<UploadedFile, StoreError>;

    /// Attach all of the user's pending files to `id`. Returns how many moved.
    async fn attach_pending_files(&self, username: &str, id: &ThreadId) -> std::result::Result<u64, StoreError>;

    async fn thread_files(&self, id: &ThreadId) -> std::result::Result<Vec<UploadedFile>, StoreError>;

    /// The user's pending files (no thread yet).
    async fn pending_files(&self, username: &str) -> std::result::Result<Vec<UploadedFile>, StoreError>;

    /// Every file the user has uploaded.
    async fn user_files(&self, username: &str) -> std::result::Result<Vec<UploadedFile>, StoreError>;

    async fn get_file(&self, username: &str, id: i64) -> std::result::Result<Option<UploadedFile>, StoreError>;

    /// Delete a file row and its bytes. Returns `false` if it did not exist.
    async fn delete_file(&self, username: &str, id: i64) -> std::result::Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shown_name_falls_back_to_username() {
        let mut profile = Profile { username: "ana".into(), ..Default::default() };
        assert_eq!(profile.shown_name(), "ana");

        profile.display_name = Some("  ".into());
        assert_eq!(profile.shown_name(), "ana");

        profile.display_name = Some("Ana B.".into());
        assert_eq!(profile.shown_name(), "Ana B.");
    }

    #[test]
    fn new_user_message_is_plain_text() {
        let msg = NewMessage::user(ThreadId::from("t1"), "What is osmosis?");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.tokens_used, 0);
    }
}
