//! SQLite row store.
//!
//! One database file with five tables:
//! - `users`: credentials, profile fields and the running token counter
//! - `notes`: dated reminders
//! - `threads`: conversations, owned by a user
//! - `messages`: thread entries, ordered by their autoincrement id
//! - `files`: uploaded documents; `thread_id IS NULL` marks a pending file
//!
//! Deleting a thread removes audio and uploaded files from disk before the
//! rows go, so a failed removal never leaves rows pointing at nothing.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use studyguide_core::error::StoreError;
use studyguide_core::message::{Role, ThreadId};
use studyguide_core::store::*;
use studyguide_core::study::{ChatMode, MessageKind, MessagePayload};
use tracing::{debug, info, warn};

const NOTE_DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite implementation of [`Store`].
pub struct SqliteStore {
    pool: SqlitePool,
    audio_dir: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// `audio_dir` is where message audio files live; thread deletion removes
    /// them from there. Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str, audio_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Every connection to :memory: is its own database, so pin to one.
        let in_memory = path.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self {
            pool,
            audio_dir: audio_dir.into(),
        };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Open the database at a filesystem path, creating parent directories.
    pub async fn open(db_path: &Path, audio_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Storage(format!("Failed to create {}: {e}", parent.display())))?;
        }
        Self::new(&format!("sqlite://{}", db_path.display()), audio_dir).await
    }

    /// Run schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements: [(&str, &str); 8] = [
            (
                "users table",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    username      TEXT PRIMARY KEY,
                    password_hash TEXT NOT NULL,
                    display_name  TEXT,
                    about         TEXT,
                    strengths     TEXT,
                    weaknesses    TEXT,
                    tokens_used   INTEGER NOT NULL DEFAULT 0,
                    created_at    TEXT NOT NULL
                )
                "#,
            ),
            (
                "notes table",
                r#"
                CREATE TABLE IF NOT EXISTS notes (
                    id       INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    date     TEXT NOT NULL,
                    text     TEXT NOT NULL
                )
                "#,
            ),
            (
                "threads table",
                r#"
                CREATE TABLE IF NOT EXISTS threads (
                    id         TEXT PRIMARY KEY,
                    username   TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    title      TEXT NOT NULL,
                    mode       TEXT NOT NULL DEFAULT 'study',
                    created_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    thread_id   TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                    role        TEXT NOT NULL,
                    content     TEXT NOT NULL,
                    kind        TEXT NOT NULL DEFAULT 'text',
                    payload     TEXT,
                    audio_file  TEXT,
                    tokens_used INTEGER NOT NULL DEFAULT 0,
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "files table",
                r#"
                CREATE TABLE IF NOT EXISTS files (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    username    TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    thread_id   TEXT REFERENCES threads(id) ON DELETE CASCADE,
                    filename    TEXT NOT NULL,
                    stored_path TEXT NOT NULL,
                    uploaded_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "notes index",
                "CREATE INDEX IF NOT EXISTS idx_notes_user_date ON notes(username, date)",
            ),
            (
                "messages index",
                "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, id)",
            ),
            (
                "files index",
                "CREATE INDEX IF NOT EXISTS idx_files_user_thread ON files(username, thread_id)",
            ),
        ];

        for (label, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{label}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Remove a file if it is there; a missing file is not an error.
    async fn remove_artifact(path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::ArtifactRemoval {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn row_to_thread(row: &SqliteRow) -> Result<Thread, StoreError> {
        let mode: String = col(row, "mode")?;
        Ok(Thread {
            id: ThreadId(col(row, "id")?),
            username: col(row, "username")?,
            title: col(row, "title")?,
            mode: ChatMode::parse(&mode),
            created_at: parse_timestamp(&col::<String>(row, "created_at")?),
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<StoredMessage, StoreError> {
        let role: String = col(row, "role")?;
        let kind: String = col(row, "kind")?;
        let payload: Option<String> = col(row, "payload")?;
        let tokens: i64 = col(row, "tokens_used")?;

        let payload = match payload {
            Some(json) => Some(
                serde_json::from_str::<MessagePayload>(&json)
                    .map_err(|e| StoreError::QueryFailed(format!("payload column: {e}")))?,
            ),
            None => None,
        };

        Ok(StoredMessage {
            id: col(row, "id")?,
            thread_id: ThreadId(col(row, "thread_id")?),
            role: if role == "assistant" { Role::Assistant } else { Role::User },
            content: col(row, "content")?,
            kind: MessageKind::parse(&kind),
            payload,
            audio_file: col(row, "audio_file")?,
            tokens_used: tokens.max(0) as u64,
            created_at: parse_timestamp(&col::<String>(row, "created_at")?),
        })
    }

    fn row_to_file(row: &SqliteRow) -> Result<UploadedFile, StoreError> {
        let thread_id: Option<String> = col(row, "thread_id")?;
        Ok(UploadedFile {
            id: col(row, "id")?,
            username: col(row, "username")?,
            thread_id: thread_id.map(ThreadId),
            filename: col(row, "filename")?,
            stored_path: col(row, "stored_path")?,
            uploaded_at: parse_timestamp(&col::<String>(row, "uploaded_at")?),
        })
    }

    async fn files_where(&self, sql: &str, key: &str) -> Result<Vec<UploadedFile>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("files: {e}")))?;
        rows.iter().map(Self::row_to_file).collect()
    }
}

/// Read a column, mapping decode failures to `StoreError::QueryFailed`.
fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    // --- Users ---

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO NOTHING",
        )
        .bind(username)
        .bind(password_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT user failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn password_hash(&self, username: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT password_hash FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("password lookup: {e}")))?;

        row.as_ref().map(|r| col(r, "password_hash")).transpose()
    }

    async fn profile(&self, username: &str) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query(
            "SELECT username, display_name, about, strengths, weaknesses, tokens_used
             FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("profile: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tokens: i64 = col(&row, "tokens_used")?;
        Ok(Some(Profile {
            username: col(&row, "username")?,
            display_name: non_empty(col(&row, "display_name")?),
            about: non_empty(col(&row, "about")?),
            strengths: non_empty(col(&row, "strengths")?),
            weaknesses: non_empty(col(&row, "weaknesses")?),
            tokens_used: tokens.max(0) as u64,
        }))
    }

    async fn update_profile(&self, username: &str, update: &ProfileUpdate) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET
                display_name = COALESCE(?2, display_name),
                about        = COALESCE(?3, about),
                strengths    = COALESCE(?4, strengths),
                weaknesses   = COALESCE(?5, weaknesses)
             WHERE username = ?1",
        )
        .bind(username)
        .bind(&update.display_name)
        .bind(&update.about)
        .bind(&update.strengths)
        .bind(&update.weaknesses)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE profile failed: {e}")))?;

        Ok(())
    }

    async fn add_tokens(&self, username: &str, tokens: u64) -> Result<(), StoreError> {
        if tokens == 0 {
            return Ok(());
        }
        sqlx::query("UPDATE users SET tokens_used = tokens_used + ?2 WHERE username = ?1")
            .bind(username)
            .bind(i64::try_from(tokens).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE tokens failed: {e}")))?;

        Ok(())
    }

    // --- Notes ---

    async fn list_notes(&self, username: &str) -> Result<Vec<Note>, StoreError> {
        let rows = sqlx::query("SELECT id, date, text FROM notes WHERE username = ?1 ORDER BY date ASC, id ASC")
            .bind(username)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("notes: {e}")))?;

        rows.iter()
            .map(|row| {
                let date: String = col(row, "date")?;
                Ok(Note {
                    id: col(row, "id")?,
                    date: NaiveDate::parse_from_str(&date, NOTE_DATE_FORMAT)
                        .map_err(|e| StoreError::QueryFailed(format!("note date '{date}': {e}")))?,
                    text: col(row, "text")?,
                })
            })
            .collect()
    }

    async fn add_note(&self, username: &str, date: NaiveDate, text: &str) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO notes (username, date, text) VALUES (?1, ?2, ?3)")
            .bind(username)
            .bind(date.format(NOTE_DATE_FORMAT).to_string())
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("INSERT note failed: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    async fn delete_note(&self, username: &str, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ?1 AND username = ?2")
            .bind(id)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE note failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    // --- Threads ---

    async fn create_thread(
        &self,
        username: &str,
        id: &ThreadId,
        title: &str,
        mode: ChatMode,
    ) -> Result<Thread, StoreError> {
        let created_at = Utc::now();
        sqlx::query("INSERT INTO threads (id, username, title, mode, created_at) VALUES (?1, ?2, ?3, ?4, ?5)")
            .bind(id.as_str())
            .bind(username)
            .bind(title)
            .bind(mode.as_str())
            .bind(created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("INSERT thread failed: {e}")))?;

        debug!(thread = %id, "Created thread");
        Ok(Thread {
            id: id.clone(),
            username: username.to_string(),
            title: title.to_string(),
            mode,
            created_at,
        })
    }

    async fn get_thread(&self, username: &str, id: &ThreadId) -> Result<Option<Thread>, StoreError> {
        let row = sqlx::query("SELECT * FROM threads WHERE id = ?1 AND username = ?2")
            .bind(id.as_str())
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("thread lookup: {e}")))?;

        row.as_ref().map(Self::row_to_thread).transpose()
    }

    async fn list_threads(&self, username: &str) -> Result<Vec<Thread>, StoreError> {
        let rows = sqlx::query("SELECT * FROM threads WHERE username = ?1 ORDER BY created_at DESC, rowid DESC")
            .bind(username)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("threads: {e}")))?;

        rows.iter().map(Self::row_to_thread).collect()
    }

    async fn rename_thread(&self, username: &str, id: &ThreadId, title: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE threads SET title = ?3 WHERE id = ?1 AND username = ?2")
            .bind(id.as_str())
            .bind(username)
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE thread failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_thread(&self, username: &str, id: &ThreadId) -> Result<bool, StoreError> {
        if self.get_thread(username, id).await?.is_none() {
            return Ok(false);
        }

        // Artifacts first
        let audio_rows = sqlx::query("SELECT audio_file FROM messages WHERE thread_id = ?1 AND audio_file IS NOT NULL")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("thread audio: {e}")))?;

        for row in &audio_rows {
            let name: String = col(row, "audio_file")?;
            if name.is_empty() {
                continue;
            }
            Self::remove_artifact(&self.audio_dir.join(&name)).await?;
        }

        for file in self.thread_files(id).await? {
            Self::remove_artifact(Path::new(&file.stored_path)).await?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        for sql in [
            "DELETE FROM messages WHERE thread_id = ?1",
            "DELETE FROM files WHERE thread_id = ?1",
            "DELETE FROM threads WHERE id = ?1",
        ] {
            sqlx::query(sql)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Storage(format!("thread cascade failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        info!(thread = %id, audio = audio_rows.len(), "Deleted thread");
        Ok(true)
    }

    // --- Messages ---

    async fn append_message(&self, message: NewMessage) -> Result<i64, StoreError> {
        let payload = match message.payload.as_ref().filter(|p| !p.is_empty()) {
            Some(p) => Some(
                serde_json::to_string(p).map_err(|e| StoreError::Storage(format!("payload serialization: {e}")))?,
            ),
            None => None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO messages (thread_id, role, content, kind, payload, audio_file, tokens_used, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(message.thread_id.as_str())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(payload)
        .bind(&message.audio_file)
        .bind(i64::try_from(message.tokens_used).unwrap_or(i64::MAX))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    async fn thread_messages(&self, id: &ThreadId, limit: Option<usize>) -> Result<Vec<StoredMessage>, StoreError> {
        // LIMIT -1 means no limit in SQLite
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM messages WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2
            ) ORDER BY id ASC
            "#,
        )
        .bind(id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("thread messages: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    // --- Files ---

    async fn save_file(&self, file: NewFile) -> Result<UploadedFile, StoreError> {
        let uploaded_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO files (username, thread_id, filename, stored_path, uploaded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&file.username)
        .bind(file.thread_id.as_ref().map(|t| t.as_str()))
        .bind(&file.filename)
        .bind(&file.stored_path)
        .bind(uploaded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT file failed: {e}")))?;

        Ok(UploadedFile {
            id: result.last_insert_rowid(),
            username: file.username,
            thread_id: file.thread_id,
            filename: file.filename,
            stored_path: file.stored_path,
            uploaded_at,
        })
    }

    async fn attach_pending_files(&self, username: &str, id: &ThreadId) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE files SET thread_id = ?2 WHERE username = ?1 AND thread_id IS NULL")
            .bind(username)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("attach files failed: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn thread_files(&self, id: &ThreadId) -> Result<Vec<UploadedFile>, StoreError> {
        self.files_where("SELECT * FROM files WHERE thread_id = ?1 ORDER BY id ASC", id.as_str())
            .await
    }

    async fn pending_files(&self, username: &str) -> Result<Vec<UploadedFile>, StoreError> {
        self.files_where(
            "SELECT * FROM files WHERE username = ?1 AND thread_id IS NULL ORDER BY id ASC",
            username,
        )
        .await
    }

    async fn user_files(&self, username: &str) -> Result<Vec<UploadedFile>, StoreError> {
        self.files_where("SELECT * FROM files WHERE username = ?1 ORDER BY id ASC", username)
            .await
    }

    async fn get_file(&self, username: &str, id: i64) -> Result<Option<UploadedFile>, StoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?1 AND username = ?2")
            .bind(id)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("file lookup: {e}")))?;

        row.as_ref().map(Self::row_to_file).transpose()
    }

    async fn delete_file(&self, username: &str, id: i64) -> Result<bool, StoreError> {
        let Some(file) = self.get_file(username, id).await? else {
            return Ok(false);
        };

        if let Err(e) = Self::remove_artifact(Path::new(&file.stored_path)).await {
            warn!(file = %file.filename, error = %e, "Could not remove uploaded file");
            return Err(e);
        }

        let result = sqlx::query("DELETE FROM files WHERE id = ?1 AND username = ?2")
            .bind(id)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE file failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyguide_core::study::Flashcard;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:", std::env::temp_dir()).await.unwrap()
    }

    async fn store_with_user(name: &str) -> SqliteStore {
        let store = test_store().await;
        assert!(store.create_user(name, "hash").await.unwrap());
        store
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = store_with_user("ana").await;
        assert!(!store.create_user("ana", "other").await.unwrap());
        assert_eq!(store.password_hash("ana").await.unwrap().as_deref(), Some("hash"));
        assert!(store.password_hash("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_update_and_token_counter() {
        let store = store_with_user("ana").await;
        store
            .update_profile(
                "ana",
                &ProfileUpdate {
                    display_name: Some("Ana".into()),
                    strengths: Some("Biology".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.add_tokens("ana", 120).await.unwrap();
        store.add_tokens("ana", 30).await.unwrap();

        let profile = store.profile("ana").await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ana"));
        assert_eq!(profile.strengths.as_deref(), Some("Biology"));
        assert!(profile.about.is_none());
        assert_eq!(profile.tokens_used, 150);
        assert!(store.profile("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn notes_are_date_ordered_and_owner_scoped() {
        let store = store_with_user("ana").await;
        store.create_user("ben", "hash").await.unwrap();

        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        store.add_note("ana", d("2026-12-01"), "Chemistry final").await.unwrap();
        let early = store.add_note("ana", d("2026-11-02"), "Maths quiz").await.unwrap();

        let notes = store.list_notes("ana").await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].text, "Maths quiz");

        assert!(!store.delete_note("ben", early).await.unwrap());
        assert!(store.delete_note("ana", early).await.unwrap());
        assert_eq!(store.list_notes("ana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn messages_keep_insertion_order_and_payload() {
        let store = store_with_user("ana").await;
        let tid = ThreadId::from("t1");
        store.create_thread("ana", &tid, "Cells", ChatMode::Study).await.unwrap();

        store.append_message(NewMessage::user(tid.clone(), "Make flashcards")).await.unwrap();
        let cards = vec![
            Flashcard { question: "What is ATP?".into(), answer: "Energy currency".into(), hint: None },
            Flashcard { question: "Mitochondria?".into(), answer: "Powerhouse".into(), hint: Some("cell".into()) },
        ];
        store
            .append_message(NewMessage {
                kind: MessageKind::Flashcards,
                payload: Some(MessagePayload { flashcards: cards.clone(), mcqs: vec![] }),
                ..NewMessage::assistant(tid.clone(), "Here are your cards", 42)
            })
            .await
            .unwrap();

        let msgs = store.thread_messages(&tid, None).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].kind, MessageKind::Flashcards);
        assert_eq!(msgs[1].payload.as_ref().unwrap().flashcards, cards);
        assert_eq!(msgs[1].tokens_used, 42);

        let last = store.thread_messages(&tid, Some(1)).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].content, "Here are your cards");
    }

    #[tokio::test]
    async fn pending_files_attach_to_new_thread() {
        let store = store_with_user("ana").await;
        store
            .save_file(NewFile {
                username: "ana".into(),
                thread_id: None,
                filename: "notes.pdf".into(),
                stored_path: "/nonexistent/ana_1_notes.pdf".into(),
            })
            .await
            .unwrap();
        assert_eq!(store.pending_files("ana").await.unwrap().len(), 1);

        let tid = ThreadId::from("t1");
        store.create_thread("ana", &tid, "Notes", ChatMode::Study).await.unwrap();
        assert_eq!(store.attach_pending_files("ana", &tid).await.unwrap(), 1);
        assert!(store.pending_files("ana").await.unwrap().is_empty());
        assert_eq!(store.thread_files(&tid).await.unwrap()[0].filename, "notes.pdf");
    }

    #[tokio::test]
    async fn threads_are_owner_scoped() {
        let store = store_with_user("ana").await;
        store.create_user("ben", "hash").await.unwrap();
        let tid = ThreadId::from("t1");
        store.create_thread("ana", &tid, "Cells", ChatMode::Test).await.unwrap();

        assert!(store.get_thread("ben", &tid).await.unwrap().is_none());
        assert!(!store.rename_thread("ben", &tid, "Mine").await.unwrap());
        assert!(store.rename_thread("ana", &tid, "Cell biology").await.unwrap());

        let thread = store.get_thread("ana", &tid).await.unwrap().unwrap();
        assert_eq!(thread.title, "Cell biology");
        assert_eq!(thread.mode, ChatMode::Test);
        assert!(store.list_threads("ben").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_thread_cascades_to_rows_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = dir.path().join("audio");
        std::fs::create_dir_all(&audio_dir).unwrap();
        let store = SqliteStore::new("sqlite::memory:", &audio_dir).await.unwrap();
        store.create_user("ana", "hash").await.unwrap();

        let tid = ThreadId::from("t1");
        store.create_thread("ana", &tid, "Cells", ChatMode::Study).await.unwrap();

        let audio_path = audio_dir.join("audio_abc.mp3");
        std::fs::write(&audio_path, b"mp3").unwrap();
        let pdf_path = dir.path().join("ana_1234abcd_cells.pdf");
        std::fs::write(&pdf_path, b"%PDF").unwrap();

        store
            .append_message(NewMessage {
                kind: MessageKind::Voice,
                audio_file: Some("audio_abc.mp3".into()),
                ..NewMessage::assistant(tid.clone(), "Listen", 5)
            })
            .await
            .unwrap();
        store
            .save_file(NewFile {
                username: "ana".into(),
                thread_id: Some(tid.clone()),
                filename: "cells.pdf".into(),
                stored_path: pdf_path.display().to_string(),
            })
            .await
            .unwrap();

        assert!(store.delete_thread("ana", &tid).await.unwrap());
        assert!(!audio_path.exists());
        assert!(!pdf_path.exists());
        assert!(store.thread_messages(&tid, None).await.unwrap().is_empty());
        assert!(store.thread_files(&tid).await.unwrap().is_empty());
        assert!(store.get_thread("ana", &tid).await.unwrap().is_none());
        assert!(!store.delete_thread("ana", &tid).await.unwrap());
    }

    #[tokio::test]
    async fn delete_file_removes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_user("ana").await;
        let path = dir.path().join("ana_deadbeef_a.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let file = store
            .save_file(NewFile {
                username: "ana".into(),
                thread_id: None,
                filename: "a.pdf".into(),
                stored_path: path.display().to_string(),
            })
            .await
            .unwrap();

        assert!(!store.delete_file("ben", file.id).await.unwrap());
        assert!(store.delete_file("ana", file.id).await.unwrap());
        assert!(!path.exists());
        assert!(store.get_file("ana", file.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_thread_has_no_messages() {
        let store = test_store().await;
        let msgs = store.thread_messages(&ThreadId::from("missing"), None).await.unwrap();
        assert!(msgs.is_empty());
    }
}
