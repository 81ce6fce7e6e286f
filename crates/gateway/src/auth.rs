//! Accounts and bearer sessions.
//!
//! Passwords are stored as bcrypt hashes. A successful login issues an opaque
//! token held in memory; every protected route resolves it to a username.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::SharedState;
use crate::error::ApiError;

/// Maximum number of live sessions before the oldest are evicted.
const MAX_SESSIONS: usize = 1_000;

/// The authenticated caller, inserted by [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub username: String,
}

#[derive(Default)]
pub struct SessionStore {
    // token -> (username, issue order)
    tokens: RwLock<HashMap<String, (String, u64)>>,
    issued: std::sync::atomic::AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `username`.
    pub async fn issue(&self, username: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let seq = self.issued.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let mut tokens = self.tokens.write().await;
        if tokens.len() >= MAX_SESSIONS {
            if let Some(oldest) = tokens.iter().min_by_key(|(_, (_, s))| *s).map(|(k, _)| k.clone()) {
                tokens.remove(&oldest);
            }
        }
        tokens.insert(token.clone(), (username.to_string(), seq));
        token
    }

    pub async fn resolve(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).map(|(user, _)| user.clone())
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.tokens.write().await.remove(token).is_some()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}

pub async fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(|e| ApiError::internal(e.to_string()))
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    let (password, hash) = (password.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .or(Ok(false))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware for the `/api` routes.
///
/// Requires a valid `Authorization: Bearer <token>` header.
pub async fn require_session(State(state): State<SharedState>, mut req: Request, next: Next) -> Response {
    let username = match bearer_token(req.headers()) {
        Some(token) => state.sessions.resolve(token).await,
        None => None,
    };

    match username {
        Some(username) => {
            req.extensions_mut().insert(CurrentUser { username });
            next.run(req).await
        }
        None => {
            warn!(path = %req.uri().path(), "Unauthorized request: missing or invalid bearer token");
            ApiError::new(StatusCode::UNAUTHORIZED, "Not logged in").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_tokens_resolve_until_revoked() {
        let sessions = SessionStore::new();
        let token = sessions.issue("ana").await;
        assert_eq!(sessions.resolve(&token).await.as_deref(), Some("ana"));
        assert!(sessions.revoke(&token).await);
        assert!(sessions.resolve(&token).await.is_none());
    }

    #[tokio::test]
    async fn each_login_gets_its_own_token() {
        let sessions = SessionStore::new();
        let a = sessions.issue("ana").await;
        let b = sessions.issue("ana").await;
        assert_ne!(a, b);
        assert_eq!(sessions.len().await, 2);
    }

    #[tokio::test]
    async fn passwords_hash_and_verify() {
        let hash = hash_password("s3cret", 4).await.unwrap();
        assert_ne!(hash, "s3cret");
        assert!(verify_password("s3cret", &hash).await.unwrap());
        assert!(!verify_password("wrong", &hash).await.unwrap());
        assert!(!verify_password("s3cret", "not-a-hash").await.unwrap());
    }
}
