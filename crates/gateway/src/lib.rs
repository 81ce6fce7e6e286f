//! HTTP API gateway for StudyGuide.
//!
//! Exposes the account, notes, files, threads and chat endpoints under
//! `/api`, plus `/health` and audio serving.
//!
//! Built on Axum.

pub mod api;
pub mod auth;
pub mod error;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, middleware, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use studyguide_agent::{ChatService, SpeechOutput};
use studyguide_config::AppConfig;
use studyguide_core::{DomainEvent, EventBus, Store};
use studyguide_storage::SqliteStore;
use studyguide_tools::{LopdfSource, MermaidInkRenderer, StudyToolbox};

use auth::SessionStore;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub service: Arc<ChatService>,
    pub sessions: SessionStore,
}

impl GatewayState {
    pub fn new(config: AppConfig, service: Arc<ChatService>) -> Self {
        Self {
            config,
            service,
            sessions: SessionStore::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.service.store()
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router.
///
/// Layers applied:
/// - Bearer session authentication on the protected `/api` routes
/// - CORS from `gateway.allowed_origins` (any origin when empty)
/// - Request body size limit from `gateway.max_upload_bytes`
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let protected = api::protected_router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_session,
    ));

    let cors = cors_layer(&state.config.gateway.allowed_origins);
    let body_limit = state.config.gateway.max_upload_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .merge(api::public_router())
        .merge(protected)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring unparsable CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

/// Wire the store, provider, tools and speech output into a chat service.
pub async fn build_service(config: &AppConfig) -> Result<Arc<ChatService>, Box<dyn std::error::Error>> {
    let store = SqliteStore::open(&config.storage.database_path, config.storage.audio_dir.clone()).await?;
    let store: Arc<dyn Store> = Arc::new(store);

    let provider = studyguide_providers::build_from_config(config)?;
    let documents = Arc::new(LopdfSource::new(Duration::from_secs(config.timeouts.extract_secs)));
    let renderer = Arc::new(MermaidInkRenderer::new(
        &config.renderer.base_url,
        Duration::from_secs(config.timeouts.renderer_secs),
    )?);
    let toolbox = StudyToolbox::new(
        provider.clone(),
        documents,
        renderer,
        &config.default_model,
        config.default_temperature,
    );

    let synthesizer = studyguide_providers::build_speech_from_config(config)?;
    let event_bus = Arc::new(EventBus::new(256));

    let service = ChatService::new(store, provider, toolbox, event_bus, config)
        .with_speech(SpeechOutput::new(synthesizer, config.storage.audio_dir.clone()));

    Ok(Arc::new(service))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if !config.has_api_key() {
        warn!("No API key configured; chat requests will fail until one is set");
    }

    for dir in [&config.storage.uploads_dir, &config.storage.audio_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let service = build_service(&config).await?;
    spawn_event_logger(service.event_bus());

    let state = Arc::new(GatewayState::new(config, service));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Log every domain event until the bus closes.
pub fn spawn_event_logger(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::ResponseGenerated {
            thread_id,
            model,
            tokens_used,
            ..
        } => info!(thread = %thread_id, model = %model, tokens_used, "Response generated"),
        DomainEvent::ToolExecuted {
            tool_name,
            success,
            duration_ms,
            ..
        } => debug!(tool = %tool_name, success, duration_ms, "Tool executed"),
        DomainEvent::SpeechSynthesized {
            thread_id,
            file_name,
            bytes,
            ..
        } => info!(thread = %thread_id, file = %file_name, bytes, "Speech synthesized"),
        DomainEvent::ThreadDeleted { thread_id, username, .. } => {
            info!(thread = %thread_id, user = %username, "Thread deleted")
        }
        DomainEvent::ErrorOccurred {
            context,
            error_message,
            ..
        } => warn!(context = %context, error = %error_message, "Error occurred"),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let (app, _dir) = api::tests::test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn cors_preflight_allows_any_origin_by_default() {
        let (app, _dir) = api::tests::test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/chat")
                    .header("Origin", "http://localhost:3000")
                    .header("Access-Control-Request-Method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn event_logger_stops_when_bus_drops() {
        let bus = EventBus::new(8);
        let handle = spawn_event_logger(&bus);
        bus.publish(DomainEvent::ThreadDeleted {
            thread_id: "t1".into(),
            username: "ana".into(),
            timestamp: chrono::Utc::now(),
        });
        drop(bus);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
