use crate::error::ApiError;
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fallback_rag_core::{AnswerSource, AppConfig, Orchestrator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub source: AnswerSource,
    pub sources: Vec<String>,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    pub request_id: String,
}

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let report = state.orchestrator.run(&request.query).await;
    let answer = report.outcome?;

    Ok(Json(ChatResponse {
        sources: answer.evidence.citations(),
        degraded: answer.is_degraded(),
        degraded_reason: answer.degraded.as_ref().map(|degradation| degradation.reason.clone()),
        answer: answer.text,
        source: answer.source,
        request_id: report.request_id.to_string(),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    match orchestrator.store().stats() {
        Some(stats) if !orchestrator.is_shutting_down() => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "chunk_count": stats.chunk_count,
                "checksum": stats.checksum,
                "indexed_at": stats.indexed_at.to_rfc3339(),
                "relevance_threshold": orchestrator.relevance_threshold(),
            })),
        ),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "chunk_count": 0 })),
        ),
    }
}

/// Serves until ctrl-c, then cancels in-flight runs and releases the index.
pub async fn serve(config: &AppConfig, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(%address, static_dir = %config.server.static_dir.display(), "listening");

    let app = router(
        AppState {
            orchestrator: Arc::clone(&orchestrator),
        },
        &config.server.static_dir,
    );

    let on_shutdown = Arc::clone(&orchestrator);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            on_shutdown.shutdown();
        })
        .await
        .context("http server failed")?;

    match Arc::try_unwrap(orchestrator).ok().and_then(Orchestrator::into_store) {
        Some(mut store) => store.shutdown(),
        None => warn!("document index still shared at shutdown; leaving it to drop"),
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
