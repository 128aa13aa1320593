use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::consultation::ConsultationOutcome;
use crate::error::ConsultError;
use crate::jobs::{RetentionSweeper, RunRecord};
use crate::runtime::{AgentOsRuntime, TeamRuntime};
use crate::security::rate_limit::rate_limit_middleware;

/// Start the Axum server with the provided configuration.
///
/// Returns after a Ctrl-C once in-flight requests have drained and the
/// background executor has stopped.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let agentos = config.agentos_settings();
    info!(
        name: "runtime.config.loaded",
        base_url = %agentos.base_url,
        agent_id = %agentos.agent_id,
        "Team runtime configuration loaded"
    );
    let runtime: Arc<dyn TeamRuntime> = Arc::new(AgentOsRuntime::new(agentos)?);

    let mut state = AppState::new(config.clone(), runtime);
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "Prometheus recorder unavailable; /metrics disabled"),
    }

    let executor = state.consultations.executor().clone();
    let sweeper = RetentionSweeper::new(
        Arc::clone(state.consultations.store()),
        config.retention(),
        config.sweep_interval(),
    )
    .spawn(executor.shutdown_token());

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        max_concurrent_runs = config.jobs.max_concurrent,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    executor.shutdown().await;
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Retention sweeper ended abnormally");
        }
    }
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Build the HTTP router with every cross-cutting layer applied.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = state.config.request_timeout();
    let body_limit = state.config.server.body_limit_bytes;

    Router::new()
        .route("/api/consultation", post(api_start_consultation))
        .route("/api/consultation/{run_id}/status", get(api_run_status))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (
                        StatusCode::REQUEST_TIMEOUT,
                        Json(json!({ "error": "request timed out" })),
                    )
                        .into_response(),
                }
            },
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(name: "server.shutdown_requested", "Shutdown requested; draining");
}

/// Session id for callers that did not send one.
fn new_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("patient_{}", &hex[..8])
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Form body for the consultation API.
#[derive(Debug, Deserialize)]
struct ConsultationForm {
    /// Patient message. A missing field is treated like an empty one.
    #[serde(default)]
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// POST /api/consultation - Start a consultation.
async fn api_start_consultation(
    State(state): State<AppState>,
    Form(form): Form<ConsultationForm>,
) -> Result<Json<ConsultationOutcome>, ConsultError> {
    let session_id = non_blank(form.session_id).unwrap_or_else(new_session_id);
    let user_id = non_blank(form.user_id);

    let outcome = state
        .consultations
        .start_consultation(&form.message, &session_id, user_id.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// GET /api/consultation/{run_id}/status - Poll a paused run.
async fn api_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, ConsultError> {
    Ok(Json(state.consultations.status(&run_id)?))
}

/// GET /healthz - Liveness probe.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "tracked_runs": state.consultations.store().len(),
    }))
}

/// GET /metrics - Prometheus exposition.
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => {
            handle.run_upkeep();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                handle.render(),
            )
                .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "metrics recorder not installed" })),
        )
            .into_response(),
    }
}
