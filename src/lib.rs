//! Team Consultation Gateway
//!
//! HTTP front door for a multi-agent medical consultation team. A request
//! starts a team run; if the run pauses on a tool call that needs approval the
//! gateway answers right away with a run id, approves and resumes the run in
//! the background, and lets the client poll for the final result.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP surface with tracing, timeout and rate-limit layers
//! - **Jobs**: run registry, confirmation policy and supervised background executor
//! - **Runtime**: boundary to the agent team (AgentOS HTTP client or scripted double)
//!
//! # Modules
//!
//! - [`consultation`]: start a consultation and query run status
//! - [`jobs`]: run records, job store, executor and retention sweep
//! - [`runtime`]: [`runtime::TeamRuntime`] trait and implementations
//! - [`server`]: router and server bootstrap

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod consultation;
pub mod error;
pub mod jobs;
pub mod runtime;
pub mod security;
pub mod server;
pub mod telemetry;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::AppConfig;
use crate::consultation::ConsultationService;
use crate::jobs::{ApproveAll, BackgroundExecutor, InMemoryJobStore, JobStore};
use crate::runtime::TeamRuntime;
use crate::security::rate_limit::AppRateLimiter;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Consultation façade (runtime, job store, executor).
    pub consultations: ConsultationService,
    /// Global Rate Limiter
    pub rate_limiter: Arc<AppRateLimiter>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire a fresh in-memory job store and executor around `runtime`.
    pub fn new(config: Arc<AppConfig>, runtime: Arc<dyn TeamRuntime>) -> Self {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let executor = BackgroundExecutor::new(
            Arc::clone(&runtime),
            Arc::clone(&store),
            Arc::new(ApproveAll),
            config.executor_settings(),
        );
        let rate_limiter = Arc::new(AppRateLimiter::new(
            config.resilience.requests_per_second,
            config.resilience.burst_size,
        ));

        Self {
            consultations: ConsultationService::new(runtime, store, executor)
                .with_start_timeout(config.start_timeout()),
            rate_limiter,
            config,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("consultations", &self.consultations)
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
