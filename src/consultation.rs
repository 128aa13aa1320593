//! Consultation entry point.
//!
//! Starts a team run synchronously up to its first suspension point. Runs that
//! finish right away are answered directly; paused runs are registered in the
//! [`JobStore`] and handed to the [`BackgroundExecutor`], and the caller gets a
//! run id to poll.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::instrument;

use crate::error::ConsultError;
use crate::jobs::{BackgroundExecutor, EMPTY_RESULT, JobStore, RunRecord};
use crate::runtime::TeamRuntime;

/// Immediate answer to a consultation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsultationOutcome {
    /// The run paused; poll `run_id` for the result.
    TeamConsultationStarted { run_id: String },
    /// The run finished synchronously.
    Completed { result: String },
}

/// Default deadline for the synchronous `start` call.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(240);

/// Façade over the team runtime, the job store and the executor.
#[derive(Debug, Clone)]
pub struct ConsultationService {
    runtime: Arc<dyn TeamRuntime>,
    store: Arc<dyn JobStore>,
    executor: BackgroundExecutor,
    start_timeout: Duration,
}

impl ConsultationService {
    pub fn new(
        runtime: Arc<dyn TeamRuntime>,
        store: Arc<dyn JobStore>,
        executor: BackgroundExecutor,
    ) -> Self {
        Self {
            runtime,
            store,
            executor,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    /// Bound the synchronous `start` call. Expiry is an internal error.
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn executor(&self) -> &BackgroundExecutor {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Start a consultation for `message`.
    ///
    /// Blocks until the team runtime reaches its first pause or its answer,
    /// at most `start_timeout`. No store lock is held meanwhile.
    #[instrument(
        skip(self, message),
        fields(session_id = %session_id, user_id = ?user_id, run_id = tracing::field::Empty)
    )]
    pub async fn start_consultation(
        &self,
        message: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<ConsultationOutcome, ConsultError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ConsultError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        let start = self.runtime.start(message, session_id, user_id);
        let handle = match tokio::time::timeout(self.start_timeout, start).await {
            Ok(result) => result.map_err(|e| {
                ConsultError::Internal(e.context("team runtime failed to start the run"))
            })?,
            Err(_) => {
                metrics::counter!("consult_start_timeouts_total").increment(1);
                return Err(ConsultError::Internal(anyhow::anyhow!(
                    "team runtime did not answer within {}s",
                    self.start_timeout.as_secs()
                )));
            }
        };

        if !handle.is_paused {
            tracing::info!(run_id = %handle.run_id, "Consultation answered synchronously");
            let result = handle
                .content
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| EMPTY_RESULT.to_string());
            return Ok(ConsultationOutcome::Completed { result });
        }

        if handle.run_id.trim().is_empty() {
            return Err(ConsultError::Internal(anyhow::anyhow!(
                "team runtime paused a run without an identifier"
            )));
        }
        tracing::Span::current().record("run_id", handle.run_id.as_str());

        // Registered before the response leaves, so the first poll sees RUNNING.
        self.store.put(&handle.run_id, RunRecord::running())?;
        metrics::counter!("consult_runs_started_total").increment(1);
        tracing::info!(
            name: "run.registered",
            pending_actions = handle.pending.len(),
            "Run paused; handed to background executor"
        );

        let run_id = handle.run_id.clone();
        self.executor.submit(handle);

        Ok(ConsultationOutcome::TeamConsultationStarted { run_id })
    }

    /// Current record of a paused run.
    pub fn status(&self, run_id: &str) -> Result<RunRecord, ConsultError> {
        Ok(self.store.get(run_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ApproveAll, ExecutorSettings, InMemoryJobStore, RunStatus};
    use crate::runtime::ScriptedRuntime;

    fn service(rt: &ScriptedRuntime) -> ConsultationService {
        let runtime: Arc<dyn TeamRuntime> = Arc::new(rt.clone());
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let executor = BackgroundExecutor::new(
            Arc::clone(&runtime),
            Arc::clone(&store),
            Arc::new(ApproveAll),
            ExecutorSettings::default(),
        );
        ConsultationService::new(runtime, store, executor)
    }

    #[tokio::test]
    async fn test_blank_message_never_reaches_runtime() {
        let rt = ScriptedRuntime::completing("unused");
        let svc = service(&rt);

        for message in ["", "   ", "\n\t"] {
            let err = svc.start_consultation(message, "s1", None).await.unwrap_err();
            assert!(matches!(err, ConsultError::InvalidInput(_)));
        }
        assert_eq!(rt.start_calls(), 0);
    }

    #[tokio::test]
    async fn test_synchronous_answer_skips_store() {
        let rt = ScriptedRuntime::completing("Take rest");
        let svc = service(&rt);

        let outcome = svc
            .start_consultation("I have a headache", "s1", None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ConsultationOutcome::Completed {
                result: "Take rest".into()
            }
        );
        assert!(svc.store().is_empty());
    }

    #[tokio::test]
    async fn test_paused_run_is_registered_before_returning() {
        let rt = ScriptedRuntime::pausing("r1").then_complete("Plan X").gated();
        let svc = service(&rt);

        let outcome = svc.start_consultation("chest pain", "s1", Some("u1")).await.unwrap();
        assert_eq!(
            outcome,
            ConsultationOutcome::TeamConsultationStarted { run_id: "r1".into() }
        );

        let record = svc.status("r1").unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert!(record.result.is_none());
        rt.release(1);
    }

    #[tokio::test]
    async fn test_start_failure_is_internal_without_side_effects() {
        let rt = ScriptedRuntime::failing("model offline");
        let svc = service(&rt);

        let err = svc.start_consultation("hello", "s1", None).await.unwrap_err();
        assert!(matches!(err, ConsultError::Internal(_)));
        assert!(err.to_string().contains("model offline"));
        assert!(svc.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_start_is_internal_error() {
        let rt = ScriptedRuntime::hanging();
        let svc = service(&rt).with_start_timeout(Duration::from_secs(5));

        let err = svc.start_consultation("hello", "s1", None).await.unwrap_err();
        assert!(matches!(err, ConsultError::Internal(_)));
        assert!(err.to_string().contains("did not answer within 5s"));
        assert!(svc.store().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_run_id_is_not_rescheduled() {
        let rt = ScriptedRuntime::pausing("r1").then_complete("first").gated();
        let svc = service(&rt);

        svc.start_consultation("one", "s1", None).await.unwrap();
        let err = svc.start_consultation("two", "s1", None).await.unwrap_err();
        assert!(matches!(err, ConsultError::Internal(_)));
        assert_eq!(svc.executor().in_flight(), 1);
        rt.release(1);
    }

    #[test]
    fn test_outcome_wire_format() {
        let started = serde_json::to_value(ConsultationOutcome::TeamConsultationStarted {
            run_id: "r1".into(),
        })
        .unwrap();
        assert_eq!(
            started,
            serde_json::json!({ "status": "TEAM_CONSULTATION_STARTED", "run_id": "r1" })
        );

        let done = serde_json::to_value(ConsultationOutcome::Completed {
            result: "Take rest".into(),
        })
        .unwrap();
        assert_eq!(
            done,
            serde_json::json!({ "status": "COMPLETED", "result": "Take rest" })
        );
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let svc = service(&ScriptedRuntime::completing("x"));
        assert!(matches!(
            svc.status("unknown-id"),
            Err(ConsultError::NotFound(id)) if id == "unknown-id"
        ));
    }
}
