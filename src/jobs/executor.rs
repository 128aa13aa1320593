//! Background executor for paused runs.
//!
//! Each submitted run becomes one supervised tokio task that:
//! 1. Confirms the pending actions through the [`ConfirmationPolicy`]
//! 2. Resumes the run on the [`TeamRuntime`]
//! 3. Repeats while the run pauses again, up to `max_resume_cycles`
//! 4. Writes exactly one terminal record into the [`JobStore`]
//!
//! Failures, panics, deadlines and shutdown all end up as records; nothing
//! escapes the task.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::confirm::ConfirmationPolicy;
use super::record::RunRecord;
use super::store::JobStore;
use crate::runtime::{RunHandle, TeamRuntime};

/// Result text for runs that finished without producing content.
pub const EMPTY_RESULT: &str = "Team consultation completed but no content returned.";

/// Limits applied to every background run.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Maximum number of confirm-and-resume rounds per run.
    pub max_resume_cycles: u32,
    /// Deadline for driving one run to completion.
    pub run_timeout: Duration,
    /// Maximum number of runs resuming at the same time.
    pub max_concurrent: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_resume_cycles: 5,
            run_timeout: Duration::from_secs(600),
            max_concurrent: 16,
        }
    }
}

/// Drives paused runs to completion outside the request cycle.
#[derive(Debug, Clone)]
pub struct BackgroundExecutor {
    runtime: Arc<dyn TeamRuntime>,
    store: Arc<dyn JobStore>,
    policy: Arc<dyn ConfirmationPolicy>,
    settings: ExecutorSettings,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl BackgroundExecutor {
    pub fn new(
        runtime: Arc<dyn TeamRuntime>,
        store: Arc<dyn JobStore>,
        policy: Arc<dyn ConfirmationPolicy>,
        settings: ExecutorSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            runtime,
            store,
            policy,
            settings,
            permits,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Take ownership of a paused run and drive it in the background.
    ///
    /// The run must already be registered as `RUNNING` in the store. Returns
    /// immediately.
    pub fn submit(&self, handle: RunHandle) {
        let this = self.clone();
        let run_id = handle.run_id.clone();
        let span = tracing::info_span!("background_run", run_id = %run_id);

        self.tracker.spawn(
            async move {
                let started = Instant::now();
                let record = this.supervise(handle).await;
                this.finish(&run_id, record, started.elapsed());
            }
            .instrument(span),
        );
    }

    /// Number of runs currently owned by the executor.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// A token cancelled when the executor shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel outstanding runs and wait until each has written its record.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(name: "executor.stopped", "Background executor stopped");
    }

    async fn supervise(&self, handle: RunHandle) -> RunRecord {
        tokio::select! {
            () = self.shutdown.cancelled() => RunRecord::error("run cancelled during shutdown"),
            record = self.run_with_permit(handle) => record,
        }
    }

    async fn run_with_permit(&self, handle: RunHandle) -> RunRecord {
        // The deadline covers queueing for a permit as well as the drive.
        let drive = AssertUnwindSafe(async move {
            let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
                anyhow::bail!("executor is closed");
            };
            self.drive(handle).await
        })
        .catch_unwind();

        match tokio::time::timeout(self.settings.run_timeout, drive).await {
            Ok(Ok(Ok(content))) => RunRecord::completed(content),
            Ok(Ok(Err(e))) => RunRecord::error(format!("{e:#}")),
            Ok(Err(panic)) => RunRecord::error(format!(
                "background task panicked: {}",
                panic_message(panic.as_ref())
            )),
            Err(_) => RunRecord::timed_out(self.settings.run_timeout),
        }
    }

    async fn drive(&self, mut handle: RunHandle) -> anyhow::Result<String> {
        for cycle in 1..=self.settings.max_resume_cycles {
            self.policy.resolve(&handle.run_id, &mut handle.pending)?;

            tracing::debug!(cycle, actions = handle.pending.len(), "Resuming run");
            let next = self.runtime.resume(handle).await?;
            if !next.is_paused {
                return Ok(next
                    .content
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_RESULT.to_string()));
            }

            tracing::info!(cycle, actions = next.pending.len(), "Run paused again");
            handle = next;
        }

        anyhow::bail!(
            "run still paused after {} resume cycles",
            self.settings.max_resume_cycles
        )
    }

    fn finish(&self, run_id: &str, record: RunRecord, elapsed: Duration) {
        let status = record.status;
        metrics::counter!("consult_runs_finished_total", "status" => status.to_string())
            .increment(1);
        metrics::histogram!("consult_run_duration_seconds").record(elapsed.as_secs_f64());

        match self.store.put(run_id, record) {
            Ok(()) => tracing::info!(
                name: "run.finished",
                run_id,
                status = %status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Background run finished"
            ),
            Err(e) => tracing::error!(
                name: "run.finish_failed",
                run_id,
                status = %status,
                error = %e,
                "Failed to store terminal run record"
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
