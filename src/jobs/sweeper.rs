//! Retention sweep for finished runs.
//!
//! Ticks on an interval, evicts terminal records older than the retention
//! period and stops with the executor's shutdown token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::store::JobStore;

/// Periodically evicts terminal run records older than the retention period.
///
/// Running records are never evicted, so a poller can always observe the
/// outcome of a run it started, for at least `retention` after it finished.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn JobStore>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn JobStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Evict everything that finished more than `retention` ago.
    pub fn sweep_once(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.evict_finished_before(cutoff)
    }

    /// Run the sweep loop until `token` is cancelled.
    ///
    /// A zero retention disables the sweeper and returns `None`.
    pub fn spawn(self, token: CancellationToken) -> Option<JoinHandle<()>> {
        if self.retention.is_zero() {
            tracing::warn!("Run retention disabled; finished runs are kept until restart");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep_once();
                        if evicted > 0 {
                            tracing::info!(
                                name: "jobs.swept",
                                evicted,
                                remaining = self.store.len(),
                                "Evicted finished runs"
                            );
                        }
                    }
                }
            }
            tracing::debug!("Retention sweeper stopped");
        }))
    }
}
