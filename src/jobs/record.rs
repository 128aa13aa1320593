use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a consultation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Handed to the background executor, no outcome yet.
    Running,
    /// Finished with a result.
    Completed,
    /// Failed; `result` describes the failure.
    Error,
    /// Exceeded its deadline.
    Timeout,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Whether a record in `self` may be replaced by one in `next`.
    ///
    /// Only `Running -> terminal` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == Self::Running && next.is_terminal()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// Status record stored per run and returned to pollers.
///
/// `result` is `None` exactly while the run is [`RunStatus::Running`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: RunStatus,
    pub result: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RunRecord {
    #[must_use]
    pub fn running() -> Self {
        Self {
            status: RunStatus::Running,
            result: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn completed(result: impl Into<String>) -> Self {
        Self::terminal(RunStatus::Completed, result)
    }

    /// An `ERROR` record; the description is prefixed with `Error: `.
    #[must_use]
    pub fn error(description: impl std::fmt::Display) -> Self {
        Self::terminal(RunStatus::Error, format!("Error: {description}"))
    }

    #[must_use]
    pub fn timed_out(after: std::time::Duration) -> Self {
        Self::terminal(
            RunStatus::Timeout,
            format!("Timed out after {}s", after.as_secs()),
        )
    }

    fn terminal(status: RunStatus, result: impl Into<String>) -> Self {
        Self {
            status,
            result: Some(result.into()),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
