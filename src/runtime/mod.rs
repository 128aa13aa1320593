//! Team runtime boundary.
//!
//! The language-model backed agent/team lives outside this crate. The gateway
//! only starts runs, resumes paused runs and reads the handles they return.
//!
//! # Implementations
//!
//! - [`AgentOsRuntime`]: HTTP client for an `AgentOS` style agent server
//! - [`ScriptedRuntime`]: deterministic in-process runtime for tests and demos

pub mod agentos;
pub mod scripted;

pub use agentos::AgentOsRuntime;
pub use scripted::ScriptedRuntime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An action a paused run is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Identifier of the suspended tool call.
    pub id: String,
    /// Name of the tool the run wants to execute.
    pub name: String,
    /// Raw tool arguments as produced by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    /// Set once the action has been approved.
    #[serde(default)]
    pub confirmed: bool,
}

impl PendingAction {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: None,
            confirmed: false,
        }
    }
}

/// Observed state of one run, as returned by `start` and `resume`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunHandle {
    /// Identifier assigned by the runtime when the run started.
    pub run_id: String,
    /// Session the run belongs to.
    pub session_id: String,
    /// Optional user the run belongs to.
    pub user_id: Option<String>,
    /// Whether the run is suspended on pending actions.
    pub is_paused: bool,
    /// Text produced so far (final answer once the run completed).
    pub content: Option<String>,
    /// Actions the run is suspended on.
    pub pending: Vec<PendingAction>,
}

impl RunHandle {
    /// A handle for a run that finished with `content`.
    #[must_use]
    pub fn completed(run_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A handle for a run suspended on `pending`.
    #[must_use]
    pub fn paused(run_id: impl Into<String>, pending: Vec<PendingAction>) -> Self {
        Self {
            run_id: run_id.into(),
            is_paused: true,
            pending,
            ..Self::default()
        }
    }

    /// Attach the session the run was started in.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>, user_id: Option<String>) -> Self {
        self.session_id = session_id.into();
        self.user_id = user_id;
        self
    }
}

/// The agent/team runtime consumed by the gateway.
///
/// Both calls may take as long as the underlying model needs. Callers must not
/// hold locks across them.
#[async_trait]
pub trait TeamRuntime: Send + Sync + std::fmt::Debug {
    /// Start a run for `input` and return once it completed or paused.
    async fn start(
        &self,
        input: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> anyhow::Result<RunHandle>;

    /// Continue a paused run whose pending actions have been resolved.
    ///
    /// The returned handle may be paused again.
    async fn resume(&self, handle: RunHandle) -> anyhow::Result<RunHandle>;
}
