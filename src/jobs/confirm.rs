//! Confirmation of pending actions before a paused run is resumed.
//!
//! The executor calls exactly one [`ConfirmationPolicy`]; swapping the policy
//! in [`crate::jobs::BackgroundExecutor::new`] is the only place approval
//! behaviour changes.

use crate::runtime::PendingAction;

#[derive(Debug, thiserror::Error)]
pub enum ConfirmationError {
    /// The policy refused an action; the run cannot continue.
    #[error("action {name} ({id}) was rejected: {reason}")]
    Rejected {
        id: String,
        name: String,
        reason: String,
    },
}

/// Decides which pending actions of a paused run are approved.
pub trait ConfirmationPolicy: Send + Sync + std::fmt::Debug {
    /// Mark the approved actions as confirmed, or reject the run.
    fn resolve(&self, run_id: &str, actions: &mut [PendingAction]) -> Result<(), ConfirmationError>;
}

/// Approves every pending action.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl ConfirmationPolicy for ApproveAll {
    fn resolve(&self, run_id: &str, actions: &mut [PendingAction]) -> Result<(), ConfirmationError> {
        for action in actions.iter_mut() {
            action.confirmed = true;
            tracing::debug!(run_id, action_id = %action.id, tool = %action.name, "Auto-confirmed pending action");
        }
        Ok(())
    }
}
