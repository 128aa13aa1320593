//! Asynchronous run tracking.
//!
//! Paused consultation runs are registered here and driven to completion in
//! the background while clients poll for their status.
//!
//! # Architecture
//!
//! - [`RunRecord`]: status snapshot returned to pollers
//! - [`JobStore`]: concurrent registry of run records
//! - [`ConfirmationPolicy`]: approval of pending actions (approve-all by default)
//! - [`BackgroundExecutor`]: supervised tasks that resume paused runs
//! - [`RetentionSweeper`]: eviction of old terminal records
//!
//! # Example
//!
//! ```rust
//! use consult_gateway::jobs::{InMemoryJobStore, JobStore, RunRecord, RunStatus};
//!
//! let store = InMemoryJobStore::new();
//! store.put("r1", RunRecord::running()).unwrap();
//! store.put("r1", RunRecord::completed("Plan X")).unwrap();
//!
//! assert_eq!(store.get("r1").unwrap().status, RunStatus::Completed);
//! assert!(store.put("r1", RunRecord::running()).is_err());
//! ```

mod confirm;
mod executor;
mod record;
mod store;
mod sweeper;

pub use confirm::{ApproveAll, ConfirmationError, ConfirmationPolicy};
pub use executor::{BackgroundExecutor, EMPTY_RESULT, ExecutorSettings};
pub use record::{RunRecord, RunStatus};
pub use store::{InMemoryJobStore, JobStore, StoreError};
pub use sweeper::RetentionSweeper;
