//! Deterministic in-process runtime.
//!
//! Used by the test suites and for running the gateway without an agent
//! server. A script decides what `start` returns and what each successive
//! `resume` returns. A gate can hold resumes until the caller releases them,
//! which makes the RUNNING window observable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{PendingAction, RunHandle, TeamRuntime};

/// Tool name used for scripted pauses.
pub const SCRIPTED_TOOL: &str = "medical_team_consultation";

/// One scripted reaction of the runtime.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Finish with the given content.
    Complete(String),
    /// Suspend on one pending action.
    Pause,
    /// Fail with the given message.
    Fail(String),
    /// Panic with the given message.
    Panic(String),
    /// Never return.
    Hang,
}

#[derive(Debug)]
struct Inner {
    run_id: Option<String>,
    on_start: ScriptStep,
    on_resume: Mutex<VecDeque<ScriptStep>>,
    gate: OnceLock<Semaphore>,
    starts: AtomicUsize,
    resumes: AtomicUsize,
    next_id: AtomicUsize,
    confirmations: Mutex<Vec<Vec<PendingAction>>>,
}

/// Scripted [`TeamRuntime`].
///
/// Cloning shares the script and the counters.
#[derive(Debug, Clone)]
pub struct ScriptedRuntime {
    inner: Arc<Inner>,
}

impl ScriptedRuntime {
    fn with_start(on_start: ScriptStep, run_id: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                run_id,
                on_start,
                on_resume: Mutex::new(VecDeque::new()),
                gate: OnceLock::new(),
                starts: AtomicUsize::new(0),
                resumes: AtomicUsize::new(0),
                next_id: AtomicUsize::new(1),
                confirmations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// `start` completes synchronously with `content`.
    #[must_use]
    pub fn completing(content: impl Into<String>) -> Self {
        Self::with_start(ScriptStep::Complete(content.into()), None)
    }

    /// `start` pauses and reports `run_id`.
    #[must_use]
    pub fn pausing(run_id: impl Into<String>) -> Self {
        Self::with_start(ScriptStep::Pause, Some(run_id.into()))
    }

    /// `start` pauses with a fresh `scripted-N` identifier per run.
    #[must_use]
    pub fn pausing_with_generated_ids() -> Self {
        Self::with_start(ScriptStep::Pause, None)
    }

    /// `start` fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_start(ScriptStep::Fail(message.into()), None)
    }

    /// `start` never returns.
    #[must_use]
    pub fn hanging() -> Self {
        Self::with_start(ScriptStep::Hang, None)
    }

    /// Append a reaction for the next `resume`.
    #[must_use]
    pub fn then(self, step: ScriptStep) -> Self {
        self.inner
            .on_resume
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }

    #[must_use]
    pub fn then_complete(self, content: impl Into<String>) -> Self {
        self.then(ScriptStep::Complete(content.into()))
    }

    #[must_use]
    pub fn then_pause(self) -> Self {
        self.then(ScriptStep::Pause)
    }

    #[must_use]
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.then(ScriptStep::Fail(message.into()))
    }

    /// Hold every `resume` until [`ScriptedRuntime::release`] is called.
    #[must_use]
    pub fn gated(self) -> Self {
        let _ = self.inner.gate.set(Semaphore::new(0));
        self
    }

    /// Let `n` gated resumes proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.inner.gate.get() {
            gate.add_permits(n);
        }
    }

    pub fn start_calls(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.inner.resumes.load(Ordering::SeqCst)
    }

    /// Pending actions as they were handed to each `resume`.
    pub fn confirmations(&self) -> Vec<Vec<PendingAction>> {
        self.inner
            .confirmations
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn run_id(&self) -> String {
        match &self.inner.run_id {
            Some(id) => id.clone(),
            None => format!(
                "scripted-{}",
                self.inner.next_id.fetch_add(1, Ordering::SeqCst)
            ),
        }
    }

    async fn play(step: ScriptStep, run_id: String) -> anyhow::Result<RunHandle> {
        match step {
            ScriptStep::Complete(content) => Ok(RunHandle::completed(run_id, content)),
            ScriptStep::Pause => Ok(RunHandle::paused(
                run_id.clone(),
                vec![PendingAction::new(format!("{run_id}-call"), SCRIPTED_TOOL)],
            )),
            ScriptStep::Fail(message) => Err(anyhow::anyhow!(message)),
            ScriptStep::Panic(message) => panic!("{message}"),
            ScriptStep::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }
}

#[async_trait]
impl TeamRuntime for ScriptedRuntime {
    async fn start(
        &self,
        _input: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> anyhow::Result<RunHandle> {
        self.inner.starts.fetch_add(1, Ordering::SeqCst);
        let handle = Self::play(self.inner.on_start.clone(), self.run_id()).await?;
        Ok(handle.with_session(session_id, user_id.map(str::to_string)))
    }

    async fn resume(&self, handle: RunHandle) -> anyhow::Result<RunHandle> {
        if let Some(gate) = self.inner.gate.get() {
            gate.acquire().await?.forget();
        }
        self.inner.resumes.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut seen) = self.inner.confirmations.lock() {
            seen.push(handle.pending.clone());
        }

        let step = self
            .inner
            .on_resume
            .lock()
            .map_err(|_| anyhow::anyhow!("script lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted for run {}", handle.run_id))?;

        let next = Self::play(step, handle.run_id.clone()).await?;
        Ok(next.with_session(handle.session_id, handle.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_plays_in_order() {
        let rt = ScriptedRuntime::pausing("r1").then_pause().then_complete("done");

        let h = rt.start("hi", "s1", None).await.unwrap();
        assert!(h.is_paused);
        assert_eq!(h.run_id, "r1");
        assert_eq!(h.session_id, "s1");

        let h = rt.resume(h).await.unwrap();
        assert!(h.is_paused);
        let h = rt.resume(h).await.unwrap();
        assert_eq!(h.content.as_deref(), Some("done"));

        assert!(rt.resume(h).await.is_err());
        assert_eq!(rt.start_calls(), 1);
        assert_eq!(rt.resume_calls(), 3);
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        let rt = ScriptedRuntime::pausing_with_generated_ids();
        let a = rt.start("a", "s", None).await.unwrap();
        let b = rt.start("b", "s", None).await.unwrap();
        assert_ne!(a.run_id, b.run_id);
    }

    #[tokio::test]
    async fn test_gate_holds_resume() {
        let rt = ScriptedRuntime::pausing("r1").then_complete("ok").gated();
        let h = rt.start("hi", "s1", None).await.unwrap();

        let rt2 = rt.clone();
        let task = tokio::spawn(async move { rt2.resume(h).await });
        tokio::task::yield_now().await;
        assert_eq!(rt.resume_calls(), 0);

        rt.release(1);
        let done = task.await.unwrap().unwrap();
        assert_eq!(done.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_script_extends_after_clone() {
        let rt = ScriptedRuntime::pausing("r1");
        let observer = rt.clone();
        let rt = rt.then_complete("ok").gated();

        let h = rt.start("hi", "s1", None).await.unwrap();
        observer.release(1);
        let h = rt.resume(h).await.unwrap();
        assert_eq!(h.content.as_deref(), Some("ok"));
        assert_eq!(observer.resume_calls(), 1);
    }
}
