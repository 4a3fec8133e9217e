//! Plumbing shared by the per-family orchestrators.
//!
//! - [`TrackerConfig`] -- reconnect, retry and upload settings.
//! - [`JobState`] -- the published job snapshot, with updates guarded by
//!   job id so a superseded subscription can never write into a newer job.
//! - [`CommandScope`] -- the cancellation token that `cancel()`/`reset()`
//!   fire to interrupt in-flight command retries.

use std::sync::{Arc, Mutex, PoisonError};

use closet_core::retry::RetryConfig;
use closet_core::types::JobId;
use closet_stream::ReconnectConfig;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default number of images uploaded concurrently.
const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub reconnect: ReconnectConfig,
    pub retry: RetryConfig,
    pub upload_concurrency: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            retry: RetryConfig::default(),
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }
}

/// What `resume()` found in the persisted pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// No pointer was stored.
    NoPointer,
    /// A job is already being tracked; the pointer was not consulted.
    AlreadyTracking,
    /// The job could not be fetched; the pointer was cleared.
    Expired(JobId),
    /// `cancel()` or `reset()` ran while resuming. Nothing is tracked;
    /// the pointer was kept.
    Interrupted(JobId),
    /// The job had already reached a terminal status; the pointer was
    /// cleared and the final state published.
    Finished(JobId),
    /// The job is running and its event stream was reopened.
    Resumed(JobId),
}

impl ResumeOutcome {
    /// Whether a live job is now being followed.
    pub fn is_resumed(&self) -> bool {
        matches!(self, Self::Resumed(_))
    }
}

/// A job snapshot that can be published through [`JobState`].
pub trait TrackedJob: Clone + Default + Send + Sync + 'static {
    /// Server id, once the job has been created.
    fn job_id(&self) -> Option<&str>;
}

/// Observable job state.
///
/// Cloned into stream handlers; every clone publishes to the same
/// `watch` channel.
pub struct JobState<J> {
    tx: Arc<watch::Sender<J>>,
}

impl<J> Clone for JobState<J> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<J: TrackedJob> Default for JobState<J> {
    fn default() -> Self {
        let (tx, _) = watch::channel(J::default());
        Self { tx: Arc::new(tx) }
    }
}

impl<J: TrackedJob> JobState<J> {
    pub fn snapshot(&self) -> J {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<J> {
        self.tx.subscribe()
    }

    pub fn job_id(&self) -> Option<String> {
        self.tx.borrow().job_id().map(str::to_string)
    }

    pub fn replace(&self, job: J) {
        self.tx.send_replace(job);
    }

    /// Back to the idle default.
    pub fn clear(&self) {
        self.tx.send_replace(J::default());
    }

    /// Back to idle, but only if the current job is still `job_id`.
    pub fn clear_job(&self, job_id: &str) -> bool {
        self.tx.send_if_modified(|job| {
            if job.job_id() == Some(job_id) {
                *job = J::default();
                true
            } else {
                false
            }
        })
    }

    /// Mutate the current job unconditionally.
    pub fn update(&self, f: impl FnOnce(&mut J)) {
        self.tx.send_modify(f);
    }

    /// Mutate the current job only if it is still `job_id`.
    ///
    /// Returns whether the update was applied.
    pub fn update_job(&self, job_id: &str, f: impl FnOnce(&mut J)) -> bool {
        self.tx.send_if_modified(|job| {
            if job.job_id() == Some(job_id) {
                f(job);
                true
            } else {
                false
            }
        })
    }
}

/// Cancellation scope for network-backed commands.
#[derive(Default)]
pub struct CommandScope {
    token: Mutex<CancellationToken>,
}

impl CommandScope {
    /// Token for a command starting now.
    pub fn current(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel every command started so far; later commands get a fresh token.
    pub fn cancel_all(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }
}
