//! Social import job orchestrator.
//!
//! Every network-backed command is a remote call followed by a
//! reconciling fetch; every non-control stream event also triggers a
//! fetch. The snapshot always wins over local state.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use closet_core::error::CoreError;
use closet_core::job::JobFamily;
use closet_core::retry::with_retry;
use closet_core::types::{EventSequence, JobId};
use closet_stream::{
    EventStreamConnection, EventTransport, StreamError, StreamEvent, StreamHandler, StreamTarget,
};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::api::{Credentials, OAuthGrant, PhotoItemPatch, SocialImportApi, StartSocialImport};
use super::model::{SocialImportJob, SocialImportStatus, SocialPlatform};
use super::reducer::{self, SocialImportEvent};
use crate::api::ApiError;
use crate::error::JobError;
use crate::pointer::{JobPointerStore, PersistedJobPointer};
use crate::tracker::{CommandScope, JobState, ResumeOutcome, TrackerConfig};

/// Tracks at most one social import job at a time.
pub struct SocialImportOrchestrator {
    api: Arc<dyn SocialImportApi>,
    pointer: PersistedJobPointer,
    connection: Mutex<EventStreamConnection>,
    connected: watch::Receiver<bool>,
    state: JobState<SocialImportJob>,
    commands: CommandScope,
    config: TrackerConfig,
}

impl SocialImportOrchestrator {
    pub fn new(
        api: Arc<dyn SocialImportApi>,
        transport: Arc<dyn EventTransport>,
        pointer_store: Arc<dyn JobPointerStore>,
        config: TrackerConfig,
    ) -> Self {
        let connection = EventStreamConnection::new(transport, config.reconnect.clone());
        let connected = connection.watch_connected();
        Self {
            api,
            pointer: PersistedJobPointer::new(pointer_store, JobFamily::SocialImport),
            connection: Mutex::new(connection),
            connected,
            state: JobState::default(),
            commands: CommandScope::default(),
            config,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SocialImportJob> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SocialImportJob {
        self.state.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Create an import job for `profile` and follow its events.
    pub async fn start(&self, platform: SocialPlatform, profile: &str) -> Result<JobId, JobError> {
        let profile = profile.trim();
        if profile.is_empty() {
            return Err(CoreError::Validation("Profile must not be empty".into()).into());
        }

        self.connection.lock().await.dispose().await;
        let cancel = self.commands.current();

        self.state.replace(SocialImportJob {
            platform: Some(platform),
            profile: Some(profile.to_string()),
            ..Default::default()
        });

        let request = StartSocialImport {
            platform,
            profile: profile.to_string(),
        };
        let created = with_retry(&self.config.retry, &cancel, |_| self.api.create_job(&request))
            .await
            .into_result();

        if cancel.is_cancelled() {
            if let Ok(created) = &created {
                self.cancel_remote(&created.job_id).await;
            }
            return Err(JobError::Cancelled);
        }

        let job_id = match created {
            Ok(created) => created.job_id,
            Err(e) => {
                let err = JobError::from(e);
                self.state.update(|job| {
                    job.error = Some(format!("Failed to start import: {err}"));
                });
                return Err(err);
            }
        };

        self.state.replace(SocialImportJob {
            job_id: Some(job_id.clone()),
            platform: Some(platform),
            profile: Some(profile.to_string()),
            status: SocialImportStatus::Pending,
            ..Default::default()
        });
        self.pointer.persist(&job_id).await;
        self.open_stream(&job_id, None, &cancel).await?;

        tracing::info!(job_id = %job_id, platform = %platform, "Social import started");
        Ok(job_id)
    }

    /// Best-effort remote cancel, then return to idle. No-op when idle.
    pub async fn cancel(&self) {
        self.commands.cancel_all();
        let job = self.state.snapshot();
        if job.is_idle() {
            return;
        }

        if let Some(job_id) = job.job_id.as_deref() {
            if !job.is_terminal() {
                self.cancel_remote(job_id).await;
            }
        }
        self.teardown().await;
        tracing::info!(job_id = ?job.job_id, "Social import cancelled");
    }

    /// Return to idle without contacting the backend. No-op when idle.
    pub async fn reset(&self) {
        self.commands.cancel_all();
        if self.state.snapshot().is_idle() {
            return;
        }
        self.teardown().await;
        tracing::debug!("Social import tracker reset");
    }

    /// Pick up the job recorded in the persisted pointer, with exactly
    /// one snapshot fetch.
    pub async fn resume(&self) -> ResumeOutcome {
        if !self.state.snapshot().is_idle() {
            return ResumeOutcome::AlreadyTracking;
        }
        let cancel = self.commands.current();

        let Some(job_id) = self.pointer.load().await else {
            return ResumeOutcome::NoPointer;
        };

        let snapshot = match self.api.fetch_job(&job_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if e.is_not_found() {
                    tracing::info!(job_id = %job_id, "Persisted job no longer exists, clearing pointer");
                } else {
                    tracing::warn!(job_id = %job_id, error = %e, "Persisted social import unavailable, clearing pointer");
                }
                self.pointer.clear().await;
                return ResumeOutcome::Expired(job_id);
            }
        };

        if cancel.is_cancelled() {
            tracing::debug!(job_id = %job_id, "Resume interrupted before publishing");
            return ResumeOutcome::Interrupted(job_id);
        }

        let mut job = reducer::from_snapshot(&snapshot);
        job.job_id = Some(job_id.clone());

        if job.is_terminal() {
            self.pointer.clear().await;
            self.state.replace(job);
            return ResumeOutcome::Finished(job_id);
        }

        let resume_from = job.last_event_sequence;
        self.state.replace(job);
        if let Err(e) = self.open_stream(&job_id, resume_from, &cancel).await {
            tracing::debug!(job_id = %job_id, error = %e, "Resume interrupted");
            self.state.clear_job(&job_id);
            return ResumeOutcome::Interrupted(job_id);
        }

        tracing::info!(job_id = %job_id, resume_from, "Social import resumed");
        ResumeOutcome::Resumed(job_id)
    }

    /// Re-open the event stream with a fresh reconnect budget, after a
    /// reconciling fetch.
    pub async fn reconnect(&self) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        if self.state.snapshot().is_terminal() {
            return Ok(());
        }
        let cancel = self.commands.current();
        self.state.update_job(&job_id, |job| job.error = None);

        self.refresh().await?;
        let job = self.state.snapshot();
        if job.is_terminal() {
            return Ok(());
        }
        self.open_stream(&job_id, job.last_event_sequence, &cancel).await
    }

    /// Reconciling fetch of the active job.
    pub async fn refresh(&self) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        let cancel = self.commands.current();
        self.reconcile_with_retry(&job_id, &cancel).await
    }

    pub async fn submit_oauth_auth(&self, grant: OAuthGrant) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        self.run_command(&job_id, "submit authorization", |_| {
            self.api.submit_oauth_auth(&job_id, &grant)
        })
        .await
    }

    pub async fn submit_credential_auth(&self, credentials: Credentials) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        self.run_command(&job_id, "submit credentials", |_| {
            self.api.submit_credential_auth(&job_id, &credentials)
        })
        .await
    }

    pub async fn patch_item(
        &self,
        photo_id: &str,
        item_id: &str,
        patch: PhotoItemPatch,
    ) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        self.run_command(&job_id, "update item", |_| {
            self.api.patch_item(&job_id, photo_id, item_id, &patch)
        })
        .await
    }

    pub async fn approve_photo(&self, photo_id: &str) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        self.run_command(&job_id, "approve photo", |_| {
            self.api.approve_photo(&job_id, photo_id)
        })
        .await
    }

    pub async fn reject_photo(&self, photo_id: &str) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        self.run_command(&job_id, "reject photo", |_| {
            self.api.reject_photo(&job_id, photo_id)
        })
        .await
    }

    /// Close the stream but keep the job and its pointer for a later resume.
    pub async fn shutdown(&self) {
        self.commands.cancel_all();
        self.connection.lock().await.dispose().await;
    }

    // ---- private helpers ----

    fn require_job(&self) -> Result<JobId, JobError> {
        self.state
            .job_id()
            .ok_or_else(|| CoreError::Conflict("No active social import".into()).into())
    }

    /// Remote call with retry, then a reconciling fetch.
    ///
    /// A failure is recorded in `error` and leaves the rest of the job
    /// untouched, so the command can simply be issued again.
    async fn run_command<F, Fut>(&self, job_id: &str, action: &str, op: F) -> Result<(), JobError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let cancel = self.commands.current();
        let outcome = with_retry(&self.config.retry, &cancel, op).await;
        let attempts = outcome.attempts;

        if let Err(e) = outcome.into_result() {
            let err = JobError::from(e);
            if !matches!(err, JobError::Cancelled) {
                tracing::warn!(job_id, action, attempts, error = %err, "Social import command failed");
                self.state.update_job(job_id, |job| {
                    job.error = Some(format!("Failed to {action}: {err}"));
                });
            }
            return Err(err);
        }

        tracing::info!(job_id, action, attempts, "Social import command accepted");
        self.reconcile_with_retry(job_id, &cancel).await
    }

    async fn reconcile_with_retry(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let fetched = with_retry(&self.config.retry, cancel, |_| self.api.fetch_job(job_id))
            .await
            .into_result();

        match fetched {
            Ok(snapshot) => {
                let mut terminal = false;
                self.state.update_job(job_id, |job| {
                    reducer::reconcile(job, &snapshot);
                    job.error = None;
                    terminal = job.is_terminal();
                });
                if terminal {
                    self.pointer.clear().await;
                    self.connection.lock().await.dispose().await;
                }
                Ok(())
            }
            Err(e) => {
                let err = JobError::from(e);
                if !matches!(err, JobError::Cancelled) {
                    self.state.update_job(job_id, |job| {
                        job.error = Some(format!("Failed to refresh import: {err}"));
                    });
                }
                Err(err)
            }
        }
    }

    async fn cancel_remote(&self, job_id: &str) {
        match self.api.cancel_job(job_id).await {
            Ok(()) => tracing::debug!(job_id, "Remote social import cancelled"),
            Err(e) => tracing::warn!(job_id, error = %e, "Remote cancel failed, clearing local state anyway"),
        }
    }

    async fn teardown(&self) {
        self.connection.lock().await.dispose().await;
        self.pointer.clear().await;
        self.state.clear();
    }

    async fn open_stream(
        &self,
        job_id: &str,
        resume_from: Option<EventSequence>,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let mut connection = self.connection.lock().await;
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let handler = SocialImportStreamHandler {
            job_id: job_id.to_string(),
            state: self.state.clone(),
            api: Arc::clone(&self.api),
            pointer: self.pointer.clone(),
        };
        connection
            .open(StreamTarget::new(JobFamily::SocialImport, job_id), resume_from, handler)
            .await;
        Ok(())
    }
}

/// Turns every domain event into a reconciling fetch.
struct SocialImportStreamHandler {
    job_id: JobId,
    state: JobState<SocialImportJob>,
    api: Arc<dyn SocialImportApi>,
    pointer: PersistedJobPointer,
}

impl SocialImportStreamHandler {
    /// Fetch and fold the snapshot. Returns whether the job is terminal.
    async fn refetch(&self) -> bool {
        let snapshot = match self.api.fetch_job(&self.job_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Reconciling fetch failed");
                return false;
            }
        };

        let mut terminal = false;
        self.state.update_job(&self.job_id, |job| {
            reducer::reconcile(job, &snapshot);
            job.error = None;
            terminal = job.is_terminal();
        });
        if terminal {
            self.pointer.clear().await;
            tracing::info!(job_id = %self.job_id, status = ?snapshot.status, "Social import finished");
        }
        terminal
    }
}

#[async_trait]
impl StreamHandler for SocialImportStreamHandler {
    async fn on_event(&mut self, event: StreamEvent) -> ControlFlow<()> {
        let applied = self.state.update_job(&self.job_id, |job| {
            if let Some(sequence) = event.sequence {
                job.last_event_sequence =
                    Some(job.last_event_sequence.map_or(sequence, |s| s.max(sequence)));
            }
        });
        if !applied {
            tracing::debug!(job_id = %self.job_id, "Event for a superseded job, closing stream");
            return ControlFlow::Break(());
        }

        match SocialImportEvent::classify(&event) {
            SocialImportEvent::Connected | SocialImportEvent::Heartbeat => ControlFlow::Continue(()),
            SocialImportEvent::Refetch(event_type) => {
                tracing::debug!(job_id = %self.job_id, event_type = %event_type, "Reconciling after event");
                if self.refetch().await {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        }
    }

    async fn on_error(&mut self, error: StreamError) {
        self.state.update_job(&self.job_id, |job| {
            job.error = Some(format!("Lost connection to import updates: {error}"));
        });
    }

    async fn on_reconnected(&mut self, resumed_from: Option<EventSequence>) -> ControlFlow<()> {
        self.state.update_job(&self.job_id, |job| job.error = None);
        if resumed_from.is_none() && self.refetch().await {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}
