//! Extraction job orchestrator.
//!
//! [`ExtractionOrchestrator`] composes the job API, one
//! [`EventStreamConnection`] and the reducer. It uploads the selected
//! images, creates the job, persists the active-job pointer and follows
//! the event stream until the job reaches a terminal status.
//!
//! The current job is published through a `watch` channel. Call
//! [`ExtractionOrchestrator::subscribe`] to observe it.

use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use closet_core::error::CoreError;
use closet_core::job::JobFamily;
use closet_core::retry::{with_retry, with_retry_all};
use closet_core::types::{EventSequence, JobId};
use closet_stream::{
    EventStreamConnection, EventTransport, StreamError, StreamEvent, StreamHandler, StreamTarget,
};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::api::{CreateExtractionJob, ExtractionApi, ImageUpload};
use super::events::ExtractionEvent;
use super::model::{
    ExtractionJob, ExtractionStatus, ExtractionStep, ImageSlot, ImageStatus, ItemPatch, ItemStatus,
};
use super::reducer::{self, LOCAL_IMAGE_PREFIX};
use crate::error::JobError;
use crate::pointer::{JobPointerStore, PersistedJobPointer};
use crate::tracker::{CommandScope, JobState, ResumeOutcome, TrackerConfig};

/// Tracks at most one extraction job at a time.
///
/// Commands take `&self`; share the orchestrator behind an `Arc` to
/// issue `cancel()` while another command is in flight.
pub struct ExtractionOrchestrator {
    api: Arc<dyn ExtractionApi>,
    pointer: PersistedJobPointer,
    connection: Mutex<EventStreamConnection>,
    connected: watch::Receiver<bool>,
    state: JobState<ExtractionJob>,
    commands: CommandScope,
    config: TrackerConfig,
}

impl ExtractionOrchestrator {
    pub fn new(
        api: Arc<dyn ExtractionApi>,
        transport: Arc<dyn EventTransport>,
        pointer_store: Arc<dyn JobPointerStore>,
        config: TrackerConfig,
    ) -> Self {
        let connection = EventStreamConnection::new(transport, config.reconnect.clone());
        let connected = connection.watch_connected();
        Self {
            api,
            pointer: PersistedJobPointer::new(pointer_store, JobFamily::Extraction),
            connection: Mutex::new(connection),
            connected,
            state: JobState::default(),
            commands: CommandScope::default(),
            config,
        }
    }

    /// Observe the current job.
    pub fn subscribe(&self) -> watch::Receiver<ExtractionJob> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ExtractionJob {
        self.state.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Upload `images`, create the job and start following its events.
    ///
    /// Images are uploaded in parallel with retry. Failed uploads are
    /// kept as failed slots; if none succeed, no job is created and the
    /// flow returns to the selection step.
    pub async fn start(&self, images: Vec<ImageUpload>) -> Result<JobId, JobError> {
        if images.is_empty() {
            return Err(CoreError::Validation("No images selected".into()).into());
        }

        self.connection.lock().await.dispose().await;
        let cancel = self.commands.current();

        self.state.replace(ExtractionJob {
            status: ExtractionStatus::Pending,
            step: ExtractionStep::Uploading,
            images: images
                .iter()
                .enumerate()
                .map(|(index, image)| local_slot(index, image, ImageStatus::Pending, None))
                .collect(),
            ..Default::default()
        });

        let api = &self.api;
        let outcomes = with_retry_all(
            &images,
            self.config.upload_concurrency,
            &self.config.retry,
            &cancel,
            |image: &ImageUpload, _attempt| {
                let api = Arc::clone(api);
                let image = image.clone();
                async move { api.upload_image(&image).await }
            },
            |index, outcome| match &outcome.result {
                Ok(uploaded) => tracing::info!(
                    index,
                    image_id = %uploaded.image_id,
                    attempts = outcome.attempts,
                    "Image uploaded",
                ),
                Err(e) => tracing::warn!(
                    index,
                    attempts = outcome.attempts,
                    error = %e,
                    "Image upload failed",
                ),
            },
        )
        .await;

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let mut slots = Vec::with_capacity(images.len());
        let mut image_ids = Vec::new();
        let mut last_error = None;
        for (index, (image, outcome)) in images.iter().zip(outcomes).enumerate() {
            match outcome.into_result() {
                Ok(uploaded) => {
                    let mut slot = ImageSlot::pending(uploaded.image_id.clone());
                    slot.file_name = Some(image.file_name.clone());
                    slots.push(slot);
                    image_ids.push(uploaded.image_id);
                }
                Err(e) => {
                    slots.push(local_slot(index, image, ImageStatus::Failed, Some(e.to_string())));
                    last_error = Some(e);
                }
            }
        }

        if image_ids.is_empty() {
            let err = match last_error {
                Some(e) => JobError::from(e),
                None => CoreError::Internal("No upload outcome recorded".into()).into(),
            };
            self.state.update(|job| {
                job.status = ExtractionStatus::Idle;
                job.step = ExtractionStep::Select;
                job.images = slots;
                job.error = Some(format!("No image could be uploaded: {err}"));
            });
            return Err(err);
        }

        let uploaded = image_ids.len();
        let request = CreateExtractionJob { image_ids };
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
                    job.status = ExtractionStatus::Idle;
                    job.step = ExtractionStep::Select;
                    job.images = slots;
                    job.error = Some(format!("Failed to create extraction job: {err}"));
                });
                return Err(err);
            }
        };

        self.state.replace(ExtractionJob {
            job_id: Some(job_id.clone()),
            status: ExtractionStatus::Pending,
            step: ExtractionStep::Extracting,
            images: slots,
            ..Default::default()
        });
        self.pointer.persist(&job_id).await;
        self.open_stream(&job_id, None, &cancel).await?;

        tracing::info!(job_id = %job_id, images = uploaded, "Extraction job started");
        Ok(job_id)
    }

    /// Best-effort remote cancel, then return to idle.
    ///
    /// Local state always ends idle with the stream closed and the
    /// pointer cleared, whatever the remote call did. No-op when idle.
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
        tracing::info!(job_id = ?job.job_id, "Extraction job cancelled");
    }

    /// Return to idle without contacting the backend. No-op when idle.
    pub async fn reset(&self) {
        self.commands.cancel_all();
        if self.state.snapshot().is_idle() {
            return;
        }
        self.teardown().await;
        tracing::debug!("Extraction tracker reset");
    }

    /// Pick up the job recorded in the persisted pointer.
    ///
    /// Performs exactly one snapshot fetch. A job that cannot be fetched
    /// or has already finished clears the pointer; a running job is
    /// published and its stream reopened from the last known sequence.
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
                    tracing::warn!(job_id = %job_id, error = %e, "Persisted extraction job unavailable, clearing pointer");
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

        tracing::info!(job_id = %job_id, resume_from, "Extraction job resumed");
        ResumeOutcome::Resumed(job_id)
    }

    /// Re-open the event stream with a fresh reconnect budget.
    ///
    /// Resumes from the last sequence seen; without one the job is
    /// re-fetched first.
    pub async fn reconnect(&self) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        if self.state.snapshot().is_terminal() {
            return Ok(());
        }
        let cancel = self.commands.current();
        self.state.update_job(&job_id, |job| job.error = None);

        if self.state.snapshot().last_event_sequence.is_none() {
            self.refresh().await?;
        }
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

        let fetched = with_retry(&self.config.retry, &cancel, |_| self.api.fetch_job(&job_id))
            .await
            .into_result();

        match fetched {
            Ok(snapshot) => {
                let mut terminal = false;
                self.state.update_job(&job_id, |job| {
                    job.error = None;
                    reducer::reconcile(job, &snapshot);
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
                    self.state.update_job(&job_id, |job| {
                        job.error = Some(format!("Failed to refresh extraction job: {err}"));
                    });
                }
                Err(err)
            }
        }
    }

    /// Edit a detected item locally.
    pub async fn update_item(&self, temp_id: &str, patch: ItemPatch) -> Result<(), JobError> {
        self.patch_item(temp_id, move |item| {
            if let Some(category) = patch.category {
                item.category = category;
            }
            if let Some(attributes) = patch.attributes {
                item.attributes.extend(attributes);
            }
        })
    }

    /// Drop a detected item. Deleted items are excluded from generation.
    pub async fn delete_item(&self, temp_id: &str) -> Result<(), JobError> {
        self.patch_item(temp_id, |item| item.status = ItemStatus::Deleted)
    }

    /// Move the flow to `step` (e.g. review -> saving).
    pub async fn set_step(&self, step: ExtractionStep) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        self.state.update_job(&job_id, |job| job.step = step);
        Ok(())
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
            .ok_or_else(|| CoreError::Conflict("No active extraction job".into()).into())
    }

    fn patch_item(
        &self,
        temp_id: &str,
        edit: impl FnOnce(&mut super::model::DetectedItem),
    ) -> Result<(), JobError> {
        let job_id = self.require_job()?;
        let mut found = false;
        self.state.update_job(&job_id, |job| {
            if let Some(item) = job.item_mut(temp_id) {
                if item.status != ItemStatus::Deleted {
                    edit(item);
                    found = true;
                }
            }
        });
        if found {
            Ok(())
        } else {
            Err(CoreError::Validation(format!("Unknown item '{temp_id}'")).into())
        }
    }

    async fn cancel_remote(&self, job_id: &str) {
        match self.api.cancel_job(job_id).await {
            Ok(()) => tracing::debug!(job_id, "Remote extraction job cancelled"),
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
        let handler = ExtractionStreamHandler {
            job_id: job_id.to_string(),
            state: self.state.clone(),
            api: Arc::clone(&self.api),
            pointer: self.pointer.clone(),
        };
        connection
            .open(StreamTarget::new(JobFamily::Extraction, job_id), resume_from, handler)
            .await;
        Ok(())
    }
}

fn local_slot(index: usize, image: &ImageUpload, status: ImageStatus, error: Option<String>) -> ImageSlot {
    ImageSlot {
        id: format!("{LOCAL_IMAGE_PREFIX}{index}"),
        file_name: Some(image.file_name.clone()),
        status,
        detected_items: Vec::new(),
        error,
    }
}

/// Folds the events of one job into the shared state.
struct ExtractionStreamHandler {
    job_id: JobId,
    state: JobState<ExtractionJob>,
    api: Arc<dyn ExtractionApi>,
    pointer: PersistedJobPointer,
}

impl ExtractionStreamHandler {
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
            terminal = job.is_terminal();
        });
        if terminal {
            self.pointer.clear().await;
            tracing::info!(job_id = %self.job_id, status = ?snapshot.status, "Extraction job finished");
        }
        terminal
    }
}

#[async_trait]
impl StreamHandler for ExtractionStreamHandler {
    async fn on_event(&mut self, event: StreamEvent) -> ControlFlow<()> {
        let sequence = event.sequence;
        let parsed = match ExtractionEvent::from_stream(&event) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Dropping unreadable extraction event");
                return ControlFlow::Continue(());
            }
        };
        if let ExtractionEvent::Unknown(event_type) = &parsed {
            tracing::debug!(job_id = %self.job_id, event_type = %event_type, "Ignoring unknown extraction event");
        }

        let mut terminal = false;
        let applied = self.state.update_job(&self.job_id, |job| {
            if let Some(sequence) = sequence {
                job.last_event_sequence =
                    Some(job.last_event_sequence.map_or(sequence, |s| s.max(sequence)));
            }
            reducer::apply(job, &parsed);
            terminal = job.is_terminal();
        });

        if !applied {
            tracing::debug!(job_id = %self.job_id, "Event for a superseded job, closing stream");
            return ControlFlow::Break(());
        }

        if terminal {
            self.pointer.clear().await;
            tracing::info!(job_id = %self.job_id, "Extraction job finished");
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    async fn on_error(&mut self, error: StreamError) {
        self.state.update_job(&self.job_id, |job| {
            job.error = Some(format!("Lost connection to job updates: {error}"));
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
