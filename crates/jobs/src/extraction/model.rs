//! Extraction job state: images, detected items and the two state machines.

use closet_core::job::JobStatus;
use closet_core::types::{EventSequence, JobId};
use serde::{Deserialize, Serialize};

use crate::tracker::TrackedJob;

/// Free-form item attributes (colour, pattern, material, ...).
pub type ItemAttributes = serde_json::Map<String, serde_json::Value>;

/// UI step of the extraction flow.
///
/// Declaration order is flow order; events only ever move the step
/// forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStep {
    #[default]
    Select,
    Uploading,
    Extracting,
    Generating,
    Review,
    Saving,
}

/// Job status: `idle -> pending -> extracting -> generating -> completed | failed | cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    #[default]
    Idle,
    Pending,
    Extracting,
    Generating,
    Completed,
    Failed,
    Cancelled,
}

impl ExtractionStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Pending => 1,
            Self::Extracting => 2,
            Self::Generating => 3,
            Self::Completed | Self::Failed | Self::Cancelled => 4,
        }
    }

    /// The status after a transition to `next`.
    ///
    /// Terminal statuses are absorbing and non-terminal ones never move
    /// backwards, so replayed or reordered events cannot regress the job.
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }
}

impl JobStatus for ExtractionStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    #[default]
    Pending,
    Extracting,
    Completed,
    Failed,
}

impl ImageStatus {
    pub fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Detected,
    Generating,
    Generated,
    Failed,
    Deleted,
}

impl ItemStatus {
    /// Settled items no longer change through generation events.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Generated | Self::Failed | Self::Deleted)
    }
}

/// A clothing item detected in a source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedItem {
    /// Client-known id, stable across events and snapshots.
    pub temp_id: String,
    pub source_image_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub attributes: ItemAttributes,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub generated_image_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One uploaded source image and the items found in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSlot {
    pub id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub status: ImageStatus,
    #[serde(default)]
    pub detected_items: Vec<DetectedItem>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ImageSlot {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: None,
            status: ImageStatus::Pending,
            detected_items: Vec::new(),
            error: None,
        }
    }
}

/// Counters derived from the image and item collections.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtractionProgress {
    pub total_images: usize,
    pub images_completed: usize,
    pub images_failed: usize,
    /// Items taking part in generation (everything but deleted ones).
    pub total_items: usize,
    pub items_generated: usize,
    pub items_failed: usize,
    /// Percentage of images done, in `[0, 100]`.
    pub extraction_progress: f64,
    /// Percentage of items done, in `[0, 100]`.
    pub generation_progress: f64,
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Client-side view of one extraction job.
///
/// The default value is the idle state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionJob {
    pub job_id: Option<JobId>,
    pub status: ExtractionStatus,
    pub step: ExtractionStep,
    pub images: Vec<ImageSlot>,
    pub last_event_sequence: Option<EventSequence>,
    /// Latest command or connection failure, cleared by the next success.
    pub error: Option<String>,
}

impl TrackedJob for ExtractionJob {
    fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
}

impl ExtractionJob {
    pub fn is_idle(&self) -> bool {
        self.job_id.is_none() && self.status == ExtractionStatus::Idle && self.step == ExtractionStep::Select
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Every detected item, in image order.
    pub fn all_detected_items(&self) -> Vec<&DetectedItem> {
        self.images
            .iter()
            .flat_map(|image| image.detected_items.iter())
            .collect()
    }

    pub fn item(&self, temp_id: &str) -> Option<&DetectedItem> {
        self.images
            .iter()
            .flat_map(|image| image.detected_items.iter())
            .find(|item| item.temp_id == temp_id)
    }

    pub fn item_mut(&mut self, temp_id: &str) -> Option<&mut DetectedItem> {
        self.images
            .iter_mut()
            .flat_map(|image| image.detected_items.iter_mut())
            .find(|item| item.temp_id == temp_id)
    }

    pub fn image_mut(&mut self, image_id: &str) -> Option<&mut ImageSlot> {
        self.images.iter_mut().find(|image| image.id == image_id)
    }

    pub fn progress(&self) -> ExtractionProgress {
        let total_images = self.images.len();
        let images_completed = self
            .images
            .iter()
            .filter(|i| i.status == ImageStatus::Completed)
            .count();
        let images_failed = self
            .images
            .iter()
            .filter(|i| i.status == ImageStatus::Failed)
            .count();

        let items = self.all_detected_items();
        let active: Vec<_> = items
            .iter()
            .filter(|item| item.status != ItemStatus::Deleted)
            .collect();
        let items_generated = active
            .iter()
            .filter(|item| item.status == ItemStatus::Generated)
            .count();
        let items_failed = active
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .count();

        ExtractionProgress {
            total_images,
            images_completed,
            images_failed,
            total_items: active.len(),
            items_generated,
            items_failed,
            extraction_progress: percent(images_completed + images_failed, total_images),
            generation_progress: percent(items_generated + items_failed, active.len()),
        }
    }
}

/// Server-side state of an image, as returned by a snapshot fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotImage {
    pub id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub status: ImageStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Full job document returned by `GET extraction/jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSnapshot {
    pub job_id: JobId,
    pub status: ExtractionStatus,
    #[serde(default)]
    pub images: Vec<SnapshotImage>,
    /// Flat item list; regrouped by `source_image_id` on reconcile.
    #[serde(default)]
    pub items: Vec<DetectedItem>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Sequence of the last event emitted for this job.
    #[serde(default)]
    pub last_event_id: Option<EventSequence>,
}

/// Local edit of a detected item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub category: Option<String>,
    /// Merged into the existing attributes key by key.
    pub attributes: Option<ItemAttributes>,
}
