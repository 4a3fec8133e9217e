//! Social import job state.

use std::fmt;
use std::str::FromStr;

use closet_core::error::CoreError;
use closet_core::job::JobStatus;
use closet_core::types::{EventSequence, JobId};
use serde::{Deserialize, Serialize};

use crate::tracker::TrackedJob;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialImportStatus {
    /// No job is tracked.
    #[default]
    Idle,
    Pending,
    AwaitingAuth,
    Processing,
    AwaitingReview,
    Buffered,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus for SocialImportStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPlatform {
    Instagram,
    Pinterest,
    Tiktok,
}

impl SocialPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Pinterest => "pinterest",
            Self::Tiktok => "tiktok",
        }
    }
}

impl fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialPlatform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instagram" => Ok(Self::Instagram),
            "pinterest" => Ok(Self::Pinterest),
            "tiktok" => Ok(Self::Tiktok),
            other => Err(CoreError::Validation(format!("Unsupported platform '{other}'"))),
        }
    }
}

/// An item the importer found in a photo awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPhoto {
    pub photo_id: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub items: Vec<ReviewItem>,
}

/// Full job document returned by `GET social-import/jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialImportSnapshot {
    pub job_id: JobId,
    pub status: SocialImportStatus,
    #[serde(default)]
    pub platform: Option<SocialPlatform>,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub awaiting_review_photo: Option<ReviewPhoto>,
    #[serde(default)]
    pub awaiting_review_photo_id: Option<String>,
    #[serde(default)]
    pub buffered_photo_id: Option<String>,
    #[serde(default)]
    pub processing_photo_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub total_photos: u32,
    #[serde(default)]
    pub processed_photos: u32,
    #[serde(default)]
    pub imported_items: u32,
    #[serde(default)]
    pub last_event_id: Option<EventSequence>,
}

/// Client-side view of one social import job. The default value is idle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocialImportJob {
    pub job_id: Option<JobId>,
    pub platform: Option<SocialPlatform>,
    pub profile: Option<String>,
    pub status: SocialImportStatus,
    pub auth_required: bool,
    pub awaiting_review_photo: Option<ReviewPhoto>,
    pub awaiting_review_photo_id: Option<String>,
    pub buffered_photo_id: Option<String>,
    pub processing_photo_id: Option<String>,
    /// Failure reported by the backend for the job itself.
    pub error_message: Option<String>,
    pub total_photos: u32,
    pub processed_photos: u32,
    pub imported_items: u32,
    pub last_event_sequence: Option<EventSequence>,
    /// Latest command or connection failure, cleared by the next success.
    pub error: Option<String>,
}

impl TrackedJob for SocialImportJob {
    fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
}

impl SocialImportJob {
    pub fn is_idle(&self) -> bool {
        self.job_id.is_none() && self.status == SocialImportStatus::Idle
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
