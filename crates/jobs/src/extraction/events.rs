//! Typed extraction events.
//!
//! [`ExtractionEvent::from_stream`] interprets a family-agnostic
//! [`StreamEvent`] by its `type`. Unknown types are reported as
//! [`ExtractionEvent::Unknown`] and ignored by the reducer.

use closet_stream::StreamEvent;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::model::{DetectedItem, ItemAttributes, SnapshotImage};

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionEvent {
    Connected,
    Heartbeat,
    ExtractionStarted(ExtractionStarted),
    ImageExtractionComplete(ImageExtractionComplete),
    ImageExtractionFailed(ImageExtractionFailed),
    AllExtractionsComplete,
    GenerationStarted(GenerationStarted),
    BatchGenerationStarted(BatchGenerationStarted),
    ItemGenerationComplete(ItemGenerationComplete),
    ItemGenerationFailed(ItemGenerationFailed),
    AllGenerationsComplete,
    JobComplete(JobComplete),
    JobFailed(JobFailed),
    JobCancelled,
    Unknown(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractionStarted {
    pub total_images: Option<usize>,
}

/// An item as reported by `image_extraction_complete`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedItem {
    pub temp_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub attributes: ItemAttributes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageExtractionComplete {
    pub image_id: String,
    #[serde(default)]
    pub items: Vec<ExtractedItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageExtractionFailed {
    pub image_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationStarted {
    pub total_items: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchGenerationStarted {
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemGenerationComplete {
    pub temp_id: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemGenerationFailed {
    pub temp_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Authoritative final item list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobComplete {
    pub images: Vec<SnapshotImage>,
    pub items: Vec<DetectedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobFailed {
    pub error: Option<String>,
}

/// A known event type whose payload did not match its shape.
#[derive(Debug, thiserror::Error)]
#[error("Invalid '{event_type}' payload: {source}")]
pub struct EventParseError {
    pub event_type: String,
    #[source]
    pub source: serde_json::Error,
}

impl ExtractionEvent {
    pub fn from_stream(event: &StreamEvent) -> Result<Self, EventParseError> {
        let kind = event.event_type.as_str();
        Ok(match kind {
            "connected" => Self::Connected,
            "heartbeat" => Self::Heartbeat,
            "extraction_started" => Self::ExtractionStarted(payload(event)?),
            "image_extraction_complete" => Self::ImageExtractionComplete(payload(event)?),
            "image_extraction_failed" => Self::ImageExtractionFailed(payload(event)?),
            "all_extractions_complete" => Self::AllExtractionsComplete,
            "generation_started" => Self::GenerationStarted(payload(event)?),
            "batch_generation_started" => Self::BatchGenerationStarted(payload(event)?),
            "item_generation_complete" => Self::ItemGenerationComplete(payload(event)?),
            "item_generation_failed" => Self::ItemGenerationFailed(payload(event)?),
            "all_generations_complete" => Self::AllGenerationsComplete,
            "job_complete" => Self::JobComplete(payload(event)?),
            "job_failed" => Self::JobFailed(payload(event)?),
            "job_cancelled" => Self::JobCancelled,
            other => Self::Unknown(other.to_string()),
        })
    }

    /// The job reached a terminal status; no further events follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::JobComplete(_) | Self::JobFailed(_) | Self::JobCancelled
        )
    }
}

/// Decode `data`, treating a missing payload as an empty object.
fn payload<T: DeserializeOwned>(event: &StreamEvent) -> Result<T, EventParseError> {
    let data = if event.data.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        event.data.clone()
    };
    serde_json::from_value(data).map_err(|source| EventParseError {
        event_type: event.event_type.clone(),
        source,
    })
}
