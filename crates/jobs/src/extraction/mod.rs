//! Bulk image extraction: upload -> per-image extraction -> per-item
//! image generation -> review.

pub mod api;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod reducer;

pub use api::{CreateExtractionJob, ExtractionApi, ImageUpload, UploadedImage};
pub use events::ExtractionEvent;
pub use model::{
    DetectedItem, ExtractionJob, ExtractionProgress, ExtractionSnapshot, ExtractionStatus,
    ExtractionStep, ImageSlot, ImageStatus, ItemPatch, ItemStatus,
};
pub use orchestrator::ExtractionOrchestrator;
