//! Pure folds of events and snapshots into an [`ExtractionJob`].
//!
//! Fine-grained events patch the state incrementally. `job_complete` and
//! snapshot fetches are authoritative: they regroup the whole item
//! collection by source image, healing anything missed while
//! disconnected. Every fold is last-write-wins per key, so replaying an
//! event leaves the state unchanged.

use std::collections::HashMap;

use closet_core::job::JobStatus;

use super::events::{ExtractedItem, ExtractionEvent};
use super::model::{
    DetectedItem, ExtractionJob, ExtractionSnapshot, ExtractionStatus, ExtractionStep, ImageSlot,
    ImageStatus, ItemStatus, SnapshotImage,
};

/// Prefix of image ids that exist only locally (failed uploads).
pub const LOCAL_IMAGE_PREFIX: &str = "local-";

/// `(previous, event) -> next`.
pub fn reduce(previous: &ExtractionJob, event: &ExtractionEvent) -> ExtractionJob {
    let mut next = previous.clone();
    apply(&mut next, event);
    next
}

/// In-place form of [`reduce`].
///
/// Events arriving after a terminal status are ignored.
pub fn apply(job: &mut ExtractionJob, event: &ExtractionEvent) {
    if job.status.is_terminal() {
        return;
    }

    match event {
        ExtractionEvent::Connected | ExtractionEvent::Heartbeat | ExtractionEvent::Unknown(_) => {}

        ExtractionEvent::ExtractionStarted(_) => {
            enter(job, ExtractionStatus::Extracting, ExtractionStep::Extracting);
            for image in &mut job.images {
                if image.status == ImageStatus::Pending {
                    image.status = ImageStatus::Extracting;
                }
            }
        }

        ExtractionEvent::ImageExtractionComplete(e) => {
            enter(job, ExtractionStatus::Extracting, ExtractionStep::Extracting);
            let image = slot(job, &e.image_id);
            image.status = ImageStatus::Completed;
            image.error = None;
            image.detected_items = merge_items(&image.detected_items, &e.image_id, &e.items);
        }

        ExtractionEvent::ImageExtractionFailed(e) => {
            enter(job, ExtractionStatus::Extracting, ExtractionStep::Extracting);
            let image = slot(job, &e.image_id);
            image.status = ImageStatus::Failed;
            image.error = Some(e.error.clone().unwrap_or_else(|| "Extraction failed".into()));
        }

        ExtractionEvent::AllExtractionsComplete => {
            enter(job, ExtractionStatus::Extracting, ExtractionStep::Extracting);
        }

        ExtractionEvent::GenerationStarted(_) => {
            enter(job, ExtractionStatus::Generating, ExtractionStep::Generating);
            for item in job.images.iter_mut().flat_map(|i| i.detected_items.iter_mut()) {
                if item.status == ItemStatus::Detected {
                    item.status = ItemStatus::Generating;
                }
            }
        }

        ExtractionEvent::BatchGenerationStarted(batch) => {
            enter(job, ExtractionStatus::Generating, ExtractionStep::Generating);
            for temp_id in &batch.item_ids {
                if let Some(item) = job.item_mut(temp_id) {
                    if item.status == ItemStatus::Detected {
                        item.status = ItemStatus::Generating;
                    }
                }
            }
        }

        ExtractionEvent::ItemGenerationComplete(e) => {
            enter(job, ExtractionStatus::Generating, ExtractionStep::Generating);
            match job.item_mut(&e.temp_id) {
                Some(item) if item.status != ItemStatus::Deleted => {
                    item.status = ItemStatus::Generated;
                    item.generated_image_url = e.image_url.clone();
                    item.error = None;
                }
                Some(_) => {}
                None => tracing::debug!(temp_id = %e.temp_id, "Generation result for unknown item"),
            }
        }

        ExtractionEvent::ItemGenerationFailed(e) => {
            enter(job, ExtractionStatus::Generating, ExtractionStep::Generating);
            match job.item_mut(&e.temp_id) {
                Some(item) if item.status != ItemStatus::Deleted => {
                    item.status = ItemStatus::Failed;
                    item.error = Some(e.error.clone().unwrap_or_else(|| "Generation failed".into()));
                }
                Some(_) => {}
                None => tracing::debug!(temp_id = %e.temp_id, "Generation failure for unknown item"),
            }
        }

        ExtractionEvent::AllGenerationsComplete => {
            enter(job, ExtractionStatus::Generating, ExtractionStep::Review);
        }

        ExtractionEvent::JobComplete(complete) => {
            regroup(job, &complete.images, &complete.items);
            enter(job, ExtractionStatus::Completed, ExtractionStep::Review);
        }

        ExtractionEvent::JobFailed(failed) => {
            job.status = job.status.advance(ExtractionStatus::Failed);
            job.error = Some(
                failed
                    .error
                    .clone()
                    .unwrap_or_else(|| "Extraction job failed".into()),
            );
        }

        ExtractionEvent::JobCancelled => {
            job.status = job.status.advance(ExtractionStatus::Cancelled);
        }
    }
}

/// Fold a fetched snapshot into `job`. The snapshot wins over whatever
/// incremental state was accumulated.
pub fn reconcile(job: &mut ExtractionJob, snapshot: &ExtractionSnapshot) {
    job.job_id = Some(snapshot.job_id.clone());
    regroup(job, &snapshot.images, &snapshot.items);

    let step = match snapshot.status {
        ExtractionStatus::Idle | ExtractionStatus::Pending | ExtractionStatus::Extracting => {
            ExtractionStep::Extracting
        }
        ExtractionStatus::Generating => ExtractionStep::Generating,
        ExtractionStatus::Completed => ExtractionStep::Review,
        ExtractionStatus::Failed | ExtractionStatus::Cancelled => job.step,
    };
    enter(job, snapshot.status, step);

    if snapshot.status == ExtractionStatus::Failed {
        job.error = snapshot
            .error_message
            .clone()
            .or_else(|| Some("Extraction job failed".into()));
    }

    if let Some(sequence) = snapshot.last_event_id {
        job.last_event_sequence = Some(job.last_event_sequence.map_or(sequence, |s| s.max(sequence)));
    }
}

/// Build the client state of a job known only by its snapshot.
pub fn from_snapshot(snapshot: &ExtractionSnapshot) -> ExtractionJob {
    let mut job = ExtractionJob::default();
    reconcile(&mut job, snapshot);
    job
}

fn enter(job: &mut ExtractionJob, status: ExtractionStatus, step: ExtractionStep) {
    job.status = job.status.advance(status);
    job.step = job.step.max(step);
}

/// The slot for `image_id`, appended if the server knows an image we do not.
fn slot<'a>(job: &'a mut ExtractionJob, image_id: &str) -> &'a mut ImageSlot {
    let index = match job.images.iter().position(|i| i.id == image_id) {
        Some(index) => index,
        None => {
            job.images.push(ImageSlot::pending(image_id));
            job.images.len() - 1
        }
    };
    &mut job.images[index]
}

/// Replace an image's items with `reported`, keeping the local state of
/// items that were already known.
fn merge_items(existing: &[DetectedItem], image_id: &str, reported: &[ExtractedItem]) -> Vec<DetectedItem> {
    reported
        .iter()
        .map(|r| {
            existing
                .iter()
                .find(|item| item.temp_id == r.temp_id)
                .cloned()
                .unwrap_or_else(|| DetectedItem {
                    temp_id: r.temp_id.clone(),
                    source_image_id: image_id.to_string(),
                    category: r.category.clone(),
                    attributes: r.attributes.clone(),
                    status: ItemStatus::Detected,
                    generated_image_url: None,
                    error: None,
                })
        })
        .collect()
}

/// Wholesale replacement of the image/item collections.
///
/// Images come from `images` when the server listed them, otherwise the
/// current slots are kept. Items are regrouped by `source_image_id`;
/// items pointing at an unknown image get a slot of their own. Failed
/// local uploads are kept since the server never saw them.
fn regroup(job: &mut ExtractionJob, images: &[SnapshotImage], items: &[DetectedItem]) {
    let mut slots: Vec<ImageSlot> = if images.is_empty() {
        job.images
            .iter()
            .map(|image| ImageSlot {
                detected_items: Vec::new(),
                ..image.clone()
            })
            .collect()
    } else {
        let previous: HashMap<&str, &ImageSlot> =
            job.images.iter().map(|i| (i.id.as_str(), i)).collect();
        let mut slots: Vec<ImageSlot> = images
            .iter()
            .map(|image| ImageSlot {
                id: image.id.clone(),
                file_name: image
                    .file_name
                    .clone()
                    .or_else(|| previous.get(image.id.as_str()).and_then(|p| p.file_name.clone())),
                status: image.status,
                detected_items: Vec::new(),
                error: image.error.clone(),
            })
            .collect();
        slots.extend(
            job.images
                .iter()
                .filter(|i| i.id.starts_with(LOCAL_IMAGE_PREFIX) && !images.iter().any(|s| s.id == i.id))
                .cloned(),
        );
        slots
    };

    for item in items {
        let index = match slots.iter().position(|s| s.id == item.source_image_id) {
            Some(index) => index,
            None => {
                let mut image = ImageSlot::pending(item.source_image_id.clone());
                image.status = ImageStatus::Completed;
                slots.push(image);
                slots.len() - 1
            }
        };
        let image = &mut slots[index];
        if !image.status.is_done() {
            image.status = ImageStatus::Completed;
        }
        image.detected_items.push(item.clone());
    }

    job.images = slots;
}
