//! Social import folding.
//!
//! Event payloads are not trusted to be self-sufficient. Only the types
//! listed in [`SocialImportEvent`] are handled locally; everything else
//! triggers a reconciling fetch whose snapshot replaces the job state.

use closet_core::job::JobStatus;
use closet_stream::messages::{EVENT_CONNECTED, EVENT_HEARTBEAT};
use closet_stream::StreamEvent;

use super::model::{SocialImportJob, SocialImportSnapshot};

/// Event types that are safe to fold without a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocialImportEvent {
    Connected,
    Heartbeat,
    /// Any other type; the job must be re-fetched.
    Refetch(String),
}

impl SocialImportEvent {
    pub fn classify(event: &StreamEvent) -> Self {
        match event.event_type.as_str() {
            EVENT_CONNECTED => Self::Connected,
            EVENT_HEARTBEAT => Self::Heartbeat,
            other => Self::Refetch(other.to_string()),
        }
    }

    pub fn needs_refetch(&self) -> bool {
        matches!(self, Self::Refetch(_))
    }
}

/// Replace the server-owned fields of `job` with `snapshot`.
///
/// The client-side `error` is left alone here; callers clear it once a
/// fetched snapshot has been applied.
pub fn reconcile(job: &mut SocialImportJob, snapshot: &SocialImportSnapshot) {
    job.job_id = Some(snapshot.job_id.clone());
    if !job.status.is_terminal() {
        job.status = snapshot.status;
    }
    if snapshot.platform.is_some() {
        job.platform = snapshot.platform;
    }
    job.auth_required = snapshot.auth_required;
    job.awaiting_review_photo = snapshot.awaiting_review_photo.clone();
    job.awaiting_review_photo_id = snapshot
        .awaiting_review_photo_id
        .clone()
        .or_else(|| snapshot.awaiting_review_photo.as_ref().map(|p| p.photo_id.clone()));
    job.buffered_photo_id = snapshot.buffered_photo_id.clone();
    job.processing_photo_id = snapshot.processing_photo_id.clone();
    job.error_message = snapshot.error_message.clone();
    job.total_photos = snapshot.total_photos;
    job.processed_photos = snapshot.processed_photos;
    job.imported_items = snapshot.imported_items;
    if let Some(sequence) = snapshot.last_event_id {
        job.last_event_sequence = Some(job.last_event_sequence.map_or(sequence, |s| s.max(sequence)));
    }
}

pub fn from_snapshot(snapshot: &SocialImportSnapshot) -> SocialImportJob {
    let mut job = SocialImportJob::default();
    reconcile(&mut job, snapshot);
    job
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::social_import::model::SocialImportStatus;

    fn snapshot(value: serde_json::Value) -> SocialImportSnapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn only_control_markers_skip_the_fetch() {
        let classify = |t: &str| SocialImportEvent::classify(&StreamEvent::new(t, json!({})));
        assert!(!classify("connected").needs_refetch());
        assert!(!classify("heartbeat").needs_refetch());
        assert!(classify("photo_processed").needs_refetch());
        assert!(classify("auth_required").needs_refetch());
    }

    #[test]
    fn snapshot_replaces_fields_wholesale() {
        let mut job = SocialImportJob {
            job_id: Some("s1".into()),
            status: SocialImportStatus::AwaitingReview,
            awaiting_review_photo_id: Some("p1".into()),
            buffered_photo_id: Some("p2".into()),
            error_message: Some("old".into()),
            error: Some("approve failed".into()),
            ..Default::default()
        };

        reconcile(
            &mut job,
            &snapshot(json!({"job_id": "s1", "status": "processing", "processing_photo_id": "p3"})),
        );

        assert_eq!(job.status, SocialImportStatus::Processing);
        assert_eq!(job.awaiting_review_photo_id, None);
        assert_eq!(job.buffered_photo_id, None);
        assert_eq!(job.processing_photo_id.as_deref(), Some("p3"));
        assert_eq!(job.error_message, None);
        assert_eq!(job.error.as_deref(), Some("approve failed"));
    }

    #[test]
    fn review_photo_id_falls_back_to_photo() {
        let job = from_snapshot(&snapshot(json!({
            "job_id": "s1",
            "status": "awaiting_review",
            "awaiting_review_photo": {"photo_id": "p9"}
        })));
        assert_eq!(job.awaiting_review_photo_id.as_deref(), Some("p9"));
    }

    #[test]
    fn terminal_status_is_absorbing() {
        let mut job = from_snapshot(&snapshot(json!({"job_id": "s1", "status": "completed"})));
        reconcile(&mut job, &snapshot(json!({"job_id": "s1", "status": "processing"})));
        assert_eq!(job.status, SocialImportStatus::Completed);
    }

    #[test]
    fn sequence_never_moves_backwards() {
        let mut job = from_snapshot(&snapshot(json!({"job_id": "s1", "status": "pending", "last_event_id": 8})));
        reconcile(&mut job, &snapshot(json!({"job_id": "s1", "status": "pending", "last_event_id": 3})));
        assert_eq!(job.last_event_sequence, Some(8));
    }
}
