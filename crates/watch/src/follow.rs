//! Follow a tracked job until it settles, logging every visible change.

use closet_jobs::extraction::ExtractionJob;
use closet_jobs::social_import::SocialImportJob;
use tokio::sync::watch;

/// How following a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    /// The job reached a terminal status.
    Finished,
    /// Ctrl-C was pressed.
    Interrupted,
    /// The event stream gave up; the job may still be running remotely.
    Lost(String),
}

/// What the follow loop needs to know about a job.
pub trait Watched: Clone {
    /// Short description used to suppress duplicate log lines.
    fn summary(&self) -> String;
    fn is_terminal(&self) -> bool;
    fn error(&self) -> Option<&str>;
    fn log(&self);
}

impl Watched for ExtractionJob {
    fn summary(&self) -> String {
        let p = self.progress();
        format!(
            "{:?}/{:?} images {}+{}/{} items {}+{}/{}",
            self.status,
            self.step,
            p.images_completed,
            p.images_failed,
            p.total_images,
            p.items_generated,
            p.items_failed,
            p.total_items,
        )
    }

    fn is_terminal(&self) -> bool {
        ExtractionJob::is_terminal(self)
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn log(&self) {
        let p = self.progress();
        tracing::info!(
            job_id = ?self.job_id,
            status = ?self.status,
            step = ?self.step,
            images_done = p.images_completed + p.images_failed,
            images_total = p.total_images,
            items_done = p.items_generated + p.items_failed,
            items_total = p.total_items,
            extraction_pct = p.extraction_progress.round(),
            generation_pct = p.generation_progress.round(),
            "Extraction job updated",
        );
    }
}

impl Watched for SocialImportJob {
    fn summary(&self) -> String {
        format!(
            "{:?} auth={} review={:?} photos {}/{} items {}",
            self.status,
            self.auth_required,
            self.awaiting_review_photo_id,
            self.processed_photos,
            self.total_photos,
            self.imported_items,
        )
    }

    fn is_terminal(&self) -> bool {
        SocialImportJob::is_terminal(self)
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn log(&self) {
        tracing::info!(
            job_id = ?self.job_id,
            status = ?self.status,
            auth_required = self.auth_required,
            awaiting_review = ?self.awaiting_review_photo_id,
            processed_photos = self.processed_photos,
            total_photos = self.total_photos,
            imported_items = self.imported_items,
            "Social import updated",
        );
    }
}

/// Log changes of `jobs` until the job is terminal, the stream is lost or
/// Ctrl-C is pressed.
pub async fn follow<J: Watched>(
    family: &'static str,
    mut jobs: watch::Receiver<J>,
    mut connected: watch::Receiver<bool>,
) -> Exit {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_summary = String::new();
    let mut last_error: Option<String> = None;
    let mut was_connected = *connected.borrow_and_update();

    loop {
        let job = jobs.borrow_and_update().clone();
        let is_connected = *connected.borrow_and_update();

        let summary = job.summary();
        if summary != last_summary {
            job.log();
            last_summary = summary;
        }

        let error = job.error().map(str::to_string);
        if error != last_error {
            if let Some(error) = &error {
                tracing::warn!(family, error = %error, "Job reported an error");
            }
            last_error = error.clone();
        }

        if is_connected != was_connected {
            tracing::info!(family, connected = is_connected, "Event stream connection changed");
            was_connected = is_connected;
        }

        if job.is_terminal() {
            return Exit::Finished;
        }
        if !is_connected {
            if let Some(error) = error {
                return Exit::Lost(error);
            }
        }

        tokio::select! {
            changed = jobs.changed() => {
                if changed.is_err() {
                    return Exit::Lost("Job state closed".into());
                }
            }
            changed = connected.changed() => {
                if changed.is_err() {
                    return Exit::Lost("Connection state closed".into());
                }
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
                return Exit::Interrupted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use closet_jobs::social_import::SocialImportStatus;

    use super::*;

    #[tokio::test]
    async fn returns_when_job_turns_terminal() {
        let (jobs_tx, jobs_rx) = watch::channel(SocialImportJob {
            job_id: Some("s1".into()),
            status: SocialImportStatus::Processing,
            ..Default::default()
        });
        let (_connected_tx, connected_rx) = watch::channel(true);

        let follower = tokio::spawn(follow("social_import", jobs_rx, connected_rx));
        jobs_tx.send_modify(|job| job.status = SocialImportStatus::Completed);

        assert_eq!(follower.await.unwrap(), Exit::Finished);
    }

    #[tokio::test]
    async fn lost_stream_ends_following() {
        let (jobs_tx, jobs_rx) = watch::channel(SocialImportJob {
            job_id: Some("s1".into()),
            status: SocialImportStatus::Processing,
            ..Default::default()
        });
        let (connected_tx, connected_rx) = watch::channel(true);

        let follower = tokio::spawn(follow("social_import", jobs_rx, connected_rx));
        connected_tx.send_replace(false);
        jobs_tx.send_modify(|job| job.error = Some("Lost connection".into()));

        assert_eq!(follower.await.unwrap(), Exit::Lost("Lost connection".into()));
    }
}
