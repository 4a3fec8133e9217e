//! `closet-watch` -- follow closet backend jobs from a terminal.
//!
//! Resumes the jobs named by the persisted pointers, or starts a new
//! extraction or social import, then logs every state change until the
//! job settles. Ctrl-C cancels the job remotely; a lost event stream
//! keeps the pointer so `closet-watch resume` can pick it up again.
//!
//! # Environment variables
//!
//! | Variable                   | Required | Default                     | Description                    |
//! |----------------------------|----------|-----------------------------|--------------------------------|
//! | `CLOSET_API_URL`           | no       | `http://localhost:8000/api` | Job REST API                   |
//! | `CLOSET_API_TOKEN`         | no       | --                          | Bearer token                   |
//! | `CLOSET_STREAM_TRANSPORT`  | no       | `sse`                       | `sse` or `ws`                  |
//! | `CLOSET_STREAM_URL`        | no       | derived from the API URL    | Event stream base URL          |
//! | `CLOSET_POINTER_DIR`       | no       | `.closet/jobs`              | Where active-job pointers live |
//!
//! See `ClientConfig::from_env` for the reconnect and retry knobs.

mod cli;
mod follow;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use closet_jobs::config::ClientConfig;
use closet_jobs::extraction::{ExtractionOrchestrator, ImageUpload};
use closet_jobs::pointer::JobPointerStore;
use closet_jobs::social_import::SocialImportOrchestrator;
use closet_jobs::tracker::ResumeOutcome;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{content_type_for, Command, USAGE};
use follow::{follow, Exit};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "closet_watch=info,closet_jobs=info,closet_stream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = match Command::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let config = ClientConfig::from_env()?;
    tracing::info!(
        api_url = %config.api_url,
        stream_url = %config.stream_url,
        transport = ?config.stream_transport,
        pointer_dir = %config.pointer_dir.display(),
        "Loaded client configuration",
    );

    let api = Arc::new(config.build_api()?);
    let transport = config.build_transport()?;
    let pointers: Arc<dyn JobPointerStore> = Arc::new(config.build_pointer_store());
    let tracker = config.tracker_config();

    let extraction = ExtractionOrchestrator::new(
        api.clone(),
        Arc::clone(&transport),
        Arc::clone(&pointers),
        tracker.clone(),
    );
    let social = SocialImportOrchestrator::new(api, transport, pointers, tracker);

    match command {
        Command::Resume => resume(&extraction, &social).await,
        Command::Import { platform, profile } => {
            let job_id = social.start(platform, &profile).await?;
            tracing::info!(job_id = %job_id, "Following social import");
            settle_social_import(&social).await
        }
        Command::Extract { files } => {
            let images = read_images(&files).await?;
            let job_id = extraction.start(images).await?;
            tracing::info!(job_id = %job_id, "Following extraction job");
            settle_extraction(&extraction).await
        }
    }
}

async fn resume(
    extraction: &ExtractionOrchestrator,
    social: &SocialImportOrchestrator,
) -> anyhow::Result<()> {
    let (extraction_outcome, social_outcome) = tokio::join!(extraction.resume(), social.resume());
    log_outcome("extraction", &extraction_outcome);
    log_outcome("social_import", &social_outcome);

    if !extraction_outcome.is_resumed() && !social_outcome.is_resumed() {
        tracing::info!("Nothing to resume");
        return Ok(());
    }

    let extraction_done = async {
        if extraction_outcome.is_resumed() {
            settle_extraction(extraction).await
        } else {
            Ok(())
        }
    };
    let social_done = async {
        if social_outcome.is_resumed() {
            settle_social_import(social).await
        } else {
            Ok(())
        }
    };
    let (extraction_result, social_result) = tokio::join!(extraction_done, social_done);
    extraction_result.and(social_result)
}

fn log_outcome(family: &'static str, outcome: &ResumeOutcome) {
    match outcome {
        ResumeOutcome::NoPointer => tracing::debug!(family, "No persisted job"),
        ResumeOutcome::AlreadyTracking => tracing::debug!(family, "Already tracking a job"),
        ResumeOutcome::Expired(job_id) => {
            tracing::warn!(family, job_id = %job_id, "Persisted job is gone")
        }
        ResumeOutcome::Interrupted(job_id) => {
            tracing::info!(family, job_id = %job_id, "Resume interrupted")
        }
        ResumeOutcome::Finished(job_id) => {
            tracing::info!(family, job_id = %job_id, "Persisted job already finished")
        }
        ResumeOutcome::Resumed(job_id) => tracing::info!(family, job_id = %job_id, "Resumed job"),
    }
}

async fn settle_extraction(orchestrator: &ExtractionOrchestrator) -> anyhow::Result<()> {
    match follow("extraction", orchestrator.subscribe(), orchestrator.watch_connected()).await {
        Exit::Finished => {
            let job = orchestrator.snapshot();
            tracing::info!(
                job_id = ?job.job_id,
                status = ?job.status,
                items = job.all_detected_items().len(),
                "Extraction job finished",
            );
            Ok(())
        }
        Exit::Interrupted => {
            orchestrator.cancel().await;
            tracing::info!("Extraction job cancelled");
            Ok(())
        }
        Exit::Lost(error) => {
            orchestrator.shutdown().await;
            anyhow::bail!("Lost extraction job updates ({error}); run `closet-watch resume` to continue")
        }
    }
}

async fn settle_social_import(orchestrator: &SocialImportOrchestrator) -> anyhow::Result<()> {
    match follow("social_import", orchestrator.subscribe(), orchestrator.watch_connected()).await {
        Exit::Finished => {
            let job = orchestrator.snapshot();
            tracing::info!(
                job_id = ?job.job_id,
                status = ?job.status,
                imported_items = job.imported_items,
                error = ?job.error_message,
                "Social import finished",
            );
            Ok(())
        }
        Exit::Interrupted => {
            orchestrator.cancel().await;
            tracing::info!("Social import cancelled");
            Ok(())
        }
        Exit::Lost(error) => {
            orchestrator.shutdown().await;
            anyhow::bail!("Lost social import updates ({error}); run `closet-watch resume` to continue")
        }
    }
}

async fn read_images(files: &[PathBuf]) -> anyhow::Result<Vec<ImageUpload>> {
    let mut images = Vec::with_capacity(files.len());
    for path in files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image")
            .to_string();
        images.push(ImageUpload {
            file_name,
            content_type: content_type_for(path).to_string(),
            bytes,
        });
    }
    Ok(images)
}
