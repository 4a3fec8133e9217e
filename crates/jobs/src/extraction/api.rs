use async_trait::async_trait;
use closet_core::job::JobFamily;
use serde::{Deserialize, Serialize};

use super::model::ExtractionSnapshot;
use crate::api::{ApiError, CreatedJob, JobApiClient};

/// An image selected for extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub image_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateExtractionJob {
    pub image_ids: Vec<String>,
}

/// Backend operations of the extraction family.
#[async_trait]
pub trait ExtractionApi: Send + Sync {
    async fn upload_image(&self, image: &ImageUpload) -> Result<UploadedImage, ApiError>;
    async fn create_job(&self, request: &CreateExtractionJob) -> Result<CreatedJob, ApiError>;
    async fn fetch_job(&self, job_id: &str) -> Result<ExtractionSnapshot, ApiError>;
    async fn cancel_job(&self, job_id: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl ExtractionApi for JobApiClient {
    /// `POST /extraction/images` (multipart field `file`).
    async fn upload_image(&self, image: &ImageUpload) -> Result<UploadedImage, ApiError> {
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        self.send_multipart(self.url(JobFamily::Extraction, "images"), form)
            .await
    }

    /// `POST /extraction/jobs`
    async fn create_job(&self, request: &CreateExtractionJob) -> Result<CreatedJob, ApiError> {
        self.send_json(
            reqwest::Method::POST,
            self.url(JobFamily::Extraction, "jobs"),
            request,
        )
        .await
    }

    /// `GET /extraction/jobs/{id}`
    async fn fetch_job(&self, job_id: &str) -> Result<ExtractionSnapshot, ApiError> {
        self.get_json(self.url(JobFamily::Extraction, &format!("jobs/{job_id}")))
            .await
    }

    /// `POST /extraction/jobs/{id}/cancel`
    async fn cancel_job(&self, job_id: &str) -> Result<(), ApiError> {
        self.send_unit::<()>(
            reqwest::Method::POST,
            self.url(JobFamily::Extraction, &format!("jobs/{job_id}/cancel")),
            None,
        )
        .await
    }
}
