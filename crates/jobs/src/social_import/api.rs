use std::fmt;

use async_trait::async_trait;
use closet_core::job::JobFamily;
use serde::{Deserialize, Serialize};

use super::model::{SocialImportSnapshot, SocialPlatform};
use crate::api::{ApiError, CreatedJob, JobApiClient};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSocialImport {
    pub platform: SocialPlatform,
    /// Profile handle or URL to import from.
    pub profile: String,
}

/// Result of the platform's OAuth redirect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OAuthGrant {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Platform login for imports that cannot use OAuth.
#[derive(Clone, PartialEq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// One-time code for accounts with two-factor authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("otp", &self.otp.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Fields of a detected item to overwrite during review.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhotoItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Backend operations of the social import family.
#[async_trait]
pub trait SocialImportApi: Send + Sync {
    async fn create_job(&self, request: &StartSocialImport) -> Result<CreatedJob, ApiError>;
    async fn fetch_job(&self, job_id: &str) -> Result<SocialImportSnapshot, ApiError>;
    async fn cancel_job(&self, job_id: &str) -> Result<(), ApiError>;
    async fn submit_oauth_auth(&self, job_id: &str, grant: &OAuthGrant) -> Result<(), ApiError>;
    async fn submit_credential_auth(
        &self,
        job_id: &str,
        credentials: &Credentials,
    ) -> Result<(), ApiError>;
    async fn patch_item(
        &self,
        job_id: &str,
        photo_id: &str,
        item_id: &str,
        patch: &PhotoItemPatch,
    ) -> Result<(), ApiError>;
    async fn approve_photo(&self, job_id: &str, photo_id: &str) -> Result<(), ApiError>;
    async fn reject_photo(&self, job_id: &str, photo_id: &str) -> Result<(), ApiError>;
}

impl JobApiClient {
    fn social_url(&self, path: &str) -> String {
        self.url(JobFamily::SocialImport, path)
    }
}

#[async_trait]
impl SocialImportApi for JobApiClient {
    /// `POST /social-import/jobs`
    async fn create_job(&self, request: &StartSocialImport) -> Result<CreatedJob, ApiError> {
        self.send_json(reqwest::Method::POST, self.social_url("jobs"), request)
            .await
    }

    /// `GET /social-import/jobs/{id}`
    async fn fetch_job(&self, job_id: &str) -> Result<SocialImportSnapshot, ApiError> {
        self.get_json(self.social_url(&format!("jobs/{job_id}"))).await
    }

    /// `POST /social-import/jobs/{id}/cancel`
    async fn cancel_job(&self, job_id: &str) -> Result<(), ApiError> {
        self.send_unit::<()>(
            reqwest::Method::POST,
            self.social_url(&format!("jobs/{job_id}/cancel")),
            None,
        )
        .await
    }

    /// `POST /social-import/jobs/{id}/auth/oauth`
    async fn submit_oauth_auth(&self, job_id: &str, grant: &OAuthGrant) -> Result<(), ApiError> {
        self.send_unit(
            reqwest::Method::POST,
            self.social_url(&format!("jobs/{job_id}/auth/oauth")),
            Some(grant),
        )
        .await
    }

    /// `POST /social-import/jobs/{id}/auth/credentials`
    async fn submit_credential_auth(
        &self,
        job_id: &str,
        credentials: &Credentials,
    ) -> Result<(), ApiError> {
        self.send_unit(
            reqwest::Method::POST,
            self.social_url(&format!("jobs/{job_id}/auth/credentials")),
            Some(credentials),
        )
        .await
    }

    /// `PATCH /social-import/jobs/{id}/photos/{photo}/items/{item}`
    async fn patch_item(
        &self,
        job_id: &str,
        photo_id: &str,
        item_id: &str,
        patch: &PhotoItemPatch,
    ) -> Result<(), ApiError> {
        self.send_unit(
            reqwest::Method::PATCH,
            self.social_url(&format!("jobs/{job_id}/photos/{photo_id}/items/{item_id}")),
            Some(patch),
        )
        .await
    }

    /// `POST /social-import/jobs/{id}/photos/{photo}/approve`
    async fn approve_photo(&self, job_id: &str, photo_id: &str) -> Result<(), ApiError> {
        self.send_unit::<()>(
            reqwest::Method::POST,
            self.social_url(&format!("jobs/{job_id}/photos/{photo_id}/approve")),
            None,
        )
        .await
    }

    /// `POST /social-import/jobs/{id}/photos/{photo}/reject`
    async fn reject_photo(&self, job_id: &str, photo_id: &str) -> Result<(), ApiError> {
        self.send_unit::<()>(
            reqwest::Method::POST,
            self.social_url(&format!("jobs/{job_id}/photos/{photo_id}/reject")),
            None,
        )
        .await
    }
}
