//! HTTP client for the job endpoints.
//!
//! [`JobApiClient`] wraps the backend's REST surface using [`reqwest`].
//! The family-specific traits ([`ExtractionApi`](crate::extraction::ExtractionApi),
//! [`SocialImportApi`](crate::social_import::SocialImportApi)) are
//! implemented on it in their own modules; this module holds the shared
//! request plumbing and error type.

use std::time::Duration;

use closet_core::job::JobFamily;
use closet_core::retry::Retryable;
use closet_core::types::JobId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// HTTP client for one backend.
#[derive(Clone)]
pub struct JobApiClient {
    client: reqwest::Client,
    api_url: String,
    bearer_token: Option<String>,
}

/// Response of every "create job" endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedJob {
    pub job_id: JobId,
}

/// Errors from the job REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Job API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ApiError {
    /// The job does not exist (expired or never created).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }
}

impl Retryable for ApiError {
    fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

impl JobApiClient {
    /// Create a client for a backend.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000/api`.
    pub fn new(api_url: String, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url,
            bearer_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- request helpers (used by the family API impls) ----

    /// `{api_url}/{family}/{path}` without doubled slashes.
    pub(crate) fn url(&self, family: JobFamily, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.api_url.trim_end_matches('/'),
            family.path_segment(),
            path.trim_start_matches('/')
        )
    }

    pub(crate) fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ApiError> {
        let response = self.request(reqwest::Method::GET, url).send().await?;
        Self::parse_response(response).await
    }

    pub(crate) async fn send_json<B, T>(
        &self,
        method: reqwest::Method,
        url: String,
        body: &B,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(method, url).json(body).send().await?;
        Self::parse_response(response).await
    }

    /// Send a request whose response body is irrelevant.
    pub(crate) async fn send_unit<B>(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<&B>,
    ) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized,
    {
        let mut builder = self.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        Self::check_status(response).await
    }

    pub(crate) async fn send_multipart<T: DeserializeOwned>(
        &self,
        url: String,
        form: reqwest::multipart::Form,
    ) -> Result<T, ApiError> {
        let response = self
            .request(reqwest::Method::POST, url)
            .multipart(form)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use closet_core::retry::RetryConfig;

    use super::*;

    fn client(base: &str) -> JobApiClient {
        JobApiClient::new(base.into(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_joins_family_segment() {
        let api = client("http://localhost:8000/api/");
        assert_eq!(
            api.url(JobFamily::SocialImport, "/jobs/j1/cancel"),
            "http://localhost:8000/api/social-import/jobs/j1/cancel"
        );
        assert_eq!(
            api.url(JobFamily::Extraction, "jobs"),
            "http://localhost:8000/api/extraction/jobs"
        );
    }

    #[test]
    fn status_errors_classify_for_retry() {
        let config = RetryConfig::default();
        let unavailable = ApiError::Status {
            status: 503,
            body: String::new(),
        };
        let missing = ApiError::Status {
            status: 404,
            body: String::new(),
        };
        assert!(config.should_retry(&unavailable));
        assert!(!config.should_retry(&missing));
        assert!(missing.is_not_found());
        assert!(!unavailable.is_not_found());
    }

    #[test]
    fn status_error_display() {
        let err = ApiError::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "Job API error (500): boom");
    }

    #[tokio::test]
    async fn unreachable_backend_is_retryable() {
        let api = client("http://127.0.0.1:9");
        let err = api
            .get_json::<serde_json::Value>(api.url(JobFamily::Extraction, "jobs/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Request(_)));
        assert!(RetryConfig::default().should_retry(&err));
    }
}
