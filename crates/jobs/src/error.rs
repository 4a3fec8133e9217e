use closet_core::error::CoreError;
use closet_core::retry::RetryError;

use crate::api::ApiError;

/// Errors returned by orchestrator commands.
///
/// Commands also record a human-readable form in the job's `error`
/// field; the returned value is for callers that need to branch on it.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The job API call failed (after retries, where applicable).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The command was interrupted by `cancel()` / `reset()`.
    #[error("Command cancelled")]
    Cancelled,

    /// Invalid input or a command issued without an active job.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<RetryError<ApiError>> for JobError {
    fn from(err: RetryError<ApiError>) -> Self {
        match err {
            RetryError::Operation(e) => JobError::Api(e),
            RetryError::Cancelled => JobError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn retry_cancellation_maps_to_cancelled() {
        let err: JobError = RetryError::<ApiError>::Cancelled.into();
        assert_matches!(err, JobError::Cancelled);
    }

    #[test]
    fn retry_operation_error_is_unwrapped() {
        let err: JobError = RetryError::Operation(ApiError::Status {
            status: 404,
            body: "missing".into(),
        })
        .into();
        assert_matches!(err, JobError::Api(ApiError::Status { status: 404, .. }));
        assert_eq!(err.to_string(), "Job API error (404): missing");
    }

    #[test]
    fn core_error_is_transparent() {
        let err: JobError = CoreError::Conflict("No active job".into()).into();
        assert_eq!(err.to_string(), "Conflict: No active job");
    }
}
