//! Transport seam for job event streams.
//!
//! An [`EventTransport`] opens one push channel for one job and yields
//! raw [`TransportFrame`]s. Framing (SSE vs. WebSocket) stays inside the
//! transport; envelope decoding, reconnects and dispatch live in
//! [`connection`](crate::connection).

use std::pin::Pin;

use async_trait::async_trait;
use closet_core::job::JobFamily;
use closet_core::types::{EventSequence, JobId};
use futures::Stream;

/// Stream of raw frames for one transport session.
///
/// The stream ending (or yielding an error) means the session dropped.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<TransportFrame, StreamError>> + Send>>;

/// Which job a stream belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub family: JobFamily,
    pub job_id: JobId,
}

impl StreamTarget {
    pub fn new(family: JobFamily, job_id: impl Into<JobId>) -> Self {
        Self {
            family,
            job_id: job_id.into(),
        }
    }

    /// Path of the event endpoint relative to the stream base URL.
    pub fn path(&self) -> String {
        format!("{}/jobs/{}/events", self.family.path_segment(), self.job_id)
    }
}

/// One undecoded frame as delivered by a transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportFrame {
    /// Frame body (the JSON envelope for well-formed frames).
    pub payload: String,
    /// Transport-level event name (SSE `event:` line), if any.
    pub event_name: Option<String>,
    /// Transport-level event id (SSE `id:` line), if any.
    pub last_event_id: Option<String>,
}

impl TransportFrame {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }
}

/// Opens push channels for jobs.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Connect to the event stream of `target`, asking the server to
    /// replay events after `resume_from` when given.
    async fn connect(
        &self,
        target: &StreamTarget,
        resume_from: Option<EventSequence>,
    ) -> Result<FrameStream, StreamError>;
}

/// Errors raised by transports and the connection supervisor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Failed to establish the transport.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The stream endpoint answered with a non-2xx status.
    #[error("Event stream returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// A protocol-level error on an established session.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The reconnect policy gave up.
    #[error("Event stream lost after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_path_uses_family_segment() {
        let target = StreamTarget::new(JobFamily::SocialImport, "job-9");
        assert_eq!(target.path(), "social-import/jobs/job-9/events");

        let target = StreamTarget::new(JobFamily::Extraction, "x1");
        assert_eq!(target.path(), "extraction/jobs/x1/events");
    }

    #[test]
    fn exhausted_error_display() {
        let err = StreamError::ReconnectExhausted { attempts: 3 };
        assert_eq!(err.to_string(), "Event stream lost after 3 reconnect attempts");
    }
}
