//! Server-sent-events transport for job event streams.
//!
//! Thin wrapper over `reqwest` + `eventsource-stream`. Resume requests
//! send both the standard `Last-Event-ID` header and a `resume_from`
//! query parameter.

use std::time::Duration;

use async_trait::async_trait;
use closet_core::types::EventSequence;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::ACCEPT;

use crate::transport::{EventTransport, FrameStream, StreamError, StreamTarget, TransportFrame};

/// Connect timeout for the stream request. No total timeout is applied:
/// streams stay open for the lifetime of the job.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SSE event name used when the server sends no `event:` line.
const DEFAULT_SSE_EVENT: &str = "message";

/// Server-sent-events transport.
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl SseTransport {
    /// * `base_url` - HTTP base URL, e.g. `http://host:8000/api`.
    pub fn new(base_url: String) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| StreamError::Connection(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing client. It must not carry a total request
    /// timeout, or long-lived streams will be cut.
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    fn stream_url(&self, target: &StreamTarget) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), target.path())
    }
}

fn frame_from_sse(event: eventsource_stream::Event) -> TransportFrame {
    let event_name = (!event.event.is_empty() && event.event != DEFAULT_SSE_EVENT)
        .then_some(event.event);
    let last_event_id = (!event.id.is_empty()).then_some(event.id);
    TransportFrame {
        payload: event.data,
        event_name,
        last_event_id,
    }
}

#[async_trait]
impl EventTransport for SseTransport {
    async fn connect(
        &self,
        target: &StreamTarget,
        resume_from: Option<EventSequence>,
    ) -> Result<FrameStream, StreamError> {
        let url = self.stream_url(target);

        let mut request = self.client.get(&url).header(ACCEPT, "text/event-stream");
        if let Some(sequence) = resume_from {
            request = request
                .query(&[("resume_from", sequence)])
                .header("Last-Event-ID", sequence.to_string());
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            StreamError::Connection(format!("Failed to open event stream at {url}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Http {
                status: status.as_u16(),
                url,
            });
        }

        tracing::info!(
            family = %target.family,
            job_id = %target.job_id,
            resume_from,
            "SSE event stream connected",
        );

        let frames = response.bytes_stream().eventsource().map(|item| match item {
            Ok(event) => Ok(frame_from_sse(event)),
            Err(e) => Err(StreamError::Protocol(e.to_string())),
        });

        Ok(Box::pin(frames))
    }
}
