//! WebSocket transport for job event streams.
//!
//! [`WsTransport`] holds the WebSocket base URL of the job engine. Each
//! [`connect`](EventTransport::connect) opens a fresh socket for one job
//! and maps its text frames to [`TransportFrame`]s.

use async_trait::async_trait;
use closet_core::types::EventSequence;
use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::transport::{EventTransport, FrameStream, StreamError, StreamTarget, TransportFrame};

/// WebSocket event transport.
pub struct WsTransport {
    ws_url: String,
    bearer_token: Option<String>,
}

impl WsTransport {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8000/api`.
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url,
            bearer_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` during the handshake.
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    /// Full URL for a job stream, with the resume marker as a query
    /// parameter.
    pub fn stream_url(&self, target: &StreamTarget, resume_from: Option<EventSequence>) -> String {
        let mut url = format!("{}/{}", self.ws_url.trim_end_matches('/'), target.path());
        if let Some(sequence) = resume_from {
            url.push_str(&format!("?resume_from={sequence}"));
        }
        url
    }
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn connect(
        &self,
        target: &StreamTarget,
        resume_from: Option<EventSequence>,
    ) -> Result<FrameStream, StreamError> {
        let url = self.stream_url(target, resume_from);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::Connection(format!("Invalid stream URL {url}: {e}")))?;
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StreamError::Connection(format!("Invalid bearer token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| {
            StreamError::Connection(format!("Failed to connect to event stream at {url}: {e}"))
        })?;

        tracing::info!(
            family = %target.family,
            job_id = %target.job_id,
            resume_from,
            "WebSocket event stream connected",
        );

        let frames = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(TransportFrame::text(text))),
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Event stream WebSocket closed");
                    None
                }
                // Binary / ping / pong / raw frames carry no events.
                Ok(_) => None,
                Err(e) => Some(Err(StreamError::Protocol(e.to_string()))),
            }
        });

        Ok(Box::pin(frames))
    }
}

#[cfg(test)]
mod tests {
    use closet_core::job::JobFamily;

    use super::*;

    #[test]
    fn stream_url_without_resume() {
        let transport = WsTransport::new("ws://localhost:8000/api/".into());
        let target = StreamTarget::new(JobFamily::Extraction, "j1");
        assert_eq!(
            transport.stream_url(&target, None),
            "ws://localhost:8000/api/extraction/jobs/j1/events"
        );
    }

    #[test]
    fn stream_url_with_resume() {
        let transport = WsTransport::new("wss://closet.example/api".into());
        let target = StreamTarget::new(JobFamily::SocialImport, "j2");
        assert_eq!(
            transport.stream_url(&target, Some(12)),
            "wss://closet.example/api/social-import/jobs/j2/events?resume_from=12"
        );
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let transport = WsTransport::new("ws://127.0.0.1:9".into());
        let target = StreamTarget::new(JobFamily::Extraction, "j1");
        let result = transport.connect(&target, None).await;
        assert!(matches!(result, Err(StreamError::Connection(_))));
    }
}
