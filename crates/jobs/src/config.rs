use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use closet_core::retry::RetryConfig;
use closet_stream::sse::SseTransport;
use closet_stream::ws::WsTransport;
use closet_stream::{EventTransport, ReconnectConfig, StreamError};

use crate::api::{ApiError, JobApiClient};
use crate::pointer::FileJobPointerStore;
use crate::tracker::TrackerConfig;

/// Which push transport to use for job event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTransportKind {
    Sse,
    WebSocket,
}

impl FromStr for StreamTransportKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sse" => Ok(Self::Sse),
            "ws" | "websocket" => Ok(Self::WebSocket),
            _ => Err(()),
        }
    }
}

/// Errors raised while loading [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Job client configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the job REST API.
    pub api_url: String,
    /// Bearer token sent with every request, if any.
    pub api_token: Option<String>,
    /// Push transport for event streams.
    pub stream_transport: StreamTransportKind,
    /// Base URL of the event streams (`http(s)` for SSE, `ws(s)` for WebSocket).
    pub stream_url: String,
    /// Event-stream reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Per-request timeout for REST calls.
    pub request_timeout: Duration,
    /// Retry policy for command calls.
    pub retry: RetryConfig,
    /// Directory of the persisted job pointers.
    pub pointer_dir: PathBuf,
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                       |
    /// |---------------------------------|-------------------------------|
    /// | `CLOSET_API_URL`                | `http://localhost:8000/api`   |
    /// | `CLOSET_API_TOKEN`              | unset                         |
    /// | `CLOSET_STREAM_TRANSPORT`       | `sse` (`sse` or `ws`)         |
    /// | `CLOSET_STREAM_URL`             | derived from the API URL      |
    /// | `CLOSET_RECONNECT_BASE_MS`      | `1000`                        |
    /// | `CLOSET_RECONNECT_MAX_ATTEMPTS` | `3`                           |
    /// | `CLOSET_REQUEST_TIMEOUT_SECS`   | `30`                          |
    /// | `CLOSET_RETRY_MAX_RETRIES`      | `3`                           |
    /// | `CLOSET_POINTER_DIR`            | `.closet/jobs`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("CLOSET_API_URL").unwrap_or_else(|| "http://localhost:8000/api".into());
        let api_token = lookup("CLOSET_API_TOKEN").filter(|t| !t.trim().is_empty());

        let stream_transport = match lookup("CLOSET_STREAM_TRANSPORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "CLOSET_STREAM_TRANSPORT",
                value,
            })?,
            None => StreamTransportKind::Sse,
        };

        let stream_url = lookup("CLOSET_STREAM_URL")
            .unwrap_or_else(|| derive_stream_url(&api_url, stream_transport));

        let base_ms: u64 = parse_var(&lookup, "CLOSET_RECONNECT_BASE_MS", 1000)?;
        let max_attempts: u32 = parse_var(&lookup, "CLOSET_RECONNECT_MAX_ATTEMPTS", 3)?;
        let timeout_secs: u64 = parse_var(&lookup, "CLOSET_REQUEST_TIMEOUT_SECS", 30)?;
        let max_retries: u32 = parse_var(&lookup, "CLOSET_RETRY_MAX_RETRIES", 3)?;

        let pointer_dir = lookup("CLOSET_POINTER_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".closet/jobs"));

        Ok(Self {
            api_url,
            api_token,
            stream_transport,
            stream_url,
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(base_ms),
                max_attempts,
            },
            request_timeout: Duration::from_secs(timeout_secs),
            retry: RetryConfig {
                max_retries,
                ..Default::default()
            },
            pointer_dir,
        })
    }

    /// Orchestrator settings derived from this configuration.
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            reconnect: self.reconnect.clone(),
            retry: self.retry.clone(),
            ..Default::default()
        }
    }

    pub fn build_api(&self) -> Result<JobApiClient, ApiError> {
        Ok(JobApiClient::new(self.api_url.clone(), self.request_timeout)?
            .with_bearer_token(self.api_token.clone()))
    }

    pub fn build_transport(&self) -> Result<Arc<dyn EventTransport>, StreamError> {
        let token = self.api_token.clone();
        Ok(match self.stream_transport {
            StreamTransportKind::Sse => {
                Arc::new(SseTransport::new(self.stream_url.clone())?.with_bearer_token(token))
            }
            StreamTransportKind::WebSocket => {
                Arc::new(WsTransport::new(self.stream_url.clone()).with_bearer_token(token))
            }
        })
    }

    pub fn build_pointer_store(&self) -> FileJobPointerStore {
        FileJobPointerStore::new(self.pointer_dir.clone())
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

/// WebSocket streams live on the API host with a `ws(s)` scheme.
fn derive_stream_url(api_url: &str, transport: StreamTransportKind) -> String {
    match transport {
        StreamTransportKind::Sse => api_url.to_string(),
        StreamTransportKind::WebSocket => {
            if let Some(rest) = api_url.strip_prefix("https://") {
                format!("wss://{rest}")
            } else if let Some(rest) = api_url.strip_prefix("http://") {
                format!("ws://{rest}")
            } else {
                api_url.to_string()
            }
        }
    }
}
