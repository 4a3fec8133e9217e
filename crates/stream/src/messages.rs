//! Job event-stream frame envelope and parser.
//!
//! The job engine pushes frames shaped `{"type": "<kind>", "data": {...},
//! "id": <sequence>}`. This module decodes them into a family-agnostic
//! [`StreamEvent`]; each job family then interprets `event_type` and
//! `data` with its own typed enum.

use closet_core::types::EventSequence;
use serde::{Deserialize, Deserializer, Serialize};

use crate::transport::TransportFrame;

/// Initial handshake marker sent once per transport session.
pub const EVENT_CONNECTED: &str = "connected";

/// Periodic keep-alive marker; never changes job state.
pub const EVENT_HEARTBEAT: &str = "heartbeat";

/// One decoded frame of a job event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event discriminator (e.g. `image_extraction_complete`).
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event-specific payload; `null` when the frame carried none.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Sequence marker used to resume after a reconnect.
    #[serde(
        default,
        rename = "id",
        deserialize_with = "deserialize_sequence",
        skip_serializing_if = "Option::is_none"
    )]
    pub sequence: Option<EventSequence>,
}

impl StreamEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: EventSequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// `connected` / `heartbeat` markers carry no job state.
    pub fn is_control(&self) -> bool {
        self.event_type == EVENT_CONNECTED || self.event_type == EVENT_HEARTBEAT
    }
}

/// Sequence ids arrive as numbers over WebSocket and as strings over SSE.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSequence {
    Number(u64),
    Text(String),
}

fn deserialize_sequence<'de, D>(deserializer: D) -> Result<Option<EventSequence>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<RawSequence> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| match raw {
        RawSequence::Number(n) => Some(n),
        RawSequence::Text(text) => parse_sequence(&text),
    }))
}

/// Parse a textual sequence marker (an SSE `id:` line, for instance).
pub fn parse_sequence(text: &str) -> Option<EventSequence> {
    text.trim().parse().ok()
}

/// Parse a JSON envelope `{type, data, id?}`.
///
/// Returns `Err` for malformed JSON or a missing `type`. Callers should
/// log and drop such frames.
pub fn parse_event(text: &str) -> Result<StreamEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Decode a raw transport frame into a [`StreamEvent`].
///
/// The JSON envelope is preferred. When the payload is JSON without a
/// `type` and the transport supplied an event name (SSE `event:` line),
/// the name becomes the type and the whole payload becomes `data`. A
/// transport-level id fills in a missing envelope sequence.
pub fn decode_frame(frame: &TransportFrame) -> Result<StreamEvent, serde_json::Error> {
    let transport_sequence = frame.last_event_id.as_deref().and_then(parse_sequence);

    let mut event = match (parse_event(&frame.payload), &frame.event_name) {
        (Ok(event), _) => event,
        (Err(_), Some(name)) => {
            let data: serde_json::Value = serde_json::from_str(&frame.payload)?;
            StreamEvent::new(name.clone(), data)
        }
        (Err(e), None) => return Err(e),
    };

    if event.sequence.is_none() {
        event.sequence = transport_sequence;
    }
    Ok(event)
}
