//! Push event-stream plumbing for backend jobs.
//!
//! Provides the frame envelope parser, the [`EventTransport`] seam with
//! server-sent-events and WebSocket implementations, the bounded
//! [`ReconnectPolicy`] and [`EventStreamConnection`], which owns the one
//! live subscription for a job.

pub mod connection;
pub mod messages;
pub mod reconnect;
pub mod sse;
pub mod transport;
pub mod ws;

pub use connection::{EventStreamConnection, StreamHandler};
pub use messages::StreamEvent;
pub use reconnect::{ReconnectConfig, ReconnectDecision, ReconnectPolicy};
pub use transport::{EventTransport, FrameStream, StreamError, StreamTarget, TransportFrame};
