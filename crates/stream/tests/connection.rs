//! Integration tests for `EventStreamConnection`.
//!
//! A scripted in-process transport stands in for the job engine so the
//! tests can drive connect failures, dropped sessions and malformed
//! frames deterministically. Time is paused, so reconnect sleeps
//! complete instantly.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use closet_core::job::JobFamily;
use closet_core::types::EventSequence;
use closet_stream::{
    EventStreamConnection, EventTransport, FrameStream, ReconnectConfig, StreamError,
    StreamEvent, StreamHandler, StreamTarget, TransportFrame,
};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Behaviour of one scripted transport session.
enum Session {
    /// `connect` fails.
    Fail,
    /// Deliver the frames, then end the stream (a dropped session).
    Frames(Vec<&'static str>),
    /// Deliver the frames, then stay open forever.
    Hold(Vec<&'static str>),
}

#[derive(Default)]
struct ScriptedTransport {
    sessions: Mutex<VecDeque<Session>>,
    connects: Mutex<Vec<Option<EventSequence>>>,
}

impl ScriptedTransport {
    fn new(sessions: Vec<Session>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            connects: Mutex::default(),
        })
    }

    fn connects(&self) -> Vec<Option<EventSequence>> {
        self.connects.lock().unwrap().clone()
    }
}

fn frames(payloads: Vec<&'static str>) -> impl futures::Stream<Item = Result<TransportFrame, StreamError>> {
    stream::iter(payloads.into_iter().map(|p| Ok(TransportFrame::text(p))))
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn connect(
        &self,
        _target: &StreamTarget,
        resume_from: Option<EventSequence>,
    ) -> Result<FrameStream, StreamError> {
        self.connects.lock().unwrap().push(resume_from);
        let session = self.sessions.lock().unwrap().pop_front().unwrap_or(Session::Fail);
        match session {
            Session::Fail => Err(StreamError::Connection("connection refused".into())),
            Session::Frames(payloads) => Ok(Box::pin(frames(payloads))),
            Session::Hold(payloads) => Ok(Box::pin(frames(payloads).chain(stream::pending()))),
        }
    }
}

#[derive(Debug)]
enum Signal {
    Event(StreamEvent),
    Error(StreamError),
    Reconnected(Option<EventSequence>),
}

struct RecordingHandler {
    tx: mpsc::UnboundedSender<Signal>,
    /// Report a terminal job from `on_reconnected`.
    finish_on_reconnect: bool,
}

#[async_trait]
impl StreamHandler for RecordingHandler {
    async fn on_event(&mut self, event: StreamEvent) -> ControlFlow<()> {
        let terminal = event.event_type == "job_complete";
        let _ = self.tx.send(Signal::Event(event));
        if terminal {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    async fn on_error(&mut self, error: StreamError) {
        let _ = self.tx.send(Signal::Error(error));
    }

    async fn on_reconnected(&mut self, resumed_from: Option<EventSequence>) -> ControlFlow<()> {
        let _ = self.tx.send(Signal::Reconnected(resumed_from));
        if self.finish_on_reconnect {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

fn recorder() -> (RecordingHandler, mpsc::UnboundedReceiver<Signal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        RecordingHandler {
            tx,
            finish_on_reconnect: false,
        },
        rx,
    )
}

fn target() -> StreamTarget {
    StreamTarget::new(JobFamily::Extraction, "job-1")
}

fn connection(transport: Arc<ScriptedTransport>) -> EventStreamConnection {
    EventStreamConnection::new(transport, ReconnectConfig::default())
}

async fn next_event_type(rx: &mut mpsc::UnboundedReceiver<Signal>) -> String {
    match rx.recv().await {
        Some(Signal::Event(event)) => event.event_type,
        other => panic!("Expected an event, got {other:?}"),
    }
}

async fn wait_until_closed(conn: &EventStreamConnection) {
    while conn.is_open() {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Test: 4 consecutive failures -> 3 reconnects, then one terminal error
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn four_consecutive_failures_schedule_three_reconnects() {
    let transport = ScriptedTransport::new(vec![]);
    let mut conn = connection(Arc::clone(&transport));
    let (handler, mut rx) = recorder();

    conn.open(target(), None, handler).await;

    assert_matches!(
        rx.recv().await,
        Some(Signal::Error(StreamError::ReconnectExhausted { attempts: 3 }))
    );
    wait_until_closed(&conn).await;

    // Initial connect + 3 reconnects, and the error fired exactly once.
    assert_eq!(transport.connects().len(), 4);
    assert!(!conn.is_connected());
    assert!(rx.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: events are delivered in order, malformed frames are dropped
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_in_order() {
    let transport = ScriptedTransport::new(vec![Session::Hold(vec![
        r#"{"type":"connected"}"#,
        "definitely not json",
        r#"{"type":"extraction_started","data":{"total_images":3},"id":1}"#,
        r#"{"data":{"missing":"type"}}"#,
        r#"{"type":"heartbeat","id":2}"#,
    ])]);
    let mut conn = connection(transport);
    let (handler, mut rx) = recorder();

    conn.open(target(), None, handler).await;

    assert_eq!(next_event_type(&mut rx).await, "connected");
    assert_eq!(next_event_type(&mut rx).await, "extraction_started");
    assert_eq!(next_event_type(&mut rx).await, "heartbeat");
    assert!(conn.is_connected());

    conn.dispose().await;
}

// ---------------------------------------------------------------------------
// Test: a terminal event ends the subscription without reconnecting
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn terminal_event_stops_without_reconnect() {
    let transport = ScriptedTransport::new(vec![
        Session::Frames(vec![
            r#"{"type":"connected"}"#,
            r#"{"type":"job_complete","data":{},"id":9}"#,
        ]),
        Session::Hold(vec![]),
    ]);
    let mut conn = connection(Arc::clone(&transport));
    let (handler, mut rx) = recorder();

    conn.open(target(), None, handler).await;

    assert_eq!(next_event_type(&mut rx).await, "connected");
    assert_eq!(next_event_type(&mut rx).await, "job_complete");
    wait_until_closed(&conn).await;

    assert_eq!(transport.connects().len(), 1);
    assert!(!conn.is_connected());
}

// ---------------------------------------------------------------------------
// Test: a dropped session reconnects from the last sequence seen
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dropped_session_resumes_from_last_sequence() {
    let transport = ScriptedTransport::new(vec![
        Session::Frames(vec![
            r#"{"type":"extraction_started","data":{},"id":4}"#,
            r#"{"type":"heartbeat","id":5}"#,
        ]),
        Session::Hold(vec![]),
    ]);
    let mut conn = connection(Arc::clone(&transport));
    let (handler, mut rx) = recorder();

    conn.open(target(), Some(3), handler).await;

    assert_eq!(next_event_type(&mut rx).await, "extraction_started");
    assert_eq!(next_event_type(&mut rx).await, "heartbeat");
    assert_matches!(rx.recv().await, Some(Signal::Reconnected(Some(5))));

    assert_eq!(transport.connects(), vec![Some(3), Some(5)]);
    assert!(conn.is_connected());

    conn.dispose().await;
}

// ---------------------------------------------------------------------------
// Test: a handler that finds the job finished after a reconnect ends it
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn break_on_reconnect_closes_subscription() {
    let transport = ScriptedTransport::new(vec![
        Session::Frames(vec![r#"{"type":"connected"}"#]),
        Session::Hold(vec![r#"{"type":"never_delivered"}"#]),
        Session::Hold(vec![]),
    ]);
    let mut conn = connection(Arc::clone(&transport));
    let (mut handler, mut rx) = recorder();
    handler.finish_on_reconnect = true;

    conn.open(target(), None, handler).await;

    assert_eq!(next_event_type(&mut rx).await, "connected");
    assert_matches!(rx.recv().await, Some(Signal::Reconnected(None)));
    wait_until_closed(&conn).await;

    // Handler dropped with the task: nothing else was delivered.
    assert!(rx.recv().await.is_none());
    assert_eq!(transport.connects(), vec![None, None]);
    assert!(!conn.is_connected());
}

// ---------------------------------------------------------------------------
// Test: a successful reconnect restores the full reconnect budget
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_attempts() {
    let transport = ScriptedTransport::new(vec![
        Session::Frames(vec![r#"{"type":"a","id":1}"#]),
        Session::Fail,
        Session::Fail,
        Session::Frames(vec![r#"{"type":"b","id":2}"#]),
    ]);
    let mut conn = connection(Arc::clone(&transport));
    let (handler, mut rx) = recorder();

    conn.open(target(), None, handler).await;

    assert_eq!(next_event_type(&mut rx).await, "a");
    assert_matches!(rx.recv().await, Some(Signal::Reconnected(Some(1))));
    assert_eq!(next_event_type(&mut rx).await, "b");
    assert_matches!(
        rx.recv().await,
        Some(Signal::Error(StreamError::ReconnectExhausted { attempts: 3 }))
    );

    // 1 + 3 (two failures, then success) + 3 failed reconnects.
    assert_eq!(transport.connects().len(), 7);
}

// ---------------------------------------------------------------------------
// Test: opening again disposes the previous subscription first
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn open_disposes_previous_subscription() {
    let transport = ScriptedTransport::new(vec![
        Session::Hold(vec![r#"{"type":"connected"}"#]),
        Session::Hold(vec![r#"{"type":"connected"}"#]),
    ]);
    let mut conn = connection(Arc::clone(&transport));

    let (first, mut first_rx) = recorder();
    conn.open(target(), None, first).await;
    assert_eq!(next_event_type(&mut first_rx).await, "connected");

    let (second, mut second_rx) = recorder();
    conn.open(StreamTarget::new(JobFamily::Extraction, "job-2"), None, second)
        .await;

    // The first handler was dropped with its task.
    assert!(first_rx.recv().await.is_none());
    assert_eq!(next_event_type(&mut second_rx).await, "connected");
    assert_eq!(conn.target().map(|t| t.job_id.as_str()), Some("job-2"));
    assert_eq!(transport.connects().len(), 2);

    conn.dispose().await;
}

// ---------------------------------------------------------------------------
// Test: dispose clears the connected flag and stops the task
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispose_clears_connected_flag() {
    let transport = ScriptedTransport::new(vec![Session::Hold(vec![r#"{"type":"connected"}"#])]);
    let mut conn = connection(transport);
    let mut connected = conn.watch_connected();
    let (handler, mut rx) = recorder();

    conn.open(target(), None, handler).await;
    assert_eq!(next_event_type(&mut rx).await, "connected");
    assert!(*connected.borrow_and_update());

    conn.dispose().await;

    assert!(!conn.is_connected());
    assert!(!conn.is_open());
    assert!(!*connected.borrow_and_update());
    assert!(rx.recv().await.is_none());
}

// ---------------------------------------------------------------------------
// Test: dispose with nothing open is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispose_without_subscription_is_noop() {
    let mut conn = connection(ScriptedTransport::new(vec![]));
    conn.dispose().await;
    assert!(!conn.is_open());
    assert!(conn.target().is_none());
}
