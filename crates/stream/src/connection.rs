//! Single-subscription event-stream connection.
//!
//! [`EventStreamConnection`] owns at most one live subscription. Opening
//! a new one first disposes the previous one and waits for its task to
//! finish, so two subscriptions never deliver events at the same time.
//!
//! Each subscription runs as a spawned task: connect -> pump frames ->
//! on drop, consult the [`ReconnectPolicy`] -> sleep -> reconnect,
//! resuming from the highest sequence seen so far. Frames are decoded
//! and handed to the [`StreamHandler`] one at a time in arrival order.

use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use closet_core::types::EventSequence;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::messages::{decode_frame, StreamEvent};
use crate::reconnect::{ReconnectConfig, ReconnectDecision, ReconnectPolicy};
use crate::transport::{EventTransport, FrameStream, StreamError, StreamTarget};

/// Receives the decoded events of one subscription.
///
/// Calls are never concurrent: the next frame is not read until the
/// previous call returned.
#[async_trait]
pub trait StreamHandler: Send + 'static {
    /// Handle one event. Returning [`ControlFlow::Break`] ends the
    /// subscription without reconnecting (the job reached a terminal
    /// status).
    async fn on_event(&mut self, event: StreamEvent) -> ControlFlow<()>;

    /// The reconnect policy gave up. Called once per failure episode.
    async fn on_error(&mut self, error: StreamError);

    /// A dropped session was re-established. `resumed_from` is the
    /// sequence the server was asked to replay from; `None` means the
    /// gap could not be bridged and state should be re-fetched.
    ///
    /// Returning [`ControlFlow::Break`] closes the new session and ends
    /// the subscription, as for a terminal event.
    async fn on_reconnected(&mut self, resumed_from: Option<EventSequence>) -> ControlFlow<()> {
        let _ = resumed_from;
        ControlFlow::Continue(())
    }
}

/// Owner of the one live event subscription for a job tracker.
pub struct EventStreamConnection {
    transport: Arc<dyn EventTransport>,
    config: ReconnectConfig,
    connected: Arc<watch::Sender<bool>>,
    live: Option<Subscription>,
}

/// Bookkeeping for the live subscription task.
struct Subscription {
    target: StreamTarget,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

impl EventStreamConnection {
    pub fn new(transport: Arc<dyn EventTransport>, config: ReconnectConfig) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            transport,
            config,
            connected: Arc::new(connected),
            live: None,
        }
    }

    /// Open a subscription for `target`, disposing any previous one first.
    pub async fn open<H: StreamHandler>(
        &mut self,
        target: StreamTarget,
        resume_from: Option<EventSequence>,
        handler: H,
    ) {
        self.dispose().await;

        tracing::info!(
            family = %target.family,
            job_id = %target.job_id,
            resume_from,
            "Opening event stream",
        );

        let cancel = CancellationToken::new();
        let session = SubscriptionTask {
            transport: Arc::clone(&self.transport),
            target: target.clone(),
            resume_from,
            policy: ReconnectPolicy::new(self.config.clone()),
            connected: Arc::clone(&self.connected),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(session.run(handler));

        self.live = Some(Subscription {
            target,
            cancel,
            task,
        });
    }

    /// Cancel the live subscription (if any) and wait for its task to exit.
    pub async fn dispose(&mut self) {
        if let Some(mut sub) = self.live.take() {
            sub.cancel.cancel();
            sub.task.abort();
            let _ = (&mut sub.task).await;
            tracing::debug!(
                family = %sub.target.family,
                job_id = %sub.target.job_id,
                "Event stream disposed",
            );
        }
        self.connected.send_replace(false);
    }

    /// Whether a transport session is currently established.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observe the connected flag.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Whether a subscription task is still running (connected or
    /// waiting to reconnect).
    pub fn is_open(&self) -> bool {
        self.live.as_ref().is_some_and(|sub| !sub.task.is_finished())
    }

    /// Target of the current subscription, finished or not.
    pub fn target(&self) -> Option<&StreamTarget> {
        self.live.as_ref().map(|sub| &sub.target)
    }
}

/// Why a transport session ended.
enum SessionEnd {
    /// The subscription was disposed.
    Cancelled,
    /// The handler reported a terminal job event.
    Finished,
    /// The transport failed or the server closed the stream.
    Dropped(String),
}

/// State owned by a running subscription task.
struct SubscriptionTask {
    transport: Arc<dyn EventTransport>,
    target: StreamTarget,
    resume_from: Option<EventSequence>,
    policy: ReconnectPolicy,
    connected: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
}

impl SubscriptionTask {
    /// Core loop: connect -> pump -> reconnect, until cancelled,
    /// finished or exhausted.
    async fn run<H: StreamHandler>(mut self, mut handler: H) {
        let mut reconnecting = false;

        loop {
            let connect = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect(&self.target, self.resume_from) => result,
            };

            match connect {
                Ok(mut frames) => {
                    self.policy.record_success();
                    self.connected.send_replace(true);

                    if reconnecting {
                        tracing::info!(
                            job_id = %self.target.job_id,
                            resume_from = self.resume_from,
                            "Event stream reconnected",
                        );
                        if handler.on_reconnected(self.resume_from).await.is_break() {
                            tracing::info!(
                                job_id = %self.target.job_id,
                                "Job reached a terminal status, closing event stream",
                            );
                            break;
                        }
                    }

                    let end = self.pump(&mut frames, &mut handler).await;
                    self.connected.send_replace(false);

                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Finished => {
                            tracing::info!(
                                job_id = %self.target.job_id,
                                "Job reached a terminal status, closing event stream",
                            );
                            break;
                        }
                        SessionEnd::Dropped(reason) => {
                            tracing::warn!(
                                job_id = %self.target.job_id,
                                reason = %reason,
                                "Event stream dropped",
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.target.job_id,
                        error = %e,
                        "Event stream connection failed",
                    );
                }
            }

            match self.policy.record_failure() {
                ReconnectDecision::Retry { attempt, delay } => {
                    tracing::info!(
                        job_id = %self.target.job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling event stream reconnect",
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    reconnecting = true;
                }
                ReconnectDecision::Exhausted { attempts } => {
                    tracing::error!(
                        job_id = %self.target.job_id,
                        attempts,
                        "Event stream reconnect attempts exhausted",
                    );
                    handler
                        .on_error(StreamError::ReconnectExhausted { attempts })
                        .await;
                    break;
                }
            }
        }

        self.connected.send_replace(false);
    }

    /// Read frames until the session ends, dispatching each decoded event.
    ///
    /// Malformed frames are logged and dropped.
    async fn pump<H: StreamHandler>(
        &mut self,
        frames: &mut FrameStream,
        handler: &mut H,
    ) -> SessionEnd {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                next = frames.next() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("stream ended".into()),
            };

            let event = match decode_frame(&frame) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.target.job_id,
                        error = %e,
                        raw_frame = %frame.payload,
                        "Dropping malformed stream frame",
                    );
                    continue;
                }
            };

            if let Some(sequence) = event.sequence {
                self.resume_from = Some(self.resume_from.map_or(sequence, |s| s.max(sequence)));
            }

            tracing::trace!(
                job_id = %self.target.job_id,
                event_type = %event.event_type,
                sequence = event.sequence,
                "Stream event",
            );

            if handler.on_event(event).await.is_break() {
                return SessionEnd::Finished;
            }
        }
    }
}
