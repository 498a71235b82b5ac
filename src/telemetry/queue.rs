//! # Event Queue
//!
//! Bounded FIFO hand-off between producers and the sink, built on a tokio
//! `mpsc` channel. Producers hold cloned [`EventSender`]s; the sink owns the
//! single [`EventReceiver`].
//!
//! ## Overflow policy
//!
//! When the queue is at capacity the sender follows its [`OverflowPolicy`]:
//!
//! - [`OverflowPolicy::FailFast`]: reject immediately.
//! - [`OverflowPolicy::Block`]: wait up to the timeout for a free slot, then reject.
//!
//! Every rejection is returned as [`QueueError::Full`] with the event handed
//! back, and counted once in [`Diagnostics`]. Nothing is dropped silently.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TryRecvError, TrySendError};

use super::diagnostics::Diagnostics;
use super::event::TelemetryEvent;

/// Reference queue capacity
pub const DEFAULT_CAPACITY: usize = 4096;

/// Behavior of `enqueue` when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject at once
    FailFast,
    /// Wait for a free slot, at most `timeout`
    Block { timeout: Duration },
}

/// Delivery failure, distinct from a sensor fault
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue stayed full; the event was not delivered
    #[error("Event queue full, {} event not delivered", .0.source())]
    Full(TelemetryEvent),

    /// The sink is gone
    #[error("Event queue closed, {} event not delivered", .0.source())]
    Closed(TelemetryEvent),
}

/// Create a bounded queue
///
/// # Arguments
///
/// * `capacity` - Maximum number of queued events (at least 1)
/// * `policy` - What `enqueue` does when the queue is full
/// * `diagnostics` - Shared counters; overflow and delivery are recorded here
///
/// # Panics
///
/// Panics if `capacity` is zero. `Config::load` rejects that value.
pub fn event_queue(
    capacity: usize,
    policy: OverflowPolicy,
    diagnostics: Arc<Diagnostics>,
) -> (EventSender, EventReceiver) {
    assert!(capacity > 0, "event queue capacity must be at least 1");
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventSender { tx, policy, diagnostics },
        EventReceiver { rx, closed: false },
    )
}

/// Producer handle; cheap to clone, one per producer task
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<TelemetryEvent>,
    policy: OverflowPolicy,
    diagnostics: Arc<Diagnostics>,
}

impl EventSender {
    /// Enqueue one event under the configured overflow policy
    ///
    /// # Errors
    ///
    /// * `QueueError::Full` - no slot became free in time (counted in diagnostics)
    /// * `QueueError::Closed` - the receiver has been dropped
    pub async fn enqueue(&self, event: TelemetryEvent) -> Result<(), QueueError> {
        let source = event.source();
        let result = match self.policy {
            OverflowPolicy::FailFast => self.tx.try_send(event).map_err(|e| match e {
                TrySendError::Full(event) => QueueError::Full(event),
                TrySendError::Closed(event) => QueueError::Closed(event),
            }),
            OverflowPolicy::Block { timeout } => {
                self.tx.send_timeout(event, timeout).await.map_err(|e| match e {
                    SendTimeoutError::Timeout(event) => QueueError::Full(event),
                    SendTimeoutError::Closed(event) => QueueError::Closed(event),
                })
            }
        };

        match &result {
            Ok(()) => self.diagnostics.record_enqueued(source),
            Err(QueueError::Full(_)) => self.diagnostics.record_queue_full(source),
            Err(QueueError::Closed(_)) => {}
        }
        result
    }

    /// What `enqueue` does when the queue is full
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Maximum number of events held at once
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Sink handle; the only consumer
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<TelemetryEvent>,
    closed: bool,
}

impl EventReceiver {
    /// Take everything currently queued without waiting (possibly nothing)
    pub fn drain_all(&mut self) -> Vec<TelemetryEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        events
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Returns `None` on timeout, or once every sender is gone and the queue
    /// is empty (see [`EventReceiver::is_closed`]).
    pub async fn dequeue_timeout(&mut self, timeout: Duration) -> Option<TelemetryEvent> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Some(event),
            Ok(None) => {
                self.closed = true;
                None
            }
            Err(_elapsed) => None,
        }
    }

    /// True once every sender has been dropped and the queue ran dry
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
