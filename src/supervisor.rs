//! # Supervisor
//!
//! Owns the event queue, the shutdown signals and one task per producer plus
//! the sink.
//!
//! Producers are isolated: each runs in its own task, and a producer that
//! fails at startup (or later, fatally) only ends its own task.
//!
//! ## Shutdown
//!
//! 1. Producers are told to stop and awaited; each releases its device.
//! 2. The sink is told to stop; it writes whatever is still queued and exits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{RecorderError, Result};
use crate::gps::{GpsProducer, GpsSource};
use crate::inertial::InertialProducer;
use crate::telemetry::{
    event_queue, Diagnostics, EventReceiver, EventSender, OverflowPolicy, QueueError, Source,
    TelemetryEvent,
};
use crate::telemetry::sink::Sink;
use crate::video::{VideoEncoder, VideoProducer};

/// What a producer task gets from the supervisor
pub struct ProducerContext {
    queue: EventSender,
    diagnostics: Arc<Diagnostics>,
    stop: watch::Receiver<bool>,
}

impl ProducerContext {
    /// # Arguments
    ///
    /// * `queue` - Sender half shared by every producer
    /// * `diagnostics` - Counters for sensor faults
    /// * `stop` - Producer stop signal, `true` once shutdown begins
    pub fn new(queue: EventSender, diagnostics: Arc<Diagnostics>, stop: watch::Receiver<bool>) -> Self {
        Self { queue, diagnostics, stop }
    }

    /// Hand an event to the sink
    ///
    /// A full queue is already counted by the queue itself; the sample is
    /// lost and the producer carries on.
    ///
    /// # Errors
    ///
    /// Returns `QueueClosed` once the sink is gone; the producer should exit.
    pub async fn deliver(&self, event: TelemetryEvent) -> Result<()> {
        match self.queue.enqueue(event).await {
            Ok(()) => Ok(()),
            Err(QueueError::Full(event)) => {
                debug!("Dropped {} event at {}", event.source(), event.captured_at());
                Ok(())
            }
            Err(QueueError::Closed(_)) => Err(RecorderError::QueueClosed),
        }
    }

    /// Report a sample that could not be taken
    pub fn fault(&self, source: Source, error: &RecorderError) {
        self.diagnostics.record_sensor_fault(source, error);
    }

    /// Resolves when stop is requested (or the supervisor is gone)
    ///
    /// Cancel-safe; meant for `tokio::select!`.
    pub async fn stop_requested(&mut self) {
        // wait_for returns Err only when the sender is dropped, which also means stop
        let _ = self.stop.wait_for(|stopped| *stopped).await;
    }
}

/// Queue settings for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub capacity: usize,
    pub policy: OverflowPolicy,
    pub sink_idle_timeout: Duration,
}

struct Unit {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Session owner: queue, shutdown signals, task handles
pub struct Supervisor {
    queue: EventSender,
    receiver: Option<EventReceiver>,
    settings: QueueSettings,
    diagnostics: Arc<Diagnostics>,
    producer_stop: watch::Sender<bool>,
    sink_stop: watch::Sender<bool>,
    producers: Vec<Unit>,
    sink: Option<Unit>,
}

impl Supervisor {
    /// Create the queue and both stop signals; no task is started yet
    ///
    /// # Arguments
    ///
    /// * `settings` - Queue capacity, overflow policy and sink idle timeout
    /// * `diagnostics` - Counters shared with every unit
    pub fn new(settings: QueueSettings, diagnostics: Arc<Diagnostics>) -> Self {
        let (queue, receiver) = event_queue(settings.capacity, settings.policy, diagnostics.clone());
        info!("Event queue: capacity {}, overflow {:?}", queue.capacity(), queue.policy());
        let (producer_stop, _) = watch::channel(false);
        let (sink_stop, _) = watch::channel(false);

        Self {
            queue,
            receiver: Some(receiver),
            settings,
            diagnostics,
            producer_stop,
            sink_stop,
            producers: Vec::new(),
            sink: None,
        }
    }

    /// Start the sink; only the first call has an effect
    pub fn spawn_sink<W>(&mut self, sink: Sink<W>)
    where
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let Some(receiver) = self.receiver.take() else {
            warn!("Telemetry sink already running");
            return;
        };
        let stop = self.sink_stop.subscribe();
        let sink = sink.with_idle_timeout(self.settings.sink_idle_timeout);

        let handle = tokio::spawn(async move {
            sink.run(receiver, stop).await;
        });
        self.sink = Some(Unit { name: "sink", handle });
    }

    /// Start the video producer in its own task
    pub fn spawn_video<E: VideoEncoder + 'static>(&mut self, producer: VideoProducer<E>) {
        self.spawn_producer("video", |ctx| producer.run(ctx));
    }

    /// Start the GPS producer in its own task
    pub fn spawn_gps<S: GpsSource + 'static>(&mut self, producer: GpsProducer<S>) {
        self.spawn_producer("gps", |ctx| producer.run(ctx));
    }

    /// Start the inertial producer in its own task
    pub fn spawn_inertial(&mut self, producer: InertialProducer) {
        self.spawn_producer("inertial", |ctx| producer.run(ctx));
    }

    fn spawn_producer<F, Fut>(&mut self, name: &'static str, run: F)
    where
        F: FnOnce(ProducerContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let ctx = ProducerContext::new(
            self.queue.clone(),
            self.diagnostics.clone(),
            self.producer_stop.subscribe(),
        );
        let task = run(ctx);

        // The wrapper logs the outcome; nothing is propagated to other units
        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!("{} producer exited", name),
                // Startup and fatal faults end this producer only
                Err(e) => error!("{} producer stopped: {}", name, e),
            }
        });
        info!("Started {} producer", name);
        self.producers.push(Unit { name, handle });
    }

    /// Names of units whose task has already ended
    pub fn finished_units(&self) -> Vec<&'static str> {
        self.producers
            .iter()
            .chain(self.sink.iter())
            .filter(|unit| unit.handle.is_finished())
            .map(|unit| unit.name)
            .collect()
    }

    /// Stop every unit and wait for it to release its resources
    pub async fn shutdown(self) {
        info!("Stopping {} producer(s)", self.producers.len());
        let _ = self.producer_stop.send(true);
        for unit in self.producers {
            if let Err(e) = unit.handle.await {
                error!("{} task panicked: {}", unit.name, e);
            }
        }

        // Producers are done; the sink drains what they left behind
        drop(self.queue);
        let _ = self.sink_stop.send(true);
        if let Some(unit) = self.sink {
            if let Err(e) = unit.handle.await {
                error!("{} task panicked: {}", unit.name, e);
            }
        }
        info!("Session stopped");
    }
}
