//! # GPS Module
//!
//! Samples the current fix from a [`GpsSource`] at a fixed interval and hands
//! one `Gps` event per successful sample to the queue.
//!
//! A failed sample (no fix yet, garbled stream) is reported to diagnostics and
//! the loop carries on; only a failure to connect ends the producer.

pub mod nmea;

pub use nmea::{NmeaReader, SerialGps};

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::Result;
use crate::supervisor::ProducerContext;
use crate::telemetry::event::GpsFix;
use crate::telemetry::{Reading, Source, TelemetryEvent};

/// Interval between fix samples
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A receiver that can be asked for its current fix
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GpsSource: Send {
    /// Attach to the receiver
    async fn connect(&mut self) -> Result<()>;

    /// Latest fix
    ///
    /// # Errors
    ///
    /// `NoFix` while the receiver has no 2D/3D solution, `Gps` when the
    /// stream could not be read.
    async fn current_fix(&mut self) -> Result<GpsFix>;
}

/// Samples a GPS source at a fixed interval
pub struct GpsProducer<S> {
    source: S,
    poll_interval: Duration,
}

impl<S: GpsSource> GpsProducer<S> {
    /// # Arguments
    ///
    /// * `source` - Receiver to connect to and sample
    /// * `poll_interval` - Time between two samples (default 100 ms)
    pub fn new(source: S, poll_interval: Duration) -> Self {
        Self { source, poll_interval }
    }

    /// Sample until stop is requested
    ///
    /// # Errors
    ///
    /// Returns the connect error, or `QueueClosed` if the sink went away.
    pub async fn run(mut self, mut ctx: ProducerContext) -> Result<()> {
        self.source.connect().await?;
        info!("Sampling GPS every {:?}", self.poll_interval);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.stop_requested() => break,
                _ = ticker.tick() => {}
            }

            // A sample may spend its read budget; stop still wins
            let sample = tokio::select! {
                _ = ctx.stop_requested() => break,
                sample = self.source.current_fix() => sample,
            };

            match sample {
                Ok(fix) => ctx.deliver(TelemetryEvent::now(Reading::Gps(fix))).await?,
                Err(e) => ctx.fault(Source::Gps, &e),
            }
        }

        debug!("GPS producer stopped");
        Ok(())
    }
}
