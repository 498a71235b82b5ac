//! # Diagnostics
//!
//! Counters for everything that goes wrong (or right) in the pipeline, kept
//! apart from the telemetry log. Every `record_*` call also emits a `tracing`
//! event, which the binary routes to the diagnostics file.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::event::Source;

/// Shared pipeline counters
#[derive(Debug, Default)]
pub struct Diagnostics {
    enqueued: [AtomicU64; Source::COUNT],
    sensor_faults: [AtomicU64; Source::COUNT],
    queue_full: [AtomicU64; Source::COUNT],
    write_faults: AtomicU64,
    records_written: AtomicU64,
}

/// Point-in-time copy of one source's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceCounters {
    pub source: Source,
    pub enqueued: u64,
    pub sensor_faults: u64,
    pub queue_full: u64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub sources: Vec<SourceCounters>,
    pub write_faults: u64,
    pub records_written: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sample could not be taken (bus error, malformed block, no fix).
    pub fn record_sensor_fault(&self, source: Source, error: &dyn std::fmt::Display) {
        let total = self.sensor_faults[source.index()].fetch_add(1, Ordering::Relaxed) + 1;
        warn!(%source, total, "Sensor fault: {}", error);
    }

    /// A valid sample was rejected by the full queue.
    pub fn record_queue_full(&self, source: Source) {
        let total = self.queue_full[source.index()].fetch_add(1, Ordering::Relaxed) + 1;
        warn!(%source, total, "Event queue full, sample not delivered");
    }

    pub fn record_enqueued(&self, source: Source) {
        self.enqueued[source.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// The sink failed to persist a record.
    pub fn record_write_fault(&self, error: &dyn std::fmt::Display) {
        let total = self.write_faults.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(total, "Failed to write telemetry record: {}", error);
    }

    /// `count` records reached the log and were flushed.
    pub fn record_written(&self, count: u64) {
        if count == 0 {
            return;
        }
        let before = self.records_written.fetch_add(count, Ordering::Relaxed);
        let total = before + count;
        if total / 10_000 != before / 10_000 {
            debug!(total, "Telemetry records written");
        }
    }

    pub fn sensor_faults(&self, source: Source) -> u64 {
        self.sensor_faults[source.index()].load(Ordering::Relaxed)
    }

    pub fn queue_full(&self, source: Source) -> u64 {
        self.queue_full[source.index()].load(Ordering::Relaxed)
    }

    pub fn enqueued(&self, source: Source) -> u64 {
        self.enqueued[source.index()].load(Ordering::Relaxed)
    }

    pub fn write_faults(&self) -> u64 {
        self.write_faults.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            sources: Source::ALL
                .iter()
                .map(|&source| SourceCounters {
                    source,
                    enqueued: self.enqueued(source),
                    sensor_faults: self.sensor_faults(source),
                    queue_full: self.queue_full(source),
                })
                .collect(),
            write_faults: self.write_faults(),
            records_written: self.records_written(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_source() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_sensor_fault(Source::Compass, &"bus nack");
        diagnostics.record_sensor_fault(Source::Compass, &"bus nack");
        diagnostics.record_queue_full(Source::Gps);

        assert_eq!(diagnostics.sensor_faults(Source::Compass), 2);
        assert_eq!(diagnostics.sensor_faults(Source::Gps), 0);
        assert_eq!(diagnostics.queue_full(Source::Gps), 1);
        assert_eq!(diagnostics.queue_full(Source::Compass), 0);
    }

    #[test]
    fn test_snapshot_lists_every_source() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_enqueued(Source::Video);
        diagnostics.record_written(1);
        diagnostics.record_write_fault(&"disk full");

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.sources.len(), Source::COUNT);
        assert_eq!(snapshot.sources[0].source, Source::Video);
        assert_eq!(snapshot.sources[0].enqueued, 1);
        assert_eq!(snapshot.records_written, 1);
        assert_eq!(snapshot.write_faults, 1);
    }
}
