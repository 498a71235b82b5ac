//! # Telemetry Module
//!
//! Everything between a producer taking a sample and a line landing on disk.
//!
//! This module handles:
//! - Event types, one tagged variant per sensor source
//! - The bounded queue shared by all producers
//! - The JSONL sink that drains it
//! - Diagnostics counters, kept apart from the telemetry log

pub mod diagnostics;
pub mod event;
pub mod queue;
pub mod sink;

pub use diagnostics::Diagnostics;
pub use event::{Reading, Source, TelemetryEvent};
pub use queue::{event_queue, EventReceiver, EventSender, OverflowPolicy, QueueError};
pub use sink::Sink;
