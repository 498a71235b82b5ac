//! # Mission Recorder Library
//!
//! Records video frame metadata, GPS fixes and inertial samples from a moving
//! camera platform into one time-stamped JSON-lines log.
//!
//! Each source runs as its own task and hands [`telemetry::TelemetryEvent`]s
//! to a bounded queue; a single sink task owns the log file. A slow or
//! failing sensor never stalls the sink or the other sensors.

pub mod bus;
pub mod config;
pub mod error;
pub mod gps;
pub mod inertial;
pub mod supervisor;
pub mod telemetry;
pub mod video;
