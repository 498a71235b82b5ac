//! # Telemetry Events
//!
//! One tagged record per sample. Every event names its source and carries the
//! wall-clock time it was captured, so each JSONL line stands on its own.
//!
//! Wire shape (one line per event):
//!
//! ```text
//! {"time":"2026-10-18T09:00:00.123456Z","src":"accelerometer","x":12,"y":-3,"z":-256}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sensor source of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Video,
    Gps,
    Compass,
    Accelerometer,
    Gyroscope,
}

impl Source {
    /// Number of sources, for per-source counter arrays
    pub const COUNT: usize = 5;

    /// All sources in declaration order
    pub const ALL: [Source; Source::COUNT] = [
        Source::Video,
        Source::Gps,
        Source::Compass,
        Source::Accelerometer,
        Source::Gyroscope,
    ];

    /// Stable index into per-source arrays
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name, as written in the `src` field
    pub fn name(self) -> &'static str {
        match self {
            Source::Video => "video",
            Source::Gps => "gps",
            Source::Compass => "compass",
            Source::Accelerometer => "accelerometer",
            Source::Gyroscope => "gyroscope",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoder classification of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Predicted (inter) frame
    Frame,
    /// Key (intra) frame
    KeyFrame,
    /// SPS/PPS header emitted ahead of a key frame
    SpsHeader,
    /// Motion vector data
    MotionData,
}

/// Metadata for one encoded video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFrame {
    /// Numeric suffix of the output file the frame was written to
    pub file_index: u32,
    /// Frame ordinal within the recording
    pub index: u64,
    pub frame_type: FrameType,
    /// Encoder presentation timestamp in microseconds, if the encoder reported one
    pub frame_timestamp_us: Option<u64>,
    /// Whether the frame was fully written
    pub complete: bool,
    /// Byte offset of the stream after this frame
    pub position: u64,
}

/// GPS fix mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixMode {
    NoFix,
    Fix2d,
    Fix3d,
}

/// One GPS position/velocity sample
///
/// Every measurement is optional: receivers routinely leave fields empty while
/// a fix is still converging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Latitude in decimal degrees (north positive)
    pub latitude: f64,
    /// Longitude in decimal degrees (east positive)
    pub longitude: f64,
    /// Altitude above mean sea level in metres
    pub altitude: Option<f64>,
    /// Ground speed in metres per second
    pub speed: Option<f64>,
    /// Course over ground in degrees true
    pub track: Option<f64>,
    /// Climb rate in metres per second
    pub climb: Option<f64>,
    pub mode: FixMode,
    /// Satellites used in the solution
    pub satellites: u8,
    /// UTC time reported by the receiver
    #[serde(rename = "fix_time")]
    pub time: Option<DateTime<Utc>>,
    /// Horizontal dilution of precision
    pub error: Option<f64>,
}

/// Three-axis raw reading (compass, accelerometer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// Gyroscope reading with its die temperature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GyroSample {
    pub temperature: i16,
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// Source-specific payload, tagged by `src`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "src", rename_all = "snake_case")]
pub enum Reading {
    Video(VideoFrame),
    Gps(GpsFix),
    Compass(AxisSample),
    Accelerometer(AxisSample),
    Gyroscope(GyroSample),
}

impl Reading {
    pub fn source(&self) -> Source {
        match self {
            Reading::Video(_) => Source::Video,
            Reading::Gps(_) => Source::Gps,
            Reading::Compass(_) => Source::Compass,
            Reading::Accelerometer(_) => Source::Accelerometer,
            Reading::Gyroscope(_) => Source::Gyroscope,
        }
    }
}

/// Immutable, self-describing telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Wall-clock time at which the producer took the sample
    #[serde(rename = "time")]
    captured_at: DateTime<Utc>,
    #[serde(flatten)]
    reading: Reading,
}

impl TelemetryEvent {
    /// Stamp a reading with the current wall-clock time
    pub fn now(reading: Reading) -> Self {
        Self::at(Utc::now(), reading)
    }

    /// Build an event with an explicit capture time
    pub fn at(captured_at: DateTime<Utc>, reading: Reading) -> Self {
        Self { captured_at, reading }
    }

    pub fn source(&self) -> Source {
        self.reading.source()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn reading(&self) -> &Reading {
        &self.reading
    }

    /// Serialize as a single JSON line without the trailing newline
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
