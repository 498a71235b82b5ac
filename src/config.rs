//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and every field is optional; missing values fall back to the
//! `default_*` functions below.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RecorderError, Result};
use crate::supervisor::QueueSettings;
use crate::telemetry::OverflowPolicy;
use crate::video::{CaptureParams, FileNaming};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub gps: GpsConfig,
    #[serde(default)]
    pub inertial: InertialConfig,
}

/// Session output and lifetime
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default = "default_diagnostics_file")]
    pub diagnostics_file: String,

    /// 0 = until Ctrl+C
    #[serde(default)]
    pub duration_s: u64,
}

/// What a producer does when the queue is full
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    Block,
    FailFast,
}

/// Event queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    #[serde(default = "default_overflow")]
    pub overflow: OverflowMode,

    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
}

/// Telemetry sink configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

/// Video capture configuration
#[derive(Debug, Deserialize, Clone)]
pub struct VideoConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// Bits per second, 0 = encoder default
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    #[serde(default)]
    pub motion_vectors: bool,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default = "default_motion_extension")]
    pub motion_extension: String,

    #[serde(default = "default_video_command")]
    pub command: String,
}

/// GPS receiver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_gps_port")]
    pub port: String,

    #[serde(default = "default_gps_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_gps_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_read_budget_ms")]
    pub read_budget_ms: u64,

    /// Receiver silence after which the last fix is discarded
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

/// Inertial sensor cluster configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InertialConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_i2c_bus")]
    pub bus: String,

    #[serde(default = "default_inertial_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// Default value functions
fn default_data_dir() -> String { "./data".to_string() }
fn default_log_file() -> String { "mission.log".to_string() }
fn default_diagnostics_file() -> String { "diagnostics.log".to_string() }

fn default_queue_capacity() -> usize { crate::telemetry::queue::DEFAULT_CAPACITY }
fn default_overflow() -> OverflowMode { OverflowMode::Block }
fn default_block_timeout_ms() -> u64 { 50 }

fn default_idle_timeout_ms() -> u64 { 100 }

fn default_enabled() -> bool { true }
fn default_width() -> u32 { 1920 }
fn default_height() -> u32 { 1080 }
fn default_framerate() -> u32 { 30 }
fn default_bitrate() -> u32 { 25_000_000 }
fn default_file_prefix() -> String { "vid".to_string() }
fn default_extension() -> String { "h264".to_string() }
fn default_motion_extension() -> String { "motion".to_string() }
fn default_video_command() -> String { crate::video::rpicam::DEFAULT_COMMAND.to_string() }

fn default_gps_port() -> String { crate::gps::nmea::DEFAULT_PORT.to_string() }
fn default_gps_baud_rate() -> u32 { crate::gps::nmea::DEFAULT_BAUD_RATE }
fn default_gps_poll_interval_ms() -> u64 { 100 }
fn default_read_budget_ms() -> u64 { 50 }
fn default_stale_after_ms() -> u64 { 2000 }

fn default_i2c_bus() -> String { crate::bus::i2c::DEFAULT_I2C_BUS.to_string() }
fn default_inertial_poll_interval_ms() -> u64 { 2 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_file: default_log_file(),
            diagnostics_file: default_diagnostics_file(),
            duration_s: 0,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            overflow: default_overflow(),
            block_timeout_ms: default_block_timeout_ms(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { idle_timeout_ms: default_idle_timeout_ms() }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            width: default_width(),
            height: default_height(),
            framerate: default_framerate(),
            bitrate: default_bitrate(),
            motion_vectors: false,
            file_prefix: default_file_prefix(),
            extension: default_extension(),
            motion_extension: default_motion_extension(),
            command: default_video_command(),
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_gps_port(),
            baud_rate: default_gps_baud_rate(),
            poll_interval_ms: default_gps_poll_interval_ms(),
            read_budget_ms: default_read_budget_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl Default for InertialConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bus: default_i2c_bus(),
            poll_interval_ms: default_inertial_poll_interval_ms(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> RecorderError {
    RecorderError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mission_recorder::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.session.data_dir.is_empty() {
            return Err(invalid("session data_dir cannot be empty"));
        }
        if self.session.log_file.is_empty() {
            return Err(invalid("session log_file cannot be empty"));
        }
        if self.session.diagnostics_file.is_empty() {
            return Err(invalid("session diagnostics_file cannot be empty"));
        }
        if self.session.log_file == self.session.diagnostics_file {
            return Err(invalid("log_file and diagnostics_file must differ"));
        }

        if self.queue.capacity == 0 {
            return Err(invalid("queue capacity must be greater than 0"));
        }
        if self.queue.overflow == OverflowMode::Block && self.queue.block_timeout_ms == 0 {
            return Err(invalid("block_timeout_ms must be greater than 0 with overflow = \"block\""));
        }

        if self.sink.idle_timeout_ms == 0 {
            return Err(invalid("sink idle_timeout_ms must be greater than 0"));
        }

        if self.video.enabled {
            if self.video.width == 0 || self.video.height == 0 {
                return Err(invalid("video width and height must be greater than 0"));
            }
            if self.video.framerate == 0 {
                return Err(invalid("video framerate must be greater than 0"));
            }
            if self.video.file_prefix.is_empty() || self.video.extension.is_empty() {
                return Err(invalid("video file_prefix and extension cannot be empty"));
            }
            if self.video.motion_vectors && self.video.motion_extension.is_empty() {
                return Err(invalid("video motion_extension cannot be empty with motion_vectors"));
            }
            if self.video.motion_vectors && self.video.motion_extension == self.video.extension {
                return Err(invalid("video motion_extension must differ from extension"));
            }
            if self.video.command.is_empty() {
                return Err(invalid("video command cannot be empty"));
            }
        }

        if self.gps.enabled {
            if self.gps.port.is_empty() {
                return Err(invalid("gps port cannot be empty"));
            }
            if self.gps.baud_rate == 0 {
                return Err(invalid("gps baud_rate must be greater than 0"));
            }
            if self.gps.poll_interval_ms == 0 {
                return Err(invalid("gps poll_interval_ms must be greater than 0"));
            }
            if self.gps.read_budget_ms == 0 || self.gps.read_budget_ms >= self.gps.poll_interval_ms {
                return Err(invalid("gps read_budget_ms must be between 1 and poll_interval_ms"));
            }
            if self.gps.stale_after_ms <= self.gps.poll_interval_ms {
                return Err(invalid("gps stale_after_ms must be greater than poll_interval_ms"));
            }
        }

        if self.inertial.enabled {
            if self.inertial.bus.is_empty() {
                return Err(invalid("inertial bus cannot be empty"));
            }
            if self.inertial.poll_interval_ms == 0 {
                return Err(invalid("inertial poll_interval_ms must be greater than 0"));
            }
        }

        Ok(())
    }

    pub fn queue_settings(&self) -> QueueSettings {
        let policy = match self.queue.overflow {
            OverflowMode::Block => OverflowPolicy::Block {
                timeout: Duration::from_millis(self.queue.block_timeout_ms),
            },
            OverflowMode::FailFast => OverflowPolicy::FailFast,
        };

        QueueSettings {
            capacity: self.queue.capacity,
            policy,
            sink_idle_timeout: Duration::from_millis(self.sink.idle_timeout_ms),
        }
    }
}

impl SessionConfig {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir().join(&self.log_file)
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.data_dir().join(&self.diagnostics_file)
    }

    /// `None` runs until interrupted
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_s > 0).then(|| Duration::from_secs(self.duration_s))
    }
}

impl VideoConfig {
    pub fn capture_params(&self) -> CaptureParams {
        CaptureParams {
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            bitrate: self.bitrate,
            motion_vectors: self.motion_vectors,
        }
    }

    pub fn file_naming(&self) -> FileNaming {
        FileNaming {
            prefix: self.file_prefix.clone(),
            extension: self.extension.clone(),
            motion_extension: self.motion_vectors.then(|| self.motion_extension.clone()),
        }
    }
}

impl GpsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_budget(&self) -> Duration {
        Duration::from_millis(self.read_budget_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

impl InertialConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
