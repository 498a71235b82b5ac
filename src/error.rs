//! # Error Types
//!
//! Custom error types for Mission Recorder using `thiserror`.

use thiserror::Error;

/// Main error type for Mission Recorder
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Register read/write failed on the I2C bus
    #[error("Bus error on device 0x{address:02X}: {message}")]
    Bus { address: u8, message: String },

    /// A sample was read but could not be decoded
    #[error("Malformed sample: {0}")]
    MalformedSample(String),

    /// Driver was polled before its configuration was applied
    #[error("Device 0x{0:02X} is not initialized")]
    NotInitialized(u8),

    /// Every inertial driver failed to initialize
    #[error("No inertial device could be initialized")]
    NoInertialDevices,

    /// The telemetry sink is gone
    #[error("Event queue closed")]
    QueueClosed,

    /// GPS receiver has no 2D/3D fix
    #[error("No GPS fix available")]
    NoFix,

    /// GPS source errors (stream closed, bad sentence)
    #[error("GPS source error: {0}")]
    Gps(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Video encoder errors
    #[error("Video encoder error: {0}")]
    Video(String),

    /// Video encoder process is no longer running
    #[error("Video encoder stopped: {0}")]
    EncoderStopped(String),

    /// Every numbered output file name is already taken
    #[error("No free output file index in {0}")]
    OutputFilesExhausted(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Event serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Whether a producer loop should keep running after this error.
    ///
    /// Sensor faults are transient by policy: the next cycle retries.
    /// Everything else ends the producer that hit it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecorderError::Bus { .. }
                | RecorderError::MalformedSample(_)
                | RecorderError::NoFix
                | RecorderError::Gps(_)
                | RecorderError::Video(_)
        )
    }
}

/// Result type alias for Mission Recorder
pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_display_includes_address() {
        let err = RecorderError::Bus { address: 0x1E, message: "nack".to_string() };
        assert_eq!(err.to_string(), "Bus error on device 0x1E: nack");
    }

    #[test]
    fn test_sensor_faults_are_transient() {
        assert!(RecorderError::NoFix.is_transient());
        assert!(RecorderError::MalformedSample("short".into()).is_transient());
        assert!(RecorderError::Bus { address: 0x53, message: String::new() }.is_transient());
    }

    #[test]
    fn test_startup_faults_are_not_transient() {
        assert!(!RecorderError::EncoderStopped("exit status 1".into()).is_transient());
        assert!(!RecorderError::OutputFilesExhausted("./data".into()).is_transient());
        assert!(!RecorderError::Io(std::io::Error::other("disk")).is_transient());
    }
}
