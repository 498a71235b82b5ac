//! # Mission Recorder
//!
//! Records a telemetry session: video frame metadata, GPS fixes and inertial
//! samples, merged into `<data_dir>/mission.log`.
//!
//! Usage: `mission-recorder [config.toml]`

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mission_recorder::bus::i2c::I2cBus;
use mission_recorder::bus::SharedBus;
use mission_recorder::config::{Config, SessionConfig};
use mission_recorder::gps::{GpsProducer, SerialGps};
use mission_recorder::inertial::InertialProducer;
use mission_recorder::supervisor::Supervisor;
use mission_recorder::telemetry::{Diagnostics, Sink};
use mission_recorder::video::{RpicamEncoder, VideoProducer};

/// Interval between status log messages
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Console plus a plain-text diagnostics file next to the telemetry log
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(session: &SessionConfig) -> WorkerGuard {
    let appender = tracing_appender::rolling::never(session.data_dir(), &session.diagnostics_file);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}

/// Start every enabled producer
///
/// A producer whose hardware cannot be opened is skipped; the rest still run.
fn spawn_producers(config: &Config, supervisor: &mut Supervisor) {
    if config.video.enabled {
        let encoder = RpicamEncoder::new(config.video.command.clone());
        supervisor.spawn_video(VideoProducer::new(
            encoder,
            config.video.capture_params(),
            config.session.data_dir(),
            config.video.file_naming(),
        ));
    }

    if config.gps.enabled {
        let source = SerialGps::new(config.gps.port.clone(), config.gps.baud_rate, config.gps.read_budget())
            .with_stale_after(config.gps.stale_after());
        supervisor.spawn_gps(GpsProducer::new(source, config.gps.poll_interval()));
    }

    if config.inertial.enabled {
        match I2cBus::open(&config.inertial.bus) {
            Ok(bus) => {
                let producer = InertialProducer::with_bus(SharedBus::new(bus), config.inertial.poll_interval());
                supervisor.spawn_inertial(producer);
            }
            Err(e) => error!("Inertial sensors unavailable: {}", e),
        }
    }
}

/// Resolves on Ctrl+C, or once the configured duration has passed
async fn wait_for_stop(duration: Option<Duration>) -> Result<()> {
    match duration {
        Some(duration) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = tokio::time::sleep(duration) => {
                    info!("Session duration of {:?} reached, shutting down...", duration);
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down...");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref().map(Path::new))?;

    let data_dir = config.session.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let _log_guard = init_logging(&config.session);
    info!("Mission Recorder v{} starting...", env!("CARGO_PKG_VERSION"));

    let diagnostics = Arc::new(Diagnostics::default());
    let mut supervisor = Supervisor::new(config.queue_settings(), diagnostics.clone());

    let log_path = config.session.log_path();
    let sink = Sink::open(&log_path, diagnostics.clone())
        .await
        .with_context(|| format!("Failed to open telemetry log {}", log_path.display()))?;
    supervisor.spawn_sink(sink);

    spawn_producers(&config, &mut supervisor);
    info!("Press Ctrl+C to stop recording");

    let mut status = interval(STATUS_INTERVAL);
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);
    status.tick().await;

    let stop = wait_for_stop(config.session.duration());
    tokio::pin!(stop);

    loop {
        tokio::select! {
            result = &mut stop => {
                result?;
                break;
            }
            _ = status.tick() => {
                info!("{} records written", diagnostics.records_written());
                let finished = supervisor.finished_units();
                if !finished.is_empty() {
                    warn!("Stopped units: {}", finished.join(", "));
                }
            }
        }
    }

    supervisor.shutdown().await;

    let snapshot = diagnostics.snapshot();
    info!("Session diagnostics: {}", serde_json::to_string(&snapshot)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_path_uses_defaults() {
        let config = load_config(None).unwrap();
        assert!(config.video.enabled && config.gps.enabled && config.inertial.enabled);
    }

    #[test]
    fn test_unreadable_config_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/recorder.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/recorder.toml"));
    }

    #[test]
    fn test_status_interval() {
        assert_eq!(STATUS_INTERVAL, Duration::from_secs(10), "Status should be logged every 10 seconds");
    }
}
