//! # Inertial Module
//!
//! Compass, accelerometer and gyroscope on one register bus, polled in a
//! single loop.
//!
//! This module handles:
//! - Applying each device's fixed configuration writes at startup
//! - Polling status registers for "new sample ready"
//! - Reading and decoding data blocks (per-device byte order and mounting signs)
//! - Emitting one telemetry event per decoded sample
//!
//! ## Driver state machine
//!
//! ```text
//! Uninitialized --initialize--> Configured --poll--> Idle | SampleReady | Faulted
//!                                    ^                         |
//!                                    +------- next poll -------+
//! ```
//!
//! A fault only affects the iteration it happened in; there is no fatal
//! device state.

pub mod accelerometer;
pub mod compass;
pub mod decode;
pub mod gyroscope;

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::bus::{RegisterBus, RegisterDevice};
use crate::error::{RecorderError, Result};
use crate::supervisor::ProducerContext;
use crate::telemetry::{Reading, Source, TelemetryEvent};

pub use accelerometer::Accelerometer;
pub use compass::Compass;
pub use gyroscope::Gyroscope;

/// Default pause between polling passes
///
/// Well under the shortest sample period of the cluster (ITG-3200 at 125 Hz = 8 ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Startup configuration of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// 7-bit bus address
    pub address: u8,
    /// (register, value) writes, applied once and in order
    pub init_writes: &'static [(u8, u8)],
}

/// Where a device reports readiness and data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    /// Status / interrupt source register
    pub status_register: u8,
    /// Bit(s) of the status register meaning "new sample ready"
    pub ready_mask: u8,
    /// First register of the data block
    pub data_register: u8,
    /// Length of the data block in bytes
    pub data_length: usize,
}

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Configured,
    /// Last poll found no new sample
    Idle,
    /// Last poll decoded a sample
    SampleReady,
    /// Last poll failed; the next poll retries
    Faulted,
}

/// One inertial device
pub trait InertialDriver: Send {
    /// Which telemetry source this device's samples are tagged with
    fn source(&self) -> Source;

    fn state(&self) -> DriverState;

    /// Apply the device configuration
    fn initialize(&mut self) -> Result<()>;

    /// Check for a new sample and decode it
    ///
    /// Returns `Ok(None)` when the device has nothing new.
    fn poll(&mut self) -> Result<Option<Reading>>;
}

/// Register handling shared by all three drivers
pub(crate) struct DeviceCore<B> {
    device: RegisterDevice<B>,
    config: DeviceConfig,
    layout: DataLayout,
    state: DriverState,
}

impl<B: RegisterBus> DeviceCore<B> {
    pub(crate) fn new(bus: B, config: DeviceConfig, layout: DataLayout) -> Self {
        Self {
            device: RegisterDevice::new(bus, config.address),
            config,
            layout,
            state: DriverState::Uninitialized,
        }
    }

    pub(crate) fn state(&self) -> DriverState {
        self.state
    }

    pub(crate) fn initialize(&mut self) -> Result<()> {
        let writes = self.config.init_writes;
        self.device.transaction(|bus| {
            for &(register, value) in writes {
                bus.write_register(register, value)?;
            }
            Ok::<(), RecorderError>(())
        })?;

        self.state = DriverState::Configured;
        debug!(
            "Configured device 0x{:02X} ({} register writes)",
            self.config.address,
            writes.len()
        );
        Ok(())
    }

    /// Status check, block read and decode, under one bus lock
    pub(crate) fn poll<T>(&mut self, decode: impl FnOnce(&[u8]) -> Result<T>) -> Result<Option<T>> {
        if self.state == DriverState::Uninitialized {
            return Err(RecorderError::NotInitialized(self.config.address));
        }
        self.state = DriverState::Configured;

        let layout = self.layout;
        let block = self.device.transaction(|bus| {
            let status = bus.read_register(layout.status_register)?;
            if status & layout.ready_mask == 0 {
                return Ok(None);
            }
            bus.read_registers(layout.data_register, layout.data_length).map(Some)
        });

        let result = block.and_then(|block| block.map(|bytes| decode(&bytes)).transpose());
        self.state = match &result {
            Ok(Some(_)) => DriverState::SampleReady,
            Ok(None) => DriverState::Idle,
            Err(_) => DriverState::Faulted,
        };
        result
    }
}

/// Polls the whole inertial cluster and emits its samples
pub struct InertialProducer {
    drivers: Vec<Box<dyn InertialDriver>>,
    poll_interval: Duration,
}

impl InertialProducer {
    /// Create a producer over an explicit driver set
    ///
    /// # Arguments
    ///
    /// * `drivers` - Devices to initialize and poll, in polling order
    /// * `poll_interval` - Time between two passes over the drivers
    pub fn new(drivers: Vec<Box<dyn InertialDriver>>, poll_interval: Duration) -> Self {
        Self { drivers, poll_interval }
    }

    /// Compass, accelerometer and gyroscope sharing `bus`
    ///
    /// Pass a [`crate::bus::SharedBus`] when the devices sit on one physical bus.
    pub fn with_bus<B>(bus: B, poll_interval: Duration) -> Self
    where
        B: RegisterBus + Clone + 'static,
    {
        Self::new(
            vec![
                Box::new(Compass::new(bus.clone())),
                Box::new(Accelerometer::new(bus.clone())),
                Box::new(Gyroscope::new(bus)),
            ],
            poll_interval,
        )
    }

    /// Initialize the drivers, then poll them until stopped
    ///
    /// A driver that fails to initialize is reported and left out. Every
    /// pass checks each remaining driver independently, so a fault on one
    /// never holds back the others.
    ///
    /// # Errors
    ///
    /// Returns error if no driver could be initialized, or the queue closed.
    pub async fn run(mut self, mut ctx: ProducerContext) -> Result<()> {
        // Initialize every driver, dropping the ones that fail
        self.drivers.retain_mut(|driver| match driver.initialize() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to initialize {}: {}", driver.source(), e);
                ctx.fault(driver.source(), &e);
                false
            }
        });

        if self.drivers.is_empty() {
            return Err(RecorderError::NoInertialDevices);
        }

        let names: Vec<&str> = self.drivers.iter().map(|d| d.source().name()).collect();
        info!("Polling {} every {:?}", names.join(", "), self.poll_interval);

        // A late pass is not made up for; the next one reads the latest sample
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.stop_requested() => break,
                _ = ticker.tick() => {}
            }

            // One pass: each driver is checked on its own
            for driver in self.drivers.iter_mut() {
                match driver.poll() {
                    Ok(Some(reading)) => ctx.deliver(TelemetryEvent::now(reading)).await?,
                    Ok(None) => {}
                    Err(e) => ctx.fault(driver.source(), &e),
                }
            }
        }

        debug!("Inertial producer stopped");
        Ok(())
    }
}

impl std::fmt::Debug for InertialProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InertialProducer")
            .field("drivers", &self.drivers.iter().map(|d| d.source()).collect::<Vec<_>>())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mocks::FakeBus;
    use crate::bus::SharedBus;
    use crate::supervisor::ProducerContext;
    use crate::telemetry::event::AxisSample;
    use crate::telemetry::{event_queue, Diagnostics, OverflowPolicy};
    use std::sync::Arc;
    use tokio::sync::watch;

    const TEST_CONFIG: DeviceConfig = DeviceConfig { address: 0x40, init_writes: &[(0x10, 0xAA), (0x11, 0xBB)] };
    const TEST_LAYOUT: DataLayout = DataLayout {
        status_register: 0x20,
        ready_mask: 0x01,
        data_register: 0x21,
        data_length: 2,
    };

    fn decode_one(bytes: &[u8]) -> Result<i16> {
        Ok(decode::decode_i16([bytes[0], bytes[1]], decode::Endianness::Big))
    }

    #[test]
    fn test_core_poll_before_initialize_fails() {
        let mut core = DeviceCore::new(FakeBus::new(), TEST_CONFIG, TEST_LAYOUT);
        assert!(matches!(core.poll(decode_one), Err(RecorderError::NotInitialized(0x40))));
        assert_eq!(core.state(), DriverState::Uninitialized);
    }

    #[test]
    fn test_core_state_transitions() {
        let bus = FakeBus::new();
        let mut core = DeviceCore::new(bus.clone(), TEST_CONFIG, TEST_LAYOUT);

        core.initialize().unwrap();
        assert_eq!(core.state(), DriverState::Configured);
        assert_eq!(bus.writes(), vec![(0x40, 0x10, 0xAA), (0x40, 0x11, 0xBB)]);

        // Status bit clear: idle, no data read
        assert_eq!(core.poll(decode_one).unwrap(), None);
        assert_eq!(core.state(), DriverState::Idle);

        bus.set_register(0x40, 0x20, 0x01);
        bus.set_registers(0x40, 0x21, &[0x04, 0xD2]);
        assert_eq!(core.poll(decode_one).unwrap(), Some(1234));
        assert_eq!(core.state(), DriverState::SampleReady);

        bus.fail_device(0x40);
        assert!(core.poll(decode_one).is_err());
        assert_eq!(core.state(), DriverState::Faulted);

        // Faults are transient: the next poll works again
        bus.heal_device(0x40);
        assert_eq!(core.poll(decode_one).unwrap(), Some(1234));
        assert_eq!(core.state(), DriverState::SampleReady);
    }

    #[test]
    fn test_core_initialize_failure_stays_uninitialized() {
        let bus = FakeBus::new();
        bus.fail_device(0x40);
        let mut core = DeviceCore::new(bus, TEST_CONFIG, TEST_LAYOUT);

        assert!(core.initialize().is_err());
        assert_eq!(core.state(), DriverState::Uninitialized);
    }

    fn ready_cluster(bus: &FakeBus) {
        // Compass: RDY set, X=1 Z=3 Y=2
        bus.set_register(compass::HMC5883L_ADDRESS, compass::REG_STATUS, compass::STATUS_RDY);
        bus.set_registers(compass::HMC5883L_ADDRESS, compass::REG_DATA_X_MSB, &[0, 1, 0, 3, 0, 2]);
        // Accelerometer: DATA_READY set, X=10 Y=20 Z=100 (little-endian)
        bus.set_register(
            accelerometer::ADXL345_ADDRESS,
            accelerometer::REG_INT_SOURCE,
            accelerometer::INT_DATA_READY,
        );
        bus.set_registers(accelerometer::ADXL345_ADDRESS, accelerometer::REG_DATAX0, &[10, 0, 20, 0, 100, 0]);
        // Gyroscope: RAW_DATA_RDY set
        bus.set_register(gyroscope::ITG3200_ADDRESS, gyroscope::REG_INT_STATUS, gyroscope::INT_RAW_DATA_READY);
        bus.set_registers(gyroscope::ITG3200_ADDRESS, gyroscope::REG_TEMP_OUT_H, &[0xCE, 0x00, 0, 4, 0, 5, 0, 6]);
    }

    #[tokio::test]
    async fn test_compass_fault_does_not_block_other_devices() {
        let bus = FakeBus::new();
        ready_cluster(&bus);

        let diagnostics = Arc::new(Diagnostics::new());
        let (tx, mut rx) = event_queue(64, OverflowPolicy::FailFast, diagnostics.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = ProducerContext::new(tx, diagnostics.clone(), stop_rx);

        // Compass configures fine, then every read from it fails
        bus.fail_reads(compass::HMC5883L_ADDRESS);
        let producer = InertialProducer::with_bus(SharedBus::new(bus.clone()), Duration::from_millis(2));

        let handle = tokio::spawn(producer.run(ctx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let events = rx.drain_all();
        assert!(events.iter().any(|e| e.source() == Source::Accelerometer));
        assert!(events.iter().any(|e| e.source() == Source::Gyroscope));
        assert!(events.iter().all(|e| e.source() != Source::Compass));
        assert!(diagnostics.sensor_faults(Source::Compass) > 0);

        let accel = events.iter().find(|e| e.source() == Source::Accelerometer).unwrap();
        assert_eq!(*accel.reading(), Reading::Accelerometer(AxisSample { x: 10, y: 20, z: -100 }));
    }

    #[tokio::test]
    async fn test_failed_initialization_drops_only_that_driver() {
        let bus = FakeBus::new();
        ready_cluster(&bus);
        bus.fail_device(gyroscope::ITG3200_ADDRESS);

        let diagnostics = Arc::new(Diagnostics::new());
        let (tx, mut rx) = event_queue(64, OverflowPolicy::FailFast, diagnostics.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = ProducerContext::new(tx, diagnostics.clone(), stop_rx);

        let producer = InertialProducer::with_bus(SharedBus::new(bus.clone()), Duration::from_millis(2));
        let handle = tokio::spawn(producer.run(ctx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let events = rx.drain_all();
        assert!(events.iter().any(|e| e.source() == Source::Compass));
        assert!(events.iter().all(|e| e.source() != Source::Gyroscope));
        assert_eq!(diagnostics.sensor_faults(Source::Gyroscope), 1);
    }

    #[tokio::test]
    async fn test_no_device_initializes_is_startup_fault() {
        let bus = FakeBus::new();
        for address in [compass::HMC5883L_ADDRESS, accelerometer::ADXL345_ADDRESS, gyroscope::ITG3200_ADDRESS] {
            bus.fail_device(address);
        }

        let diagnostics = Arc::new(Diagnostics::new());
        let (tx, _rx) = event_queue(4, OverflowPolicy::FailFast, diagnostics.clone());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let ctx = ProducerContext::new(tx, diagnostics, stop_rx);

        let producer = InertialProducer::with_bus(bus, Duration::from_millis(2));
        assert!(producer.run(ctx).await.is_err());
    }

    #[test]
    fn test_default_poll_interval_is_below_fastest_sample_period() {
        // ITG-3200 at 1 kHz / (7 + 1) = 125 Hz -> 8 ms
        assert!(DEFAULT_POLL_INTERVAL < Duration::from_millis(8));
    }
}
