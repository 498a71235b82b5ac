//! # ADXL345 Accelerometer Driver
//!
//! Analog Devices ADXL345 3-axis accelerometer.
//!
//! Data registers 0x32..0x37 hold X, Y, Z as little-endian signed 16-bit
//! values (DATAx0 is the low byte). The board is mounted upside-down, so the
//! Z axis is inverted before the sample is emitted.

use super::decode::{apply_sign, decode_words, Endianness};
use super::{DataLayout, DeviceConfig, DeviceCore, DriverState, InertialDriver};
use crate::bus::RegisterBus;
use crate::error::Result;
use crate::telemetry::event::AxisSample;
use crate::telemetry::{Reading, Source};

/// 7-bit bus address with ALT ADDRESS pin low
pub const ADXL345_ADDRESS: u8 = 0x53;

/// Data rate and power mode control
pub const REG_BW_RATE: u8 = 0x2C;
/// Power-saving features control
pub const REG_POWER_CTL: u8 = 0x2D;
/// Interrupt enable control
pub const REG_INT_ENABLE: u8 = 0x2E;
/// Source of interrupts
pub const REG_INT_SOURCE: u8 = 0x30;
/// Data format control
pub const REG_DATA_FORMAT: u8 = 0x31;
/// First data register (X low byte)
pub const REG_DATAX0: u8 = 0x32;

/// DATA_FORMAT: FULL_RES=1 (4 mg/LSB at every range), range +/-16 g (Range=11)
pub const DATA_FORMAT_FULL_RES_16G: u8 = 0b0000_1011;
/// BW_RATE: normal power, 100 Hz output data rate (Rate=1010)
pub const BW_RATE_100HZ: u8 = 0b0000_1010;
/// INT_ENABLE: DATA_READY interrupt
pub const INT_ENABLE_DATA_READY: u8 = 0b1000_0000;
/// POWER_CTL: Measure=1, leave standby
pub const POWER_CTL_MEASURE: u8 = 0b0000_1000;

/// INT_SOURCE bit 7: new data available
pub const INT_DATA_READY: u8 = 0b1000_0000;

/// Data block: DATAX0..DATAZ1
pub const DATA_LENGTH: usize = 6;

/// Per-axis inversion for the mounting orientation (X, Y, Z)
pub const AXIS_INVERT: [bool; 3] = [false, false, true];

// Measurement mode is enabled last, after format and rate are set.
pub const ACCELEROMETER_CONFIG: DeviceConfig = DeviceConfig {
    address: ADXL345_ADDRESS,
    init_writes: &[
        (REG_DATA_FORMAT, DATA_FORMAT_FULL_RES_16G),
        (REG_BW_RATE, BW_RATE_100HZ),
        (REG_INT_ENABLE, INT_ENABLE_DATA_READY),
        (REG_POWER_CTL, POWER_CTL_MEASURE),
    ],
};

const LAYOUT: DataLayout = DataLayout {
    status_register: REG_INT_SOURCE,
    ready_mask: INT_DATA_READY,
    data_register: REG_DATAX0,
    data_length: DATA_LENGTH,
};

/// Decode a 6-byte data block, applying the mounting signs
pub fn decode_sample(block: &[u8]) -> Result<AxisSample> {
    let [x, y, z] = decode_words::<3>(block, Endianness::Little)?;
    Ok(AxisSample {
        x: apply_sign(x, AXIS_INVERT[0]),
        y: apply_sign(y, AXIS_INVERT[1]),
        z: apply_sign(z, AXIS_INVERT[2]),
    })
}

pub struct Accelerometer<B> {
    core: DeviceCore<B>,
}

impl<B: RegisterBus> Accelerometer<B> {
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, ACCELEROMETER_CONFIG)
    }

    pub fn with_config(bus: B, config: DeviceConfig) -> Self {
        Self { core: DeviceCore::new(bus, config, LAYOUT) }
    }
}

impl<B: RegisterBus> InertialDriver for Accelerometer<B> {
    fn source(&self) -> Source {
        Source::Accelerometer
    }

    fn state(&self) -> DriverState {
        self.core.state()
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize()
    }

    fn poll(&mut self) -> Result<Option<Reading>> {
        Ok(self.core.poll(decode_sample)?.map(Reading::Accelerometer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mocks::FakeBus;

    #[test]
    fn test_configuration_bytes() {
        assert_eq!(DATA_FORMAT_FULL_RES_16G, 0x0B);
        assert_eq!(BW_RATE_100HZ, 0x0A);
        assert_eq!(INT_ENABLE_DATA_READY, 0x80);
        assert_eq!(POWER_CTL_MEASURE, 0x08);
    }

    #[test]
    fn test_measure_mode_is_written_last() {
        let bus = FakeBus::new();
        let mut accel = Accelerometer::new(bus.clone());
        accel.initialize().unwrap();

        let writes = bus.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes.last(), Some(&(0x53, REG_POWER_CTL, POWER_CTL_MEASURE)));
    }

    #[test]
    fn test_decode_is_little_endian() {
        // X bytes 0xD2 0x04 -> 0x04D2 = 1234 little-endian
        let block = [0xD2, 0x04, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode_sample(&block).unwrap().x, 1234);

        // The big-endian reading of the same bytes would be wrong
        let block = [0x04, 0xD2, 0x00, 0x00, 0x00, 0x00];
        let x = decode_sample(&block).unwrap().x;
        assert_ne!(x, 1234);
        assert_eq!(x, i16::from_le_bytes([0x04, 0xD2]));
    }

    #[test]
    fn test_z_axis_is_inverted() {
        // Raw Z = 100
        let block = [0x00, 0x00, 0x00, 0x00, 0x64, 0x00];
        let sample = decode_sample(&block).unwrap();
        assert_eq!(sample.z, -100);
    }

    #[test]
    fn test_x_and_y_keep_their_sign() {
        let block = [0x64, 0x00, 0x9C, 0xFF, 0x00, 0x00];
        let sample = decode_sample(&block).unwrap();
        assert_eq!(sample.x, 100);
        assert_eq!(sample.y, -100);
    }

    #[test]
    fn test_poll_emits_corrected_sample() {
        let bus = FakeBus::new();
        bus.set_register(0x53, REG_INT_SOURCE, INT_DATA_READY);
        bus.set_registers(0x53, REG_DATAX0, &[0x01, 0x00, 0x02, 0x00, 0x64, 0x00]);
        let mut accel = Accelerometer::new(bus);
        accel.initialize().unwrap();

        assert_eq!(
            accel.poll().unwrap(),
            Some(Reading::Accelerometer(AxisSample { x: 1, y: 2, z: -100 }))
        );
        assert_eq!(accel.state(), DriverState::SampleReady);
    }

    #[test]
    fn test_other_interrupt_sources_are_not_ready() {
        let bus = FakeBus::new();
        // Activity + watermark set, DATA_READY clear
        bus.set_register(0x53, REG_INT_SOURCE, 0b0001_0010);
        let mut accel = Accelerometer::new(bus);
        accel.initialize().unwrap();
        assert_eq!(accel.poll().unwrap(), None);
    }
}
