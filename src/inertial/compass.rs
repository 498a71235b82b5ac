//! # HMC5883L Compass Driver
//!
//! Honeywell HMC5883L 3-axis magnetometer.
//!
//! Data registers 0x03..0x08 hold X, Z, Y (in that order), each as a
//! big-endian signed 16-bit value. A channel reads -4096 when the ADC
//! overflowed; the value is passed through unchanged.

use super::decode::{decode_words, Endianness};
use super::{DataLayout, DeviceConfig, DeviceCore, DriverState, InertialDriver};
use crate::bus::RegisterBus;
use crate::error::Result;
use crate::telemetry::event::AxisSample;
use crate::telemetry::{Reading, Source};

/// 7-bit bus address (fixed)
pub const HMC5883L_ADDRESS: u8 = 0x1E;

/// Configuration register A
pub const REG_CONFIG_A: u8 = 0x00;
/// Configuration register B
pub const REG_CONFIG_B: u8 = 0x01;
/// Mode register
pub const REG_MODE: u8 = 0x02;
/// First data register (X MSB)
pub const REG_DATA_X_MSB: u8 = 0x03;
/// Status register
pub const REG_STATUS: u8 = 0x09;

/// CRA: 1 sample averaged (MA=00), 75 Hz output rate (DO=110), normal measurement (MS=00)
pub const CONFIG_A_75HZ_NORMAL: u8 = 0b0001_1000;
/// CRB: gain 1090 LSb/Gauss, +/-1.3 Ga range (GN=001)
pub const CONFIG_B_GAIN_1090: u8 = 0b0010_0000;
/// MR: continuous-measurement mode (MD=00)
pub const MODE_CONTINUOUS: u8 = 0b0000_0000;

/// SR bit 0 (RDY): all six data registers hold a new measurement
pub const STATUS_RDY: u8 = 0b0000_0001;

/// Data block: X MSB..Y LSB
pub const DATA_LENGTH: usize = 6;

pub const COMPASS_CONFIG: DeviceConfig = DeviceConfig {
    address: HMC5883L_ADDRESS,
    init_writes: &[
        (REG_CONFIG_A, CONFIG_A_75HZ_NORMAL),
        (REG_CONFIG_B, CONFIG_B_GAIN_1090),
        (REG_MODE, MODE_CONTINUOUS),
    ],
};

const LAYOUT: DataLayout = DataLayout {
    status_register: REG_STATUS,
    ready_mask: STATUS_RDY,
    data_register: REG_DATA_X_MSB,
    data_length: DATA_LENGTH,
};

/// Decode a 6-byte data block into X, Y, Z
pub fn decode_sample(block: &[u8]) -> Result<AxisSample> {
    let [x, z, y] = decode_words::<3>(block, Endianness::Big)?;
    Ok(AxisSample { x, y, z })
}

pub struct Compass<B> {
    core: DeviceCore<B>,
}

impl<B: RegisterBus> Compass<B> {
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, COMPASS_CONFIG)
    }

    pub fn with_config(bus: B, config: DeviceConfig) -> Self {
        Self { core: DeviceCore::new(bus, config, LAYOUT) }
    }
}

impl<B: RegisterBus> InertialDriver for Compass<B> {
    fn source(&self) -> Source {
        Source::Compass
    }

    fn state(&self) -> DriverState {
        self.core.state()
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize()
    }

    fn poll(&mut self) -> Result<Option<Reading>> {
        Ok(self.core.poll(decode_sample)?.map(Reading::Compass))
    }
}
