//! # ITG-3200 Gyroscope Driver
//!
//! InvenSense ITG-3200 3-axis gyroscope.
//!
//! Registers 0x1B..0x22 hold TEMP, X, Y, Z, each a big-endian signed 16-bit
//! value. Temperature is passed through raw (280 LSB/degC, -13200 at 35 degC).

use super::decode::{decode_words, Endianness};
use super::{DataLayout, DeviceConfig, DeviceCore, DriverState, InertialDriver};
use crate::bus::RegisterBus;
use crate::error::Result;
use crate::telemetry::event::GyroSample;
use crate::telemetry::{Reading, Source};

/// 7-bit bus address with AD0 low
pub const ITG3200_ADDRESS: u8 = 0x68;

pub const REG_SMPLRT_DIV: u8 = 0x15;
pub const REG_DLPF_FS: u8 = 0x16;
pub const REG_INT_CFG: u8 = 0x17;
pub const REG_INT_STATUS: u8 = 0x1A;
pub const REG_TEMP_OUT_H: u8 = 0x1B;
pub const REG_PWR_MGM: u8 = 0x3E;

/// PWR_MGM: clock from the X gyro PLL (CLK_SEL=001)
pub const PWR_MGM_PLL_X: u8 = 0b0000_0001;
/// SMPLRT_DIV: 1 kHz internal rate / (7 + 1) = 125 Hz
pub const SMPLRT_DIV_125HZ: u8 = 7;
/// DLPF_FS: full scale +/-2000 deg/s (FS_SEL=11), 42 Hz low-pass, 1 kHz internal (DLPF_CFG=011)
pub const DLPF_FS_2000DPS_42HZ: u8 = 0b0001_1011;
/// INT_CFG: raise RAW_RDY when new data is available
pub const INT_CFG_RAW_RDY_EN: u8 = 0b0000_0001;

/// INT_STATUS bit 0: raw data ready
pub const INT_RAW_DATA_READY: u8 = 0b0000_0001;

/// Data block: TEMP_OUT_H..GYRO_ZOUT_L
pub const DATA_LENGTH: usize = 8;

// Clock source goes first; the PLL needs to settle before sampling starts.
pub const GYROSCOPE_CONFIG: DeviceConfig = DeviceConfig {
    address: ITG3200_ADDRESS,
    init_writes: &[
        (REG_PWR_MGM, PWR_MGM_PLL_X),
        (REG_SMPLRT_DIV, SMPLRT_DIV_125HZ),
        (REG_DLPF_FS, DLPF_FS_2000DPS_42HZ),
        (REG_INT_CFG, INT_CFG_RAW_RDY_EN),
    ],
};

const LAYOUT: DataLayout = DataLayout {
    status_register: REG_INT_STATUS,
    ready_mask: INT_RAW_DATA_READY,
    data_register: REG_TEMP_OUT_H,
    data_length: DATA_LENGTH,
};

/// Decode an 8-byte block: temperature first, then X, Y, Z
pub fn decode_sample(block: &[u8]) -> Result<GyroSample> {
    let [temperature, x, y, z] = decode_words::<4>(block, Endianness::Big)?;
    Ok(GyroSample { temperature, x, y, z })
}

pub struct Gyroscope<B> {
    core: DeviceCore<B>,
}

impl<B: RegisterBus> Gyroscope<B> {
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, GYROSCOPE_CONFIG)
    }

    pub fn with_config(bus: B, config: DeviceConfig) -> Self {
        Self { core: DeviceCore::new(bus, config, LAYOUT) }
    }
}

impl<B: RegisterBus> InertialDriver for Gyroscope<B> {
    fn source(&self) -> Source {
        Source::Gyroscope
    }

    fn state(&self) -> DriverState {
        self.core.state()
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize()
    }

    fn poll(&mut self) -> Result<Option<Reading>> {
        Ok(self.core.poll(decode_sample)?.map(Reading::Gyroscope))
    }
}
