//! `embedded-hal` I2C adapter
//!
//! Wraps any `embedded_hal::i2c::I2c` implementation, typically
//! `linux_embedded_hal::I2cdev` on `/dev/i2c-1`.

use embedded_hal::i2c::{Error as _, I2c};
use tracing::info;

use super::RegisterBus;
use crate::error::{RecorderError, Result};

/// Default I2C adapter on a Raspberry Pi header
pub const DEFAULT_I2C_BUS: &str = "/dev/i2c-1";

/// Register bus over an `embedded-hal` I2C master
pub struct I2cBus<I> {
    i2c: I,
}

impl<I: I2c> I2cBus<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }
}

impl I2cBus<linux_embedded_hal::I2cdev> {
    /// Open a Linux i2c-dev adapter
    ///
    /// # Errors
    ///
    /// Returns error if the device node cannot be opened
    pub fn open(path: &str) -> Result<Self> {
        let dev = linux_embedded_hal::I2cdev::new(path).map_err(|e| {
            RecorderError::Io(std::io::Error::other(format!("Failed to open {}: {}", path, e)))
        })?;
        info!("Opened I2C bus at {}", path);
        Ok(Self::new(dev))
    }
}

fn bus_error(address: u8, error: impl embedded_hal::i2c::Error) -> RecorderError {
    RecorderError::Bus { address, message: format!("{:?}", error.kind()) }
}

impl<I: I2c + Send> RegisterBus for I2cBus<I> {
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(address, &[register], &mut buf)
            .map_err(|e| bus_error(address, e))?;
        Ok(buf[0])
    }

    fn read_block(&mut self, address: u8, register: u8, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.i2c
            .write_read(address, &[register], &mut buf)
            .map_err(|e| bus_error(address, e))?;
        Ok(buf)
    }

    fn write_byte(&mut self, address: u8, register: u8, value: u8) -> Result<()> {
        self.i2c
            .write(address, &[register, value])
            .map_err(|e| bus_error(address, e))
    }

    // One transfer; the devices on this bus auto-increment the register pointer.
    fn write_block(&mut self, address: u8, register: u8, values: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(values.len() + 1);
        frame.push(register);
        frame.extend_from_slice(values);
        self.i2c.write(address, &frame).map_err(|e| bus_error(address, e))
    }
}
