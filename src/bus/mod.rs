//! # Register Bus Module
//!
//! Byte-register access to devices on a shared bus (I2C on the reference
//! hardware).
//!
//! This module handles:
//! - The [`RegisterBus`] transport abstraction (read/write one or many registers)
//! - [`RegisterDevice`], a bus handle bound to one device address
//! - [`SharedBus`], mutual exclusion for devices sharing one physical bus
//! - An `embedded-hal` adapter for real hardware (see [`i2c`])

pub mod i2c;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;

/// Register-level transport
///
/// Implementations talk to whatever sits under the bus (Linux i2c-dev, a test
/// fake). Multi-register sequences that must not interleave with another
/// device's traffic go through [`RegisterBus::exclusive`].
pub trait RegisterBus: Send {
    /// Read a single register
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8>;

    /// Read `length` consecutive registers starting at `register`
    fn read_block(&mut self, address: u8, register: u8, length: usize) -> Result<Vec<u8>>;

    /// Write a single register
    fn write_byte(&mut self, address: u8, register: u8, value: u8) -> Result<()>;

    /// Write consecutive registers starting at `register`
    fn write_block(&mut self, address: u8, register: u8, values: &[u8]) -> Result<()> {
        for (offset, &value) in values.iter().enumerate() {
            self.write_byte(address, register.wrapping_add(offset as u8), value)?;
        }
        Ok(())
    }

    /// Run `f` with exclusive use of the bus
    ///
    /// An owned bus is already exclusive; [`SharedBus`] holds its lock for the
    /// whole closure.
    fn exclusive<R>(&mut self, f: impl FnOnce(&mut dyn RegisterBus) -> R) -> R
    where
        Self: Sized,
    {
        f(self)
    }
}

/// One physical bus shared by several device handles
///
/// Clones refer to the same bus. Each register call locks for its own
/// duration; [`RegisterBus::exclusive`] locks for a whole sequence.
pub struct SharedBus<B> {
    inner: Arc<Mutex<B>>,
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B: RegisterBus> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self { inner: Arc::new(Mutex::new(bus)) }
    }

    // A panic mid-transaction leaves the bus usable; the next read simply retries.
    fn lock(&self) -> MutexGuard<'_, B> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: RegisterBus> RegisterBus for SharedBus<B> {
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8> {
        self.lock().read_byte(address, register)
    }

    fn read_block(&mut self, address: u8, register: u8, length: usize) -> Result<Vec<u8>> {
        self.lock().read_block(address, register, length)
    }

    fn write_byte(&mut self, address: u8, register: u8, value: u8) -> Result<()> {
        self.lock().write_byte(address, register, value)
    }

    fn write_block(&mut self, address: u8, register: u8, values: &[u8]) -> Result<()> {
        self.lock().write_block(address, register, values)
    }

    fn exclusive<R>(&mut self, f: impl FnOnce(&mut dyn RegisterBus) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }
}

/// Bus handle bound to one device address
pub struct RegisterDevice<B> {
    bus: B,
    address: u8,
}

impl<B: RegisterBus> RegisterDevice<B> {
    pub fn new(bus: B, address: u8) -> Self {
        Self { bus, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn read_register(&mut self, register: u8) -> Result<u8> {
        self.bus.read_byte(self.address, register)
    }

    pub fn read_registers(&mut self, register: u8, length: usize) -> Result<Vec<u8>> {
        self.bus.read_block(self.address, register, length)
    }

    pub fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.bus.write_byte(self.address, register, value)
    }

    pub fn write_registers(&mut self, register: u8, values: &[u8]) -> Result<()> {
        self.bus.write_block(self.address, register, values)
    }

    /// Run a register sequence without interleaving other devices' traffic
    pub fn transaction<R>(&mut self, f: impl FnOnce(&mut BoundBus<'_>) -> R) -> R {
        let address = self.address;
        self.bus.exclusive(|bus| f(&mut BoundBus { bus, address }))
    }
}

/// Device view of a locked bus, handed to [`RegisterDevice::transaction`]
pub struct BoundBus<'a> {
    bus: &'a mut dyn RegisterBus,
    address: u8,
}

impl BoundBus<'_> {
    pub fn read_register(&mut self, register: u8) -> Result<u8> {
        self.bus.read_byte(self.address, register)
    }

    pub fn read_registers(&mut self, register: u8, length: usize) -> Result<Vec<u8>> {
        self.bus.read_block(self.address, register, length)
    }

    pub fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.bus.write_byte(self.address, register, value)
    }
}
