// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborator interfaces shared by the boot-time board drivers.
//!
//! The drivers in this workspace run as plugins inside a larger boot
//! firmware. Everything they need from that firmware (a byte-addressed
//! device, a register window, the environment store, cache maintenance)
//! comes in through the traits here, so that the drivers can be exercised on
//! the host against the in-memory versions in [`fakes`].

#![cfg_attr(not(test), no_std)]

mod mac;

#[cfg(any(test, feature = "fakes"))]
pub mod fakes;

pub use mac::MacAddress;

/// Errors reported by a [`ByteTransport`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing answered at the device address.
    NoDevice,
    /// The device NACKed part of the transfer.
    Nack,
    /// The transfer would run past the end of the device.
    OutOfRange,
    /// Generic bus failure (arbitration loss, controller error).
    Bus,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::NoDevice => "no device",
            Self::Nack => "device NACK",
            Self::OutOfRange => "offset out of range",
            Self::Bus => "bus error",
        };
        f.write_str(s)
    }
}

/// A byte-addressed device, typically an I2C EEPROM.
pub trait ByteTransport {
    /// Fills `buf` with the bytes starting at `offset`.
    fn read(&mut self, offset: u32, buf: &mut [u8])
        -> Result<(), TransportError>;

    /// Writes `bytes` starting at `offset`. Page boundaries and write-cycle
    /// timing are the caller's problem.
    fn write(&mut self, offset: u32, bytes: &[u8])
        -> Result<(), TransportError>;
}

impl<T: ByteTransport + ?Sized> ByteTransport for &mut T {
    fn read(
        &mut self,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        (**self).read(offset, buf)
    }

    fn write(
        &mut self,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        (**self).write(offset, bytes)
    }
}

/// A window of 32-bit memory-mapped registers.
///
/// Offsets are in bytes from the start of the window. Accesses are volatile
/// and cannot fail; a window that isn't clocked simply reads garbage, which is
/// why drivers gate their accesses on their own state.
pub trait RegisterWindow {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);

    fn modify32(&self, offset: u32, clear: u32, set: u32) {
        let v = self.read32(offset);
        self.write32(offset, (v & !clear) | set);
    }

    fn set_bits32(&self, offset: u32, bits: u32) {
        self.modify32(offset, 0, bits);
    }

    fn clear_bits32(&self, offset: u32, bits: u32) {
        self.modify32(offset, bits, 0);
    }
}

impl<T: RegisterWindow + ?Sized> RegisterWindow for &T {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}

/// A real memory-mapped register block.
pub struct MmioWindow {
    base: usize,
}

impl MmioWindow {
    /// # Safety
    ///
    /// `base` must be the address of a register block that stays mapped for
    /// the lifetime of this value, and nothing else may assume exclusive
    /// access to it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl RegisterWindow for MmioWindow {
    fn read32(&self, offset: u32) -> u32 {
        let p = (self.base + offset as usize) as *const u32;
        // Safety: validity of the block is the contract of `new`.
        unsafe { core::ptr::read_volatile(p) }
    }

    fn write32(&self, offset: u32, value: u32) {
        let p = (self.base + offset as usize) as *mut u32;
        // Safety: validity of the block is the contract of `new`.
        unsafe { core::ptr::write_volatile(p, value) }
    }
}

/// Data-cache maintenance for memory shared with a DMA engine.
///
/// On fully coherent platforms both operations are no-ops.
pub trait CacheControl {
    /// Writes back any dirty lines covering `[addr, addr + len)`.
    fn flush(&self, addr: usize, len: usize);
    /// Discards any lines covering `[addr, addr + len)`.
    fn invalidate(&self, addr: usize, len: usize);

    /// Translates a CPU address into the address a bus master sees.
    fn bus_address(&self, addr: usize) -> u32 {
        addr as u32
    }
}

pub const ENV_KEY_LEN: usize = 32;
pub const ENV_VALUE_LEN: usize = 128;

pub type EnvKey = heapless::String<ENV_KEY_LEN>;
pub type EnvValue = heapless::String<ENV_VALUE_LEN>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnvError {
    /// Key or value is longer than the store accepts.
    TooLong,
    /// The store has no room for another key.
    Full,
}

impl core::fmt::Display for EnvError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooLong => f.write_str("environment entry too long"),
            Self::Full => f.write_str("environment full"),
        }
    }
}

/// The boot firmware's key/value environment.
pub trait EnvironmentStore {
    fn get(&self, key: &str) -> Option<EnvValue>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError>;

    fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl<T: EnvironmentStore + ?Sized> EnvironmentStore for &mut T {
    fn get(&self, key: &str) -> Option<EnvValue> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        (**self).set(key, value)
    }
}
