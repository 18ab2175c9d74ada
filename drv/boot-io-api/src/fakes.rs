// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory stand-ins for the boot firmware collaborators.

use core::cell::Cell;

use crate::{
    ByteTransport, CacheControl, EnvError, EnvKey, EnvValue, EnvironmentStore,
    TransportError,
};

/// An EEPROM backed by an array, with fault injection.
pub struct MemTransport<const N: usize> {
    pub bytes: [u8; N],
    /// Number of `read` calls that reached the device.
    pub reads: usize,
    /// Number of `write` calls that reached the device.
    pub writes: usize,
    /// Fail every read with this error.
    pub read_fault: Option<TransportError>,
    /// Fail any write touching this offset.
    pub write_fault_at: Option<u32>,
    /// Silently drop writes to this offset, as a stuck cell would.
    pub stuck_at: Option<u32>,
}

impl<const N: usize> MemTransport<N> {
    pub const fn new() -> Self {
        Self::filled(0xff)
    }

    pub const fn filled(byte: u8) -> Self {
        Self {
            bytes: [byte; N],
            reads: 0,
            writes: 0,
            read_fault: None,
            write_fault_at: None,
            stuck_at: None,
        }
    }

    pub fn with_contents(contents: &[u8]) -> Self {
        let mut t = Self::new();
        t.bytes[..contents.len()].copy_from_slice(contents);
        t
    }

    fn span(
        &self,
        offset: u32,
        len: usize,
    ) -> Result<(usize, usize), TransportError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(TransportError::OutOfRange)?;
        if end > N {
            return Err(TransportError::OutOfRange);
        }
        Ok((start, end))
    }
}

impl<const N: usize> Default for MemTransport<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteTransport for MemTransport<N> {
    fn read(
        &mut self,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        self.reads += 1;
        if let Some(e) = self.read_fault {
            return Err(e);
        }
        let (start, end) = self.span(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn write(
        &mut self,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        self.writes += 1;
        let (start, end) = self.span(offset, bytes.len())?;
        if let Some(f) = self.write_fault_at {
            if (start..end).contains(&(f as usize)) {
                return Err(TransportError::Nack);
            }
        }
        for (i, &b) in bytes.iter().enumerate() {
            let at = start + i;
            if self.stuck_at != Some(at as u32) {
                self.bytes[at] = b;
            }
        }
        Ok(())
    }
}

/// An environment store backed by an index map.
///
/// `N` must be a power of two.
#[derive(Default)]
pub struct MapEnvironment<const N: usize> {
    vars: heapless::FnvIndexMap<EnvKey, EnvValue, N>,
}

impl<const N: usize> MapEnvironment<N> {
    pub fn new() -> Self {
        Self {
            vars: heapless::FnvIndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Convenience accessor for tests: `None` if unset.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.as_str())
    }
}

impl<const N: usize> EnvironmentStore for MapEnvironment<N> {
    fn get(&self, key: &str) -> Option<EnvValue> {
        let mut v = EnvValue::new();
        v.push_str(self.value(key)?).ok()?;
        Some(v)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        let mut k = EnvKey::new();
        k.push_str(key).map_err(|_| EnvError::TooLong)?;
        let mut v = EnvValue::new();
        v.push_str(value).map_err(|_| EnvError::TooLong)?;
        self.vars.insert(k, v).map_err(|_| EnvError::Full)?;
        Ok(())
    }
}

/// Cache control for a coherent platform.
pub struct NoopCache;

impl CacheControl for NoopCache {
    fn flush(&self, _addr: usize, _len: usize) {}
    fn invalidate(&self, _addr: usize, _len: usize) {}
}

/// Cache control that counts maintenance operations.
#[derive(Default)]
pub struct RecordingCache {
    pub flushes: Cell<usize>,
    pub invalidates: Cell<usize>,
    pub last_flush: Cell<Option<(usize, usize)>>,
}

impl CacheControl for RecordingCache {
    fn flush(&self, addr: usize, len: usize) {
        self.flushes.set(self.flushes.get() + 1);
        self.last_flush.set(Some((addr, len)));
    }

    fn invalidate(&self, _addr: usize, _len: usize) {
        self.invalidates.set(self.invalidates.get() + 1);
    }
}

/// A delay that returns immediately but keeps the books.
#[derive(Default)]
pub struct NoDelay {
    pub total_us: u64,
    pub calls: usize,
}

impl embedded_hal::blocking::delay::DelayUs<u32> for NoDelay {
    fn delay_us(&mut self, us: u32) {
        self.total_us += u64::from(us);
        self.calls += 1;
    }
}
