// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the board identity EEPROM.
//!
//! The identity EEPROM holds the board serial number, build date, errata
//! level and the table of MAC addresses assigned to the board's Ethernet
//! ports, in one of two fixed binary layouts (CCID or NXID, see [`record`]),
//! protected by a CRC-32.
//!
//! [`IdentityStore`] keeps a single in-memory copy of the record. It is
//! read from the device at most once, until a failed write forces a
//! re-read; setters edit the copy and keep its checksum current; and
//! [`IdentityStore::persist`] writes it back a page at a time and reads it
//! back to check.
//!
//! At boot, board glue calls [`IdentityStore::materialize_environment`] to
//! publish the identity into the firmware environment, or, on boards that
//! shipped with an unprogrammed EEPROM,
//! [`IdentityStore::reconcile_from_environment`] to go the other way.

#![cfg_attr(not(test), no_std)]

pub mod date;
pub mod record;

use core::fmt::{self, Write};

use drv_boot_io_api::{
    ByteTransport, EnvError, EnvironmentStore, MacAddress, TransportError,
};
use embedded_hal::blocking::delay::DelayUs;
use ringbuf::*;
use zerocopy::{FromZeros, IntoBytes};

pub use date::BuildDate;
pub use record::{BoardRevision, Ccid, Nxid, RecordKind};

/// The record layout this board uses.
#[cfg(feature = "ccid")]
pub type BoardRecord = Ccid;
#[cfg(not(feature = "ccid"))]
pub type BoardRecord = Nxid;

pub type BoardIdentity<T, D> = IdentityStore<BoardRecord, T, D>;

/// Page-write granularity of the EEPROM. Writes never cross a page.
pub const PAGE_SIZE: usize = 8;

/// Worst-case write cycle time after each page write.
pub const WRITE_CYCLE_US: u32 = 5_000;

pub const SERIAL_KEY: &str = "serial#";
pub const BOARD_VERSION_KEY: &str = "board_version";
pub const PRODUCT_INFO_KEY: &str = "product_info";

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Which step of [`IdentityStore::persist`] went wrong.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteFault {
    /// A page write failed.
    Write { offset: u32, err: TransportError },
    /// Reading the record back failed.
    Readback(TransportError),
    /// The record read back differs from what was written, starting here.
    Mismatch { offset: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IdentityError {
    /// Reading the EEPROM failed.
    Transport(TransportError),
    /// The in-memory record has no valid tag; read it or initialize it
    /// first.
    NotInitialized,
    /// The record's tag is wrong; carries the four raw bytes.
    BadTag([u8; 4]),
    CrcMismatch { computed: u32, stored: u32 },
    /// Programming failed; the cached record must be read again.
    WriteVerification(WriteFault),
    InvalidArgument,
    Environment(EnvError),
}

impl From<TransportError> for IdentityError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EnvError> for IdentityError {
    fn from(e: EnvError) -> Self {
        Self::Environment(e)
    }
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "read failed: {e}"),
            Self::NotInitialized => f.write_str(
                "please read the EEPROM and/or set the ID first",
            ),
            Self::BadTag(id) => write!(
                f,
                "invalid ID ({:02x} {:02x} {:02x} {:02x})",
                id[0], id[1], id[2], id[3]
            ),
            Self::CrcMismatch { computed, stored } => {
                write!(f, "CRC mismatch ({computed:08x} != {stored:08x})")
            }
            Self::WriteVerification(WriteFault::Write { offset, err }) => {
                write!(f, "programming failed at {offset:#04x}: {err}")
            }
            Self::WriteVerification(WriteFault::Readback(err)) => {
                write!(f, "programming failed: readback: {err}")
            }
            Self::WriteVerification(WriteFault::Mismatch { offset }) => {
                write!(f, "programming failed: mismatch at {offset:#04x}")
            }
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::Environment(e) => write!(f, "{e}"),
        }
    }
}

/// Result of checking a record's checksum.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// `expected` is what the contents hash to, `actual` what is stored.
    Invalid { expected: u32, actual: u32 },
}

/// What [`IdentityStore::materialize_environment`] found.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Materialized {
    pub tag: [u8; 4],
    /// Version as read from the device, before any in-memory upgrade.
    pub version: Option<u32>,
    /// Number of `ethaddr`/`eth<N>addr` variables set.
    pub macs_exported: usize,
}

impl fmt::Display for Materialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(c_str(&self.tag))?;
        if let Some(v) = self.version {
            write!(f, " v{v}")?;
        }
        Ok(())
    }
}

/// What [`IdentityStore::reconcile_from_environment`] did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// The EEPROM already had an identity; nothing was touched.
    AlreadyValid,
    /// A fresh record was built from the environment and programmed.
    Programmed,
}

/// Environment variables a blank EEPROM is rebuilt from.
///
/// Slot 0 always comes from `ethaddr`. Slots `1..=secondary` come from the
/// device-specific `<prefix>addr`, `<prefix>1addr`, ... and fall back to
/// `eth1addr`, `eth2addr`, ...
#[derive(Copy, Clone, Debug)]
pub struct ReconcileSources {
    pub prefix: &'static str,
    pub secondary: usize,
}

impl ReconcileSources {
    /// The three PFE ports on S32G boards.
    pub const PFE: Self = Self {
        prefix: "pfe",
        secondary: 3,
    };
}

impl Default for ReconcileSources {
    fn default() -> Self {
        Self::PFE
    }
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Read,
    ReadFailed(TransportError),
    BadTag([u8; 4]),
    CrcMismatch { computed: u32, stored: u32 },
    LegacyUpgrade,
    Exported { slot: u8 },
    ProgramFailed(WriteFault),
    Programmed,
    Reconciling,
}

ringbuf!(Trace, 16, Trace::None);

/// The cached identity record and the device behind it.
pub struct IdentityStore<K: RecordKind, T: ByteTransport, D: DelayUs<u32>> {
    transport: T,
    delay: D,
    record: K,
    has_been_read: bool,
}

impl<K: RecordKind, T: ByteTransport, D: DelayUs<u32>> IdentityStore<K, T, D> {
    pub fn new(transport: T, delay: D) -> Self {
        Self {
            transport,
            delay,
            record: K::new_zeroed(),
            has_been_read: false,
        }
    }

    pub fn record(&self) -> &K {
        &self.record
    }

    pub fn has_been_read(&self) -> bool {
        self.has_been_read
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Loads the record from the EEPROM, unless that already happened.
    ///
    /// Fields that read as erased (`0xFF` in their first byte) are
    /// normalized to empty strings. The checksum is not checked here.
    pub fn read(&mut self) -> Result<(), IdentityError> {
        if self.has_been_read {
            return Ok(());
        }

        if let Err(e) = self.transport.read(0, self.record.as_mut_bytes()) {
            ringbuf_entry!(Trace::ReadFailed(e));
            return Err(e.into());
        }

        clear_if_erased(self.record.serial_mut());
        clear_if_erased(self.record.errata_mut());
        if let Some(f) = self.record.board_version_mut() {
            clear_if_erased(f);
        }
        if let Some(f) = self.record.product_info_mut() {
            clear_if_erased(f);
        }

        ringbuf_entry!(Trace::Read);
        self.has_been_read = true;
        Ok(())
    }

    /// Checks the trailing checksum of the in-memory record.
    pub fn validate(&self) -> Validation {
        let expected = self.compute_crc();
        let actual = self.record.stored_crc();
        if expected == actual {
            Validation::Valid
        } else {
            Validation::Invalid { expected, actual }
        }
    }

    /// All four tag bytes must match.
    pub fn is_tag_valid(&self) -> bool {
        self.record.tag() == K::TAG
    }

    /// Stamps the tag (and current version) onto the record. Nothing else
    /// is cleared.
    pub fn init_tag(&mut self) {
        self.stamp_tag();
        self.update_crc();
    }

    pub fn set_serial(&mut self, serial: &str) -> Result<(), IdentityError> {
        self.require_tag()?;
        copy_c_str(self.record.serial_mut(), serial);
        self.update_crc();
        Ok(())
    }

    pub fn set_errata(&mut self, errata: &str) -> Result<(), IdentityError> {
        self.require_tag()?;
        let field = self.record.errata_mut();
        field.fill(0);
        let n = errata.len().min(K::ERRATA_MAX);
        field[..n].copy_from_slice(&errata.as_bytes()[..n]);
        self.update_crc();
        Ok(())
    }

    /// Sets the build date from `YYMMDDhhmmss`.
    pub fn set_date(&mut self, date: &str) -> Result<(), IdentityError> {
        self.require_tag()?;
        let date =
            BuildDate::parse(date).ok_or(IdentityError::InvalidArgument)?;
        *self.record.date_mut() = date.0;
        self.update_crc();
        Ok(())
    }

    pub fn set_board_version(
        &mut self,
        version: &str,
    ) -> Result<(), IdentityError> {
        self.require_tag()?;
        let field = self
            .record
            .board_version_mut()
            .ok_or(IdentityError::InvalidArgument)?;
        copy_c_str(field, version);
        self.update_crc();
        Ok(())
    }

    pub fn set_product_info(
        &mut self,
        info: &str,
    ) -> Result<(), IdentityError> {
        self.require_tag()?;
        let field = self
            .record
            .product_info_mut()
            .ok_or(IdentityError::InvalidArgument)?;
        copy_c_str(field, info);
        self.update_crc();
        Ok(())
    }

    pub fn set_mac_table_size(
        &mut self,
        count: u8,
    ) -> Result<(), IdentityError> {
        self.require_tag()?;
        self.record.set_mac_count(count);
        self.update_crc();
        Ok(())
    }

    /// Sets MAC table entry `index` from `XX:XX:XX:XX:XX:XX`.
    pub fn set_mac(
        &mut self,
        index: usize,
        mac: &str,
    ) -> Result<(), IdentityError> {
        self.require_tag()?;
        if index >= K::MAX_PORTS {
            return Err(IdentityError::InvalidArgument);
        }
        let mac =
            MacAddress::parse(mac).ok_or(IdentityError::InvalidArgument)?;
        self.record.macs_mut()[index] = mac.0;
        self.update_crc();
        Ok(())
    }

    /// Writes the record back to the EEPROM and verifies it.
    ///
    /// On failure the cached copy is marked unread, so the next `read()`
    /// goes back to the device.
    pub fn persist(&mut self) -> Result<(), IdentityError> {
        self.require_tag()?;
        match self.program() {
            Ok(()) => {
                ringbuf_entry!(Trace::Programmed);
                Ok(())
            }
            Err(fault) => {
                ringbuf_entry!(Trace::ProgramFailed(fault));
                self.has_been_read = false;
                Err(IdentityError::WriteVerification(fault))
            }
        }
    }

    fn program(&mut self) -> Result<(), WriteFault> {
        self.record.fill_reserved();
        self.update_crc();

        let bytes = self.record.as_bytes();
        for (i, page) in bytes.chunks(PAGE_SIZE).enumerate() {
            let offset = (i * PAGE_SIZE) as u32;
            self.transport
                .write(offset, page)
                .map_err(|err| WriteFault::Write { offset, err })?;
            self.delay.delay_us(WRITE_CYCLE_US);
        }

        let mut readback = K::new_zeroed();
        self.transport
            .read(0, readback.as_mut_bytes())
            .map_err(WriteFault::Readback)?;
        let first_bad = bytes
            .iter()
            .zip(readback.as_bytes())
            .position(|(a, b)| a != b);
        match first_bad {
            Some(offset) => Err(WriteFault::Mismatch {
                offset: offset as u32,
            }),
            None => Ok(()),
        }
    }

    /// Prints the record the way technicians are used to seeing it.
    pub fn show(&self, out: &mut dyn Write) -> fmt::Result {
        let r = &self.record;
        out.write_str("ID: ")?;
        out.write_str(c_str(&r.tag()))?;
        if let Some(v) = r.version() {
            write!(out, " v{v}")?;
        }
        writeln!(out)?;
        writeln!(out, "SN: {}", c_str(r.serial()))?;
        out.write_str("Errata: ")?;
        r.write_errata(out)?;
        writeln!(out)?;
        writeln!(out, "Build date: {}", BuildDate(r.date()))?;
        if let Some(f) = r.board_version() {
            writeln!(out, "Board version: {}", c_str(f))?;
        }
        if let Some(f) = r.product_info() {
            writeln!(out, "Product information: {}", c_str(f))?;
        }
        for (i, mac) in r.macs().iter().take(self.mac_slots()).enumerate() {
            writeln!(out, "Eth{i}: {:x}", MacAddress(*mac))?;
        }
        match self.validate() {
            Validation::Valid => writeln!(out, "CRC: {:08x}", r.stored_crc()),
            Validation::Invalid { expected, actual } => {
                writeln!(out, "CRC: {actual:08x} (should be {expected:08x})")
            }
        }
    }

    /// Publishes the identity into the firmware environment.
    ///
    /// Variables that are already set are left alone, so operators can
    /// override the EEPROM from the saved environment. A record in the
    /// legacy layout is upgraded in memory (not on the device) once its
    /// contents have been exported.
    pub fn materialize_environment<E: EnvironmentStore>(
        &mut self,
        env: &mut E,
    ) -> Result<Materialized, IdentityError> {
        self.read()?;

        let tag = self.record.tag();
        if !self.is_tag_valid() {
            ringbuf_entry!(Trace::BadTag(tag));
            return Err(IdentityError::BadTag(tag));
        }

        let version = self.record.version();
        let legacy = K::LEGACY_CRC.filter(|l| version == Some(l.version));
        let crc_offset = legacy.map_or(K::SIZE - 4, |l| l.offset);

        let bytes = self.record.as_bytes();
        let computed = CRC32.checksum(&bytes[..crc_offset]);
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&bytes[crc_offset..crc_offset + 4]);
        let stored = u32::from_be_bytes(stored);
        if computed != stored {
            ringbuf_entry!(Trace::CrcMismatch { computed, stored });
            return Err(IdentityError::CrcMismatch { computed, stored });
        }

        export_str(env, SERIAL_KEY, self.record.serial())?;
        if let Some(f) = self.record.board_version() {
            export_str(env, BOARD_VERSION_KEY, f)?;
        }
        if let Some(f) = self.record.product_info() {
            export_str(env, PRODUCT_INFO_KEY, f)?;
        }

        // The legacy checksum sits where a later MAC slot lives now. The
        // cached record is left as read until every export has landed.
        let aliased = legacy.map(|l| l.aliased_slot);

        let mut macs_exported = 0;
        for (i, mac) in self
            .record
            .macs()
            .iter()
            .take(self.mac_slots())
            .enumerate()
        {
            let mac = MacAddress(*mac);
            if Some(i) == aliased || mac.is_zero() || mac.is_erased() {
                continue;
            }
            let Some(key) = eth_key(i) else {
                continue;
            };
            if env.is_set(&key) {
                continue;
            }
            let mut value: heapless::String<18> = heapless::String::new();
            // 17 characters always fit.
            let _ = write!(value, "{mac}");
            env.set(&key, &value)?;
            ringbuf_entry!(Trace::Exported { slot: i as u8 });
            macs_exported += 1;
        }

        if let Some(l) = legacy {
            if let Some(current) = K::CURRENT_VERSION {
                ringbuf_entry!(Trace::LegacyUpgrade);
                let macs = self.record.macs_mut();
                if let Some(slot) = macs.get_mut(l.aliased_slot) {
                    *slot = [0xff; 6];
                }
                self.record.set_version(current);
                self.update_crc();
            }
        }

        Ok(Materialized {
            tag,
            version,
            macs_exported,
        })
    }

    /// Builds and programs a record from the environment, for boards whose
    /// EEPROM was never programmed but whose MAC addresses live in the
    /// saved environment.
    ///
    /// Does nothing if the EEPROM already carries a valid tag.
    pub fn reconcile_from_environment<E: EnvironmentStore>(
        &mut self,
        env: &E,
        sources: &ReconcileSources,
    ) -> Result<Reconciled, IdentityError> {
        self.read()?;
        if self.is_tag_valid() {
            return Ok(Reconciled::AlreadyValid);
        }
        ringbuf_entry!(Trace::Reconciling);

        self.stamp_tag();
        // MAX_PORTS is at most 16 for either layout.
        self.record.set_mac_count(K::MAX_PORTS as u8);

        let macs = self.record.macs_mut();
        if let Some(mac) = env_mac(env, eth_key(0)) {
            macs[0] = mac.0;
        }
        for i in 0..sources.secondary {
            let Some(slot) = macs.get_mut(i + 1) else {
                break;
            };
            let found = env_mac(env, indexed_key(sources.prefix, i))
                .or_else(|| env_mac(env, eth_key(i + 1)));
            if let Some(mac) = found {
                *slot = mac.0;
            }
        }

        if let Some(v) = env.get(SERIAL_KEY) {
            copy_c_str(self.record.serial_mut(), &v);
        }
        if let Some(v) = env.get(BOARD_VERSION_KEY) {
            if let Some(f) = self.record.board_version_mut() {
                copy_c_str(f, &v);
            }
        }
        if let Some(v) = env.get(PRODUCT_INFO_KEY) {
            if let Some(f) = self.record.product_info_mut() {
                copy_c_str(f, &v);
            }
        }

        self.update_crc();
        self.persist()?;
        Ok(Reconciled::Programmed)
    }

    fn stamp_tag(&mut self) {
        *self.record.tag_mut() = K::TAG;
        if let Some(v) = K::CURRENT_VERSION {
            self.record.set_version(v);
        }
    }

    fn require_tag(&self) -> Result<(), IdentityError> {
        if self.is_tag_valid() {
            Ok(())
        } else {
            Err(IdentityError::NotInitialized)
        }
    }

    fn mac_slots(&self) -> usize {
        usize::from(self.record.mac_count()).min(K::MAX_PORTS)
    }

    fn compute_crc(&self) -> u32 {
        CRC32.checksum(&self.record.as_bytes()[..K::SIZE - 4])
    }

    fn update_crc(&mut self) {
        let crc = self.compute_crc();
        self.record.set_stored_crc(crc);
    }
}

/// The string stored in a NUL-padded field. Bytes after the first NUL are
/// ignored; a field that isn't UTF-8 shows up to its first bad byte.
pub fn c_str(field: &[u8]) -> &str {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let field = &field[..end];
    match core::str::from_utf8(field) {
        Ok(s) => s,
        Err(e) => core::str::from_utf8(&field[..e.valid_up_to()]).unwrap_or(""),
    }
}

/// Zero-fills `field`, then copies in as much of `s` as fits while keeping
/// a terminating NUL.
fn copy_c_str(field: &mut [u8], s: &str) {
    field.fill(0);
    let n = s.len().min(field.len().saturating_sub(1));
    field[..n].copy_from_slice(&s.as_bytes()[..n]);
}

fn clear_if_erased(field: &mut [u8]) {
    if let Some(first) = field.first_mut() {
        if *first == 0xff {
            *first = 0;
        }
    }
}

fn export_str<E: EnvironmentStore>(
    env: &mut E,
    key: &str,
    field: &[u8],
) -> Result<(), EnvError> {
    let s = c_str(field);
    if s.is_empty() || env.is_set(key) {
        return Ok(());
    }
    env.set(key, s)
}

type Key = heapless::String<16>;

/// `ethaddr` for the first port, `eth<N>addr` for the rest.
fn eth_key(index: usize) -> Option<Key> {
    indexed_key("eth", index)
}

/// `<prefix>addr`, `<prefix>1addr`, ... for a zero-based interface index,
/// or `None` if the name doesn't fit in a key.
fn indexed_key(prefix: &str, index: usize) -> Option<Key> {
    let mut k = Key::new();
    let fits = if index == 0 {
        write!(k, "{prefix}addr")
    } else {
        write!(k, "{prefix}{index}addr")
    };
    fits.ok().map(|()| k)
}

fn env_mac<E: EnvironmentStore>(
    env: &E,
    key: Option<Key>,
) -> Option<MacAddress> {
    let v = env.get(&key?)?;
    MacAddress::parse(&v).filter(MacAddress::is_valid_ethaddr)
}

#[cfg(test)]
mod tests;
