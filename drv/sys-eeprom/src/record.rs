// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On-EEPROM layouts of the identity record.
//!
//! Both layouts are bit-for-bit what deployed boards already carry (see
//! Freescale application note AN3638). All multi-byte integers are
//! big-endian.

use core::fmt;
use core::mem::offset_of;

use drv_boot_io_api::{ByteTransport, TransportError};
use static_assertions::const_assert_eq;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Where a legacy revision of a layout keeps its checksum.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LegacyCrc {
    /// Record version that uses this placement.
    pub version: u32,
    /// Byte offset of the checksum; it covers everything before it.
    pub offset: usize,
    /// MAC table slot that overlaps the checksum in the current layout.
    pub aliased_slot: usize,
}

/// A binary identity record layout.
///
/// Implementors are plain `#[repr(C)]` byte structs; the accessors let the
/// store work on either layout without caring where the fields live.
pub trait RecordKind:
    FromBytes + IntoBytes + Immutable + KnownLayout + Copy
{
    /// The four tag bytes a valid record starts with.
    const TAG: [u8; 4];
    /// Entries in the MAC table.
    const MAX_PORTS: usize;
    /// Longest errata string that fits.
    const ERRATA_MAX: usize;
    /// Current value of the version field, for layouts that have one.
    const CURRENT_VERSION: Option<u32> = None;
    const LEGACY_CRC: Option<LegacyCrc> = None;
    const SIZE: usize = core::mem::size_of::<Self>();

    fn tag(&self) -> [u8; 4];
    fn tag_mut(&mut self) -> &mut [u8; 4];

    fn version(&self) -> Option<u32> {
        None
    }
    fn set_version(&mut self, _version: u32) {}

    fn serial(&self) -> &[u8];
    fn serial_mut(&mut self) -> &mut [u8];
    fn errata(&self) -> &[u8];
    fn errata_mut(&mut self) -> &mut [u8];
    fn date(&self) -> [u8; 6];
    fn date_mut(&mut self) -> &mut [u8; 6];

    fn board_version(&self) -> Option<&[u8]> {
        None
    }
    fn board_version_mut(&mut self) -> Option<&mut [u8]> {
        None
    }
    fn product_info(&self) -> Option<&[u8]> {
        None
    }
    fn product_info_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn mac_count(&self) -> u8;
    fn set_mac_count(&mut self, count: u8);
    fn macs(&self) -> &[[u8; 6]];
    fn macs_mut(&mut self) -> &mut [[u8; 6]];

    fn stored_crc(&self) -> u32;
    fn set_stored_crc(&mut self, crc: u32);

    /// Sets every reserved byte to `0xFF`.
    fn fill_reserved(&mut self);

    /// Renders the errata field for the console.
    fn write_errata(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        out.write_str(crate::c_str(self.errata()))
    }
}

pub const NXID_MAX_PORTS: usize = 16;

/// NXID layout, 256 bytes.
#[derive(
    Copy,
    Clone,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Unaligned,
)]
#[repr(C)]
pub struct Nxid {
    pub id: [u8; 4],
    pub sn: [u8; 12],
    pub errata: [u8; 5],
    pub date: [u8; 6],
    pub res_0: u8,
    pub version: U32<BigEndian>,
    /// Temperature calibration factors; carried, never interpreted.
    pub tempcal: [u8; 8],
    pub tempcalsys: [u8; 2],
    pub tempcalflags: u8,
    pub res_1: [u8; 21],
    pub mac_count: u8,
    pub mac_flag: u8,
    pub mac: [[u8; 6]; NXID_MAX_PORTS],
    pub board_version: [u8; 16],
    pub product_info: [u8; 64],
    pub res_2: [u8; 10],
    pub crc: U32<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<Nxid>(), 256);
const_assert_eq!(offset_of!(Nxid, errata), 0x10);
const_assert_eq!(offset_of!(Nxid, date), 0x15);
const_assert_eq!(offset_of!(Nxid, version), 0x1c);
const_assert_eq!(offset_of!(Nxid, tempcal), 0x20);
const_assert_eq!(offset_of!(Nxid, mac_count), 0x40);
const_assert_eq!(offset_of!(Nxid, mac), 0x42);
const_assert_eq!(offset_of!(Nxid, board_version), 0xa2);
const_assert_eq!(offset_of!(Nxid, product_info), 0xb2);
const_assert_eq!(offset_of!(Nxid, crc), 0xfc);

/// NXID v0 boards had eight MAC entries and the checksum right after them.
const NXID_V0_CRC: usize = 0x72;
const_assert_eq!(offset_of!(Nxid, mac) + 8 * 6, NXID_V0_CRC);

impl RecordKind for Nxid {
    const TAG: [u8; 4] = *b"NXID";
    const MAX_PORTS: usize = NXID_MAX_PORTS;
    const ERRATA_MAX: usize = 4;
    const CURRENT_VERSION: Option<u32> = Some(1);
    const LEGACY_CRC: Option<LegacyCrc> = Some(LegacyCrc {
        version: 0,
        offset: NXID_V0_CRC,
        aliased_slot: 8,
    });

    fn tag(&self) -> [u8; 4] {
        self.id
    }
    fn tag_mut(&mut self) -> &mut [u8; 4] {
        &mut self.id
    }

    fn version(&self) -> Option<u32> {
        Some(self.version.get())
    }
    fn set_version(&mut self, version: u32) {
        self.version.set(version);
    }

    fn serial(&self) -> &[u8] {
        &self.sn
    }
    fn serial_mut(&mut self) -> &mut [u8] {
        &mut self.sn
    }
    fn errata(&self) -> &[u8] {
        &self.errata
    }
    fn errata_mut(&mut self) -> &mut [u8] {
        &mut self.errata
    }
    fn date(&self) -> [u8; 6] {
        self.date
    }
    fn date_mut(&mut self) -> &mut [u8; 6] {
        &mut self.date
    }

    fn board_version(&self) -> Option<&[u8]> {
        Some(&self.board_version)
    }
    fn board_version_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.board_version)
    }
    fn product_info(&self) -> Option<&[u8]> {
        Some(&self.product_info)
    }
    fn product_info_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.product_info)
    }

    fn mac_count(&self) -> u8 {
        self.mac_count
    }
    fn set_mac_count(&mut self, count: u8) {
        self.mac_count = count;
    }
    fn macs(&self) -> &[[u8; 6]] {
        &self.mac
    }
    fn macs_mut(&mut self) -> &mut [[u8; 6]] {
        &mut self.mac
    }

    fn stored_crc(&self) -> u32 {
        self.crc.get()
    }
    fn set_stored_crc(&mut self, crc: u32) {
        self.crc.set(crc);
    }

    fn fill_reserved(&mut self) {
        self.res_0 = 0xff;
        self.res_1 = [0xff; 21];
        self.res_2 = [0xff; 10];
    }
}

pub const CCID_MAX_PORTS: usize = 8;

/// CCID layout, 118 bytes.
#[derive(
    Copy,
    Clone,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Unaligned,
)]
#[repr(C)]
pub struct Ccid {
    pub id: [u8; 4],
    /// Board revision.
    pub major: u8,
    pub minor: u8,
    pub sn: [u8; 10],
    pub errata: [u8; 2],
    pub date: [u8; 6],
    pub res_0: [u8; 40],
    pub mac_count: u8,
    pub mac_flag: u8,
    pub mac: [[u8; 6]; CCID_MAX_PORTS],
    pub crc: U32<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<Ccid>(), 0x76);
const_assert_eq!(offset_of!(Ccid, sn), 0x06);
const_assert_eq!(offset_of!(Ccid, errata), 0x10);
const_assert_eq!(offset_of!(Ccid, date), 0x12);
const_assert_eq!(offset_of!(Ccid, mac_count), 0x40);
const_assert_eq!(offset_of!(Ccid, mac), 0x42);
const_assert_eq!(offset_of!(Ccid, crc), 0x72);

impl RecordKind for Ccid {
    const TAG: [u8; 4] = *b"CCID";
    const MAX_PORTS: usize = CCID_MAX_PORTS;
    const ERRATA_MAX: usize = 2;

    fn tag(&self) -> [u8; 4] {
        self.id
    }
    fn tag_mut(&mut self) -> &mut [u8; 4] {
        &mut self.id
    }

    fn serial(&self) -> &[u8] {
        &self.sn
    }
    fn serial_mut(&mut self) -> &mut [u8] {
        &mut self.sn
    }
    fn errata(&self) -> &[u8] {
        &self.errata
    }
    fn errata_mut(&mut self) -> &mut [u8] {
        &mut self.errata
    }
    fn date(&self) -> [u8; 6] {
        self.date
    }
    fn date_mut(&mut self) -> &mut [u8; 6] {
        &mut self.date
    }

    fn mac_count(&self) -> u8 {
        self.mac_count
    }
    fn set_mac_count(&mut self, count: u8) {
        self.mac_count = count;
    }
    fn macs(&self) -> &[[u8; 6]] {
        &self.mac
    }
    fn macs_mut(&mut self) -> &mut [[u8; 6]] {
        &mut self.mac
    }

    fn stored_crc(&self) -> u32 {
        self.crc.get()
    }
    fn set_stored_crc(&mut self, crc: u32) {
        self.crc.set(crc);
    }

    fn fill_reserved(&mut self) {
        self.res_0 = [0xff; 40];
    }

    /// CCID errata is two bare characters; unset ones show as `.`.
    fn write_errata(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for &b in &self.errata {
            out.write_char(if b == 0 { '.' } else { char::from(b) })?;
        }
        Ok(())
    }
}

/// Board revision from the head of a CCID EEPROM.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardRevision {
    pub major: u8,
    pub minor: u8,
}

impl Ccid {
    /// Reads just the tag and revision bytes, bypassing any cached record.
    ///
    /// This is meant for early boot, before an `IdentityStore` exists.
    /// Anything that isn't a CCID EEPROM, or one whose revision was never
    /// programmed, reads as revision 0.0.
    pub fn read_board_revision<T: ByteTransport>(
        transport: &mut T,
    ) -> Result<BoardRevision, TransportError> {
        let mut head = [0u8; 6];
        transport.read(0, &mut head)?;
        let rev = BoardRevision {
            major: head[4],
            minor: head[5],
        };
        if head[..4] != Self::TAG || (rev.major == 0xff && rev.minor == 0xff) {
            return Ok(BoardRevision::default());
        }
        Ok(rev)
    }
}

impl fmt::Display for BoardRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_boot_io_api::fakes::MemTransport;

    #[test]
    fn board_revision() {
        let mut t = MemTransport::<0x76>::with_contents(b"CCID\x02\x01");
        let rev = Ccid::read_board_revision(&mut t).unwrap();
        assert_eq!(rev, BoardRevision { major: 2, minor: 1 });
        assert_eq!(rev.to_string(), "2.1");
    }

    #[test]
    fn board_revision_defaults() {
        let mut t = MemTransport::<0x76>::with_contents(b"CCID\xff\xff");
        assert_eq!(
            Ccid::read_board_revision(&mut t).unwrap(),
            BoardRevision::default()
        );

        let mut t = MemTransport::<0x76>::with_contents(b"NXID\x02\x01");
        assert_eq!(
            Ccid::read_board_revision(&mut t).unwrap(),
            BoardRevision::default()
        );
    }

    #[test]
    fn nxid_v0_crc_overlaps_slot_8() {
        let legacy = Nxid::LEGACY_CRC.unwrap();
        assert_eq!(
            offset_of!(Nxid, mac) + legacy.aliased_slot * 6,
            legacy.offset
        );
    }
}
