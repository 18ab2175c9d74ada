// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build date, stored as six BCD bytes: `YY MM DD hh mm ss`.
//!
//! Bit 7 of the hours byte is a PM flag. Nothing here checks that the digits
//! form a real calendar date; the field is only ever displayed.

use core::fmt;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildDate(pub [u8; 6]);

const PM: u8 = 0x80;

impl BuildDate {
    /// Parses `YYMMDDhhmmss`. Each pair of characters becomes one byte, so
    /// any hex digit is accepted, as the field has always allowed.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.as_bytes();
        if s.len() != 12 {
            return None;
        }
        let mut out = [0u8; 6];
        for (byte, pair) in out.iter_mut().zip(s.chunks_exact(2)) {
            *byte = (nibble(pair[0])? << 4) | nibble(pair[1])?;
        }
        Some(Self(out))
    }

    pub fn is_pm(&self) -> bool {
        self.0[3] & PM != 0
    }
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for BuildDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.0;
        write!(
            f,
            "20{:02x}/{:02x}/{:02x} {:02x}:{:02x}:{:02x}",
            d[0],
            d[1],
            d[2],
            d[3] & !PM,
            d[4],
            d[5]
        )?;
        if self.is_pm() {
            f.write_str(" PM")?;
        }
        Ok(())
    }
}
