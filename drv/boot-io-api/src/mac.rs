// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// A 48-bit Ethernet address.
///
/// `Display` renders the environment form (`AA:BB:CC:DD:EE:FF`); `{:x}`
/// renders the lowercase console form.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const ZERO: Self = Self([0; 6]);

    /// Parses `XX:XX:XX:XX:XX:XX`, where each group is one or two hex
    /// digits.
    pub fn parse(s: &str) -> Option<Self> {
        let mut out = [0u8; 6];
        let mut groups = s.split(':');
        for byte in out.iter_mut() {
            let g = groups.next()?;
            if g.is_empty()
                || g.len() > 2
                || !g.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return None;
            }
            *byte = u8::from_str_radix(g, 16).ok()?;
        }
        if groups.next().is_some() {
            return None;
        }
        Some(Self(out))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// All-ones is what an erased EEPROM slot reads back as.
    pub fn is_erased(&self) -> bool {
        self.0 == [0xff; 6]
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 1 != 0
    }

    /// Nonzero unicast: something a NIC may actually use.
    pub fn is_valid_ethaddr(&self) -> bool {
        !self.is_zero() && !self.is_multicast()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::LowerHex for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_short_groups() {
        assert_eq!(
            MacAddress::parse("0:1b:C3:4:ff:10"),
            Some(MacAddress([0x00, 0x1b, 0xc3, 0x04, 0xff, 0x10]))
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        for s in [
            "",
            "00:11:22:33:44",
            "00:11:22:33:44:55:66",
            "00:11:22:33:44:555",
            "00:11:22::44:55",
            "00-11-22-33-44-55",
            "0g:11:22:33:44:55",
            "+1:11:22:33:44:55",
        ] {
            assert_eq!(MacAddress::parse(s), None, "{s:?}");
        }
    }

    #[test]
    fn formats() {
        let m = MacAddress([0xaa, 0xbb, 0xcc, 0x0d, 0xee, 0x01]);
        assert_eq!(format!("{m}"), "AA:BB:CC:0D:EE:01");
        assert_eq!(format!("{m:x}"), "aa:bb:cc:0d:ee:01");
    }

    #[test]
    fn validity() {
        assert!(!MacAddress::ZERO.is_valid_ethaddr());
        assert!(!MacAddress([0x01, 0, 0, 0, 0, 1]).is_valid_ethaddr());
        assert!(!MacAddress([0xff; 6]).is_valid_ethaddr());
        assert!(MacAddress([0x02, 0, 0, 0, 0, 1]).is_valid_ethaddr());
    }
}
