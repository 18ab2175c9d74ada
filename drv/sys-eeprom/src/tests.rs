// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use drv_boot_io_api::fakes::{MapEnvironment, MemTransport, NoDelay};
use record::{CCID_MAX_PORTS, NXID_MAX_PORTS};
use zerocopy::{FromZeros, IntoBytes};

type Store = IdentityStore<Nxid, MemTransport<256>, NoDelay>;
type Env = MapEnvironment<16>;

fn store_with(image: &[u8]) -> Store {
    IdentityStore::new(MemTransport::with_contents(image), NoDelay::default())
}

fn blank() -> Store {
    IdentityStore::new(MemTransport::new(), NoDelay::default())
}

/// A good NXID v1 image with serial `S123` and the given MAC table.
fn nxid_image(macs: &[[u8; 6]]) -> [u8; 256] {
    let mut r = Nxid::new_zeroed();
    r.id = *b"NXID";
    r.version.set(1);
    r.sn[..4].copy_from_slice(b"S123");
    r.mac_count = macs.len() as u8;
    r.mac[..macs.len()].copy_from_slice(macs);
    r.crc.set(CRC32.checksum(&r.as_bytes()[..252]));

    let mut out = [0; 256];
    out.copy_from_slice(r.as_bytes());
    out
}

fn mac(last: u8) -> [u8; 6] {
    [0x02, 0, 0, 0, 0, last]
}

#[track_caller]
fn assert_valid(s: &Store) {
    assert_eq!(s.validate(), Validation::Valid);
}

#[test]
fn crc_is_the_ieee_one() {
    assert_eq!(CRC32.checksum(b"123456789"), 0xcbf4_3926);
}

#[test]
fn read_is_idempotent() {
    let mut s = store_with(&nxid_image(&[]));
    s.read().unwrap();
    s.read().unwrap();
    assert_eq!(s.transport().reads, 1);
    assert!(s.has_been_read());
}

#[test]
fn failed_read_is_retried() {
    let mut s = store_with(&nxid_image(&[]));
    s.transport_mut().read_fault = Some(TransportError::Nack);
    assert_eq!(
        s.read(),
        Err(IdentityError::Transport(TransportError::Nack))
    );
    assert!(!s.has_been_read());

    s.transport_mut().read_fault = None;
    s.read().unwrap();
    assert_eq!(s.transport().reads, 2);
}

#[test]
fn erased_fields_read_as_empty() {
    let mut s = blank();
    s.read().unwrap();
    let r = s.record();
    assert_eq!(c_str(&r.sn), "");
    assert_eq!(c_str(&r.errata), "");
    assert_eq!(c_str(&r.board_version), "");
    assert_eq!(c_str(&r.product_info), "");
    // Only the first byte is cleared.
    assert_eq!(r.sn[1], 0xff);
    assert!(!s.is_tag_valid());
}

#[test]
fn setters_need_a_tag() {
    let mut s = blank();
    s.read().unwrap();
    assert_eq!(s.set_serial("X"), Err(IdentityError::NotInitialized));
    assert_eq!(
        s.set_mac(0, "02:00:00:00:00:01"),
        Err(IdentityError::NotInitialized)
    );
    assert_eq!(s.persist(), Err(IdentityError::NotInitialized));
    assert_eq!(s.transport().writes, 0);
}

#[test]
fn setters_keep_crc_valid() {
    let mut s = blank();
    s.read().unwrap();
    s.init_tag();
    assert!(s.is_tag_valid());
    assert_eq!(s.record().version.get(), 1);
    assert_valid(&s);

    s.set_serial("SN0001").unwrap();
    assert_valid(&s);
    s.set_errata("A1").unwrap();
    assert_valid(&s);
    s.set_date("240917083000").unwrap();
    assert_valid(&s);
    s.set_board_version("rev B").unwrap();
    assert_valid(&s);
    s.set_product_info("S32G-VNP-RDB").unwrap();
    assert_valid(&s);
    s.set_mac_table_size(4).unwrap();
    assert_valid(&s);
    s.set_mac(3, "02:00:00:00:00:03").unwrap();
    assert_valid(&s);

    let r = s.record();
    assert_eq!(r.date, [0x24, 0x09, 0x17, 0x08, 0x30, 0x00]);
    assert_eq!(r.mac_count, 4);
    assert_eq!(r.mac[3], mac(3));
}

#[test]
fn shorter_value_leaves_no_residue() {
    let mut s = store_with(&nxid_image(&[]));
    s.read().unwrap();
    s.set_serial("ABCDEF").unwrap();
    s.set_serial("XY").unwrap();
    assert_eq!(&s.record().sn, b"XY\0\0\0\0\0\0\0\0\0\0");

    s.set_errata("ABCDEFG").unwrap();
    assert_eq!(&s.record().errata, b"ABCD\0");
    s.set_errata("Z").unwrap();
    assert_eq!(&s.record().errata, b"Z\0\0\0\0");
}

#[test]
fn strings_keep_a_terminator() {
    let mut s = store_with(&nxid_image(&[]));
    s.read().unwrap();
    s.set_serial("0123456789ABCDEF").unwrap();
    assert_eq!(&s.record().sn, b"0123456789A\0");
    s.set_board_version("a board version string").unwrap();
    assert_eq!(c_str(&s.record().board_version), "a board version");
}

#[test]
fn bad_arguments_change_nothing() {
    let mut s = store_with(&nxid_image(&[]));
    s.read().unwrap();
    let before = s.record().as_bytes().to_vec();

    assert_eq!(
        s.set_mac(NXID_MAX_PORTS, "02:00:00:00:00:01"),
        Err(IdentityError::InvalidArgument)
    );
    assert_eq!(s.set_mac(0, "02:00:00"), Err(IdentityError::InvalidArgument));
    assert_eq!(s.set_date("2409"), Err(IdentityError::InvalidArgument));
    assert_eq!(
        s.set_date("24091708300x"),
        Err(IdentityError::InvalidArgument)
    );
    assert_eq!(s.record().as_bytes(), &before[..]);
}

#[test]
fn persist_pages_and_verifies() {
    let mut s = blank();
    s.read().unwrap();
    s.init_tag();
    s.set_serial("SN0001").unwrap();
    s.persist().unwrap();

    assert_eq!(s.transport().writes, 256 / PAGE_SIZE);
    assert_eq!(s.delay().total_us, 32 * u64::from(WRITE_CYCLE_US));
    assert_eq!(&s.transport().bytes[..], s.record().as_bytes());
    assert!(s.has_been_read());

    let r = s.record();
    assert_eq!(r.res_0, 0xff);
    assert_eq!(r.res_1, [0xff; 21]);
    assert_eq!(r.res_2, [0xff; 10]);
    assert_valid(&s);

    let mut again = store_with(&s.transport().bytes);
    again.read().unwrap();
    assert_eq!(again.record().as_bytes(), s.record().as_bytes());
}

#[test]
fn failed_page_write_invalidates_cache() {
    let mut s = store_with(&nxid_image(&[]));
    s.read().unwrap();
    s.transport_mut().write_fault_at = Some(20);
    assert_eq!(
        s.persist(),
        Err(IdentityError::WriteVerification(WriteFault::Write {
            offset: 16,
            err: TransportError::Nack,
        }))
    );
    assert_eq!(s.transport().writes, 3);
    assert!(!s.has_been_read());

    // The next read goes back to the device.
    s.read().unwrap();
    assert_eq!(s.transport().reads, 2);
}

#[test]
fn readback_mismatch_is_reported() {
    let mut s = blank();
    s.read().unwrap();
    s.init_tag();
    s.set_serial("SN0001").unwrap();
    s.transport_mut().stuck_at = Some(4);
    assert_eq!(
        s.persist(),
        Err(IdentityError::WriteVerification(WriteFault::Mismatch {
            offset: 4
        }))
    );
    assert!(!s.has_been_read());
}

#[test]
fn tag_needs_all_four_bytes() {
    let mut img = nxid_image(&[mac(1)]);
    img[3] = b'X';
    let mut s = store_with(&img);
    let mut env = Env::new();
    assert_eq!(
        s.materialize_environment(&mut env),
        Err(IdentityError::BadTag(*b"NXIX"))
    );
    assert!(env.is_empty());
}

#[test]
fn tag_is_checked_before_crc() {
    // Good CRC over a foreign tag.
    let mut r = Nxid::new_zeroed();
    r.id = *b"CCID";
    r.crc.set(CRC32.checksum(&r.as_bytes()[..252]));
    let mut s = store_with(r.as_bytes());
    let mut env = Env::new();
    assert_eq!(
        s.materialize_environment(&mut env),
        Err(IdentityError::BadTag(*b"CCID"))
    );

    // Right tag, bad CRC.
    let mut img = nxid_image(&[mac(1)]);
    img[255] ^= 1;
    let computed = CRC32.checksum(&img[..252]);
    let stored = u32::from_be_bytes([img[252], img[253], img[254], img[255]]);
    let mut s = store_with(&img);
    assert_eq!(
        s.materialize_environment(&mut env),
        Err(IdentityError::CrcMismatch { computed, stored })
    );
    assert!(env.is_empty());
}

#[test]
fn materialize_skips_empty_slots() {
    let slot0 = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
    let mut s = store_with(&nxid_image(&[slot0, [0; 6]]));
    let mut env = Env::new();
    let got = s.materialize_environment(&mut env).unwrap();

    assert_eq!(
        got,
        Materialized {
            tag: *b"NXID",
            version: Some(1),
            macs_exported: 1,
        }
    );
    assert_eq!(env.value("ethaddr"), Some("AA:BB:CC:DD:EE:01"));
    assert_eq!(env.value("eth1addr"), None);
    assert_eq!(env.value("serial#"), Some("S123"));
    // Empty strings are not exported.
    assert_eq!(env.value("board_version"), None);
    assert_eq!(env.value("product_info"), None);
}

#[test]
fn materialize_skips_erased_slots() {
    let mut s = store_with(&nxid_image(&[[0xff; 6], mac(2)]));
    let mut env = Env::new();
    let got = s.materialize_environment(&mut env).unwrap();
    assert_eq!(got.macs_exported, 1);
    assert_eq!(env.value("ethaddr"), None);
    assert_eq!(env.value("eth1addr"), Some("02:00:00:00:00:02"));
}

#[test]
fn materialize_never_clobbers() {
    let mut s = store_with(&nxid_image(&[mac(1), mac(2)]));
    let mut env = Env::new();
    env.set("ethaddr", "02:00:00:00:00:99").unwrap();
    env.set("serial#", "OPERATOR").unwrap();

    let got = s.materialize_environment(&mut env).unwrap();
    assert_eq!(got.macs_exported, 1);
    assert_eq!(env.value("ethaddr"), Some("02:00:00:00:00:99"));
    assert_eq!(env.value("eth1addr"), Some("02:00:00:00:00:02"));
    assert_eq!(env.value("serial#"), Some("OPERATOR"));
}

#[test]
fn materialize_clamps_mac_count() {
    let mut img = nxid_image(&[mac(1)]);
    // A count past the end of the table stops at the table.
    img[0x40] = 0xfe;
    for b in &mut img[0x48..0xa2] {
        *b = 0x02;
    }
    let crc = CRC32.checksum(&img[..252]);
    img[252..].copy_from_slice(&crc.to_be_bytes());

    let mut s = store_with(&img);
    let mut env = MapEnvironment::<32>::new();
    let got = s.materialize_environment(&mut env).unwrap();
    assert_eq!(got.macs_exported, NXID_MAX_PORTS);
    assert!(env.value("eth15addr").is_some());
    assert!(env.value("eth16addr").is_none());
}

#[test]
fn legacy_record_is_upgraded_in_memory() {
    let img = legacy_image();
    let mut s = store_with(&img);
    let mut env = Env::new();
    let got = s.materialize_environment(&mut env).unwrap();

    assert_eq!(got.version, Some(0));
    assert_eq!(got.to_string(), "NXID v0");
    assert_eq!(got.macs_exported, 8);
    assert_eq!(env.value("ethaddr"), Some("02:00:00:00:00:01"));
    assert_eq!(env.value("eth7addr"), Some("02:00:00:00:00:08"));
    assert_eq!(env.value("eth8addr"), None);

    let r = s.record();
    assert_eq!(r.version.get(), 1);
    assert_eq!(r.mac[8], [0xff; 6]);
    assert_valid(&s);
    // Nothing went to the device.
    assert_eq!(s.transport().writes, 0);
    assert_eq!(&s.transport().bytes[..], &img[..]);
}

/// A v0 NXID record with eight MACs, its checksum at 0x72, and junk in the
/// bytes after it that would look like a ninth MAC.
fn legacy_image() -> [u8; 256] {
    let mut r = Nxid::new_zeroed();
    r.id = *b"NXID";
    r.mac_count = 9;
    for i in 0..8 {
        r.mac[i] = mac(i as u8 + 1);
    }
    let crc = CRC32.checksum(&r.as_bytes()[..0x72]);
    let mut img = [0u8; 256];
    img.copy_from_slice(r.as_bytes());
    img[0x72..0x76].copy_from_slice(&crc.to_be_bytes());
    img[0x76] = 0x12;
    img[0x77] = 0x34;
    img
}

#[test]
fn full_environment_leaves_legacy_record_intact() {
    let img = legacy_image();
    let mut s = store_with(&img);

    let mut small = MapEnvironment::<2>::new();
    assert_eq!(
        s.materialize_environment(&mut small),
        Err(IdentityError::Environment(EnvError::Full))
    );
    // Still the v0 record as read, legacy checksum and all.
    assert_eq!(s.record().as_bytes(), &img[..]);
    assert_eq!(s.record().version.get(), 0);

    let mut env = Env::new();
    let got = s.materialize_environment(&mut env).unwrap();
    assert_eq!(got.version, Some(0));
    assert_eq!(got.macs_exported, 8);
    assert_eq!(env.value("eth8addr"), None);
    assert_eq!(s.record().version.get(), 1);
    assert_valid(&s);
}

#[test]
fn materialize_reports_read_failure() {
    let mut s = store_with(&nxid_image(&[mac(1)]));
    s.transport_mut().read_fault = Some(TransportError::NoDevice);
    let mut env = Env::new();
    assert_eq!(
        s.materialize_environment(&mut env),
        Err(IdentityError::Transport(TransportError::NoDevice))
    );
    assert!(env.is_empty());
}

#[test]
fn show_renders_record() {
    let img = nxid_image(&[[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01], [0; 6]]);
    let crc = u32::from_be_bytes([img[252], img[253], img[254], img[255]]);
    let mut s = store_with(&img);
    s.read().unwrap();

    let mut out = String::new();
    s.show(&mut out).unwrap();
    assert_eq!(
        out,
        format!(
            "ID: NXID v1\n\
             SN: S123\n\
             Errata: \n\
             Build date: 2000/00/00 00:00:00\n\
             Board version: \n\
             Product information: \n\
             Eth0: aa:bb:cc:dd:ee:01\n\
             Eth1: 00:00:00:00:00:00\n\
             CRC: {crc:08x}\n"
        )
    );
}

#[test]
fn show_flags_bad_crc() {
    let mut img = nxid_image(&[]);
    img[252..].copy_from_slice(&[0, 0, 0, 1]);
    let expected = CRC32.checksum(&img[..252]);
    let mut s = store_with(&img);
    s.read().unwrap();

    let mut out = String::new();
    s.show(&mut out).unwrap();
    assert!(
        out.ends_with(&format!("CRC: 00000001 (should be {expected:08x})\n")),
        "{out}"
    );
}

#[test]
fn reconcile_leaves_valid_eeprom_alone() {
    let mut s = store_with(&nxid_image(&[mac(1)]));
    let mut env = Env::new();
    env.set("ethaddr", "02:00:00:00:00:77").unwrap();
    assert_eq!(
        s.reconcile_from_environment(&env, &ReconcileSources::PFE),
        Ok(Reconciled::AlreadyValid)
    );
    assert_eq!(s.transport().writes, 0);
    assert_eq!(s.record().mac[0], mac(1));
}

#[test]
fn reconcile_programs_blank_eeprom() {
    let mut s = blank();
    let mut env = Env::new();
    env.set("ethaddr", "02:00:00:00:00:10").unwrap();
    env.set("pfeaddr", "02:00:00:00:00:11").unwrap();
    env.set("eth2addr", "02:00:00:00:00:12").unwrap();
    // Multicast, so not taken; there is no eth3addr to fall back on.
    env.set("pfe2addr", "01:00:5e:00:00:01").unwrap();
    env.set("serial#", "SN42").unwrap();
    env.set("board_version", "B2").unwrap();

    assert_eq!(
        s.reconcile_from_environment(&env, &ReconcileSources::default()),
        Ok(Reconciled::Programmed)
    );

    let r = s.record();
    assert_eq!(&r.id, b"NXID");
    assert_eq!(r.version.get(), 1);
    assert_eq!(usize::from(r.mac_count), NXID_MAX_PORTS);
    assert_eq!(r.mac[0], mac(0x10));
    assert_eq!(r.mac[1], mac(0x11));
    assert_eq!(r.mac[2], mac(0x12));
    assert_eq!(r.mac[3], [0xff; 6]);
    assert_eq!(c_str(&r.sn), "SN42");
    assert_eq!(c_str(&r.board_version), "B2");
    assert_eq!(&s.transport().bytes[..], r.as_bytes());

    // What was programmed reads back as a normal identity.
    let mut fresh = store_with(&s.transport().bytes);
    let mut env = Env::new();
    let got = fresh.materialize_environment(&mut env).unwrap();
    assert_eq!(got.macs_exported, 3);
    assert_eq!(env.value("eth2addr"), Some("02:00:00:00:00:12"));
    assert_eq!(env.value("serial#"), Some("SN42"));
}

#[test]
fn reconcile_skips_prefix_too_long_for_a_key() {
    // "<prefix>addr" is 17 characters; only the prefix would fit.
    let sources = ReconcileSources {
        prefix: "abcdefghijklm",
        secondary: 1,
    };
    let mut s = blank();
    let mut env = Env::new();
    env.set("abcdefghijklm", "02:00:00:00:00:21").unwrap();
    env.set("eth1addr", "02:00:00:00:00:22").unwrap();

    assert_eq!(
        s.reconcile_from_environment(&env, &sources),
        Ok(Reconciled::Programmed)
    );
    assert_eq!(s.record().mac[1], mac(0x22));
}

#[test]
fn ccid_record() {
    let mut s: IdentityStore<Ccid, MemTransport<0x76>, NoDelay> =
        IdentityStore::new(MemTransport::new(), NoDelay::default());
    s.read().unwrap();
    s.init_tag();
    s.set_errata("A").unwrap();
    assert_eq!(s.record().errata, [b'A', 0]);
    assert_eq!(
        s.set_board_version("B"),
        Err(IdentityError::InvalidArgument)
    );
    s.set_mac_table_size(1).unwrap();
    s.set_mac(0, "02:00:00:00:00:01").unwrap();
    assert_eq!(
        s.set_mac(CCID_MAX_PORTS, "02:00:00:00:00:01"),
        Err(IdentityError::InvalidArgument)
    );
    s.persist().unwrap();
    // 118 bytes in 8-byte pages, the last one short.
    assert_eq!(s.transport().writes, 15);
    assert_eq!(s.record().res_0, [0xff; 40]);

    let mut out = String::new();
    s.show(&mut out).unwrap();
    assert!(out.starts_with("ID: CCID\nSN: \nErrata: A.\n"), "{out}");
    assert!(out.contains("Eth0: 02:00:00:00:00:01\n"), "{out}");
    assert!(!out.contains("Board version"), "{out}");

    let mut env = Env::new();
    let got = s.materialize_environment(&mut env).unwrap();
    assert_eq!(got.version, None);
    assert_eq!(got.to_string(), "CCID");
    assert_eq!(env.value("ethaddr"), Some("02:00:00:00:00:01"));
}

#[test]
fn error_messages() {
    assert_eq!(
        IdentityError::BadTag(*b"NXIX").to_string(),
        "invalid ID (4e 58 49 58)"
    );
    assert_eq!(
        IdentityError::CrcMismatch {
            computed: 0x1234,
            stored: 0xabcd_0001
        }
        .to_string(),
        "CRC mismatch (00001234 != abcd0001)"
    );
}
