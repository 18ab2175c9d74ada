// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_boot_io_api::fakes::{MemTransport, NoDelay};
use drv_boot_io_api::MacAddress;
use drv_sys_eeprom::{IdentityError, IdentityStore, Nxid, Validation};
use proptest::prelude::*;
use zerocopy::IntoBytes;

type Store = IdentityStore<Nxid, MemTransport<256>, NoDelay>;

fn fresh_store() -> Store {
    let mut store = IdentityStore::new(MemTransport::new(), NoDelay::default());
    store.read().unwrap();
    store.init_tag();
    store
}

#[derive(Clone, Debug)]
enum Op {
    Serial(String),
    Errata(String),
    Date(String),
    BoardVersion(String),
    ProductInfo(String),
    MacCount(u8),
    Mac(usize, [u8; 6]),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[ -~]{0,20}".prop_map(Op::Serial),
        "[A-Z0-9]{0,8}".prop_map(Op::Errata),
        "[0-9a-fA-Fx]{10,13}".prop_map(Op::Date),
        "[ -~]{0,24}".prop_map(Op::BoardVersion),
        "[ -~]{0,80}".prop_map(Op::ProductInfo),
        any::<u8>().prop_map(Op::MacCount),
        (0usize..20, any::<[u8; 6]>()).prop_map(|(i, m)| Op::Mac(i, m)),
    ]
}

fn apply(store: &mut Store, op: &Op) -> Result<(), IdentityError> {
    match op {
        Op::Serial(s) => store.set_serial(s),
        Op::Errata(s) => store.set_errata(s),
        Op::Date(s) => store.set_date(s),
        Op::BoardVersion(s) => store.set_board_version(s),
        Op::ProductInfo(s) => store.set_product_info(s),
        Op::MacCount(n) => store.set_mac_table_size(*n),
        Op::Mac(i, m) => store.set_mac(*i, &MacAddress(*m).to_string()),
    }
}

proptest! {
    #[test]
    fn persisted_record_reads_back(
        serial in "[A-Z0-9]{0,11}",
        errata in "[A-Z0-9]{0,4}",
        date in "[0-9]{12}",
        board_version in "[ -~]{0,15}",
        product_info in "[ -~]{0,63}",
        mac_count in 0u8..=16,
        macs in proptest::collection::vec(any::<[u8; 6]>(), 16),
    ) {
        let mut store = fresh_store();
        store.set_serial(&serial).unwrap();
        store.set_errata(&errata).unwrap();
        store.set_date(&date).unwrap();
        store.set_board_version(&board_version).unwrap();
        store.set_product_info(&product_info).unwrap();
        store.set_mac_table_size(mac_count).unwrap();
        for (i, m) in macs.iter().enumerate() {
            store.set_mac(i, &MacAddress(*m).to_string()).unwrap();
        }
        store.persist().unwrap();

        let image = store.transport().bytes;
        let mut reread: Store = IdentityStore::new(
            MemTransport::with_contents(&image),
            NoDelay::default(),
        );
        reread.read().unwrap();
        prop_assert_eq!(reread.record().as_bytes(), store.record().as_bytes());
        prop_assert_eq!(reread.validate(), Validation::Valid);
    }

    #[test]
    fn mutations_keep_checksum(ops in proptest::collection::vec(op(), 1..24)) {
        let mut store = fresh_store();
        for op in &ops {
            let before = store.record().as_bytes().to_vec();
            match apply(&mut store, op) {
                Ok(()) => {}
                Err(IdentityError::InvalidArgument) => {
                    prop_assert_eq!(store.record().as_bytes(), &before[..]);
                }
                Err(e) => {
                    return Err(TestCaseError::fail(format!(
                        "{op:?} failed: {e}"
                    )));
                }
            }
            prop_assert_eq!(store.validate(), Validation::Valid);
        }
    }
}
