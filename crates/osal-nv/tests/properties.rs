//! Property-based tests (P1-P7) driving arbitrary operation sequences and,
//! for the crash properties, sweeping a `CrashPoint` across every call a
//! single operation issues.

mod support;

use flash_sim::{CrashPoint, SimulatedFlash, SimulatedFlashBuilder};
use osal_nv::codec::{ByteSumChecksum, Checksum};
use osal_nv::NvId;
use proptest::prelude::*;

use support::{mount, page_header, scan_items, TestFlash, PAGE_COUNT};

fn id(raw: u16) -> NvId {
    NvId::new(raw).unwrap()
}

fn payload_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    (1usize..=max_len).prop_flat_map(|len| prop::collection::vec(any::<u8>(), len))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// P5: round-trip.
    #[test]
    fn p5_round_trip(payload in payload_strategy(48)) {
        let mut flash: TestFlash = SimulatedFlash::blank();
        let store = mount(&mut flash);
        store.item_init(id(0x0050), payload.len() as u16, Some(&payload)).unwrap();
        let mut out = vec![0u8; payload.len()];
        store.read(id(0x0050), 0, &mut out).unwrap();
        prop_assert_eq!(out, payload);
    }

    /// P4: a write of bytes already on flash is a no-op (no flash call
    /// issued), so repeating an identical write is idempotent.
    #[test]
    fn p4_idempotent_write(payload in payload_strategy(32)) {
        let mut flash: TestFlash = SimulatedFlash::blank();
        {
            let store = mount(&mut flash);
            store.item_init(id(0x0051), payload.len() as u16, Some(&payload)).unwrap();
        }
        let calls_before = flash.calls_issued();
        {
            let store = mount(&mut flash);
            store.write(id(0x0051), 0, &payload).unwrap();
        }
        let calls_after = flash.calls_issued();
        // The remount itself always issues its one idempotent reserve
        // re-erase; a genuine rewrite would add several more on top.
        prop_assert!(calls_after - calls_before <= 1);
    }

    /// P7: every `Current` item's checksum matches its padded payload,
    /// after an arbitrary sequence of creates and updates.
    #[test]
    fn p7_checksum_validity(
        ids in prop::collection::vec(1u16..=20, 1..=6),
        payload in payload_strategy(24),
    ) {
        let mut flash: TestFlash = SimulatedFlash::blank();
        let store = mount(&mut flash);
        for raw in &ids {
            let this_id = id(0x0060 + raw);
            match store.item_init(this_id, payload.len() as u16, Some(&payload)) {
                Ok(_) => {}
                Err(_) => continue,
            }
            let tweaked: Vec<u8> = payload.iter().map(|b| b.wrapping_add(1)).collect();
            let _ = store.write(this_id, 0, &tweaked);
        }
        drop(store);

        let bytes = flash.bytes();
        for item in scan_items(bytes) {
            if item.is_tombstone() || !item.is_current() {
                continue;
            }
            let w = support::WORD_SIZE as u32;
            let padded_len = (((item.len as u32) + w - 1) / w * w) as usize;
            let base = item.page as u32 * support::PAGE_SIZE + item.offset + 8;
            let payload_bytes = &bytes[base as usize..base as usize + padded_len];
            prop_assert_eq!(ByteSumChecksum::checksum(payload_bytes), item.chk);
        }
    }

    /// P2: after recovery, no Id has two validated `Current` copies.
    #[test]
    fn p2_at_most_one_current(
        ids in prop::collection::vec(1u16..=20, 1..=8),
        payload in payload_strategy(16),
    ) {
        let mut flash: TestFlash = SimulatedFlash::blank();
        {
            let store = mount(&mut flash);
            for raw in &ids {
                let this_id = id(0x0070 + raw);
                let _ = store.item_init(this_id, payload.len() as u16, Some(&payload));
                let tweaked: Vec<u8> = payload.iter().rev().cloned().collect();
                let _ = store.write(this_id, 0, &tweaked);
            }
        }
        // Reboot through a fresh mount, exercising the recovery pass.
        let bytes = flash.bytes().to_vec();
        let mut rebooted: TestFlash = SimulatedFlash::from_bytes(bytes);
        let _store = mount(&mut rebooted);
        drop(_store);

        let items = scan_items(rebooted.bytes());
        for raw in &ids {
            let this_id = 0x0070 + raw;
            let currents: Vec<_> = items
                .iter()
                .filter(|it| it.id == this_id && !it.is_tombstone() && it.is_current())
                .collect();
            prop_assert!(currents.len() <= 1);
        }
    }

    /// P6: wear spread. `select_destination` always starts its scan at
    /// `reserve + 1`, so across many compactions the page chosen as the
    /// next reserve cycles deterministically through every page in turn;
    /// over enough rewrites the erase-count spread across pages stays
    /// small regardless of which Ids happen to be rewritten.
    #[test]
    fn p6_wear_spread(rounds in 20u16..40) {
        let mut flash: TestFlash = SimulatedFlash::blank();
        let ids: Vec<u16> = (0..6).collect();
        {
            let store = mount(&mut flash);
            for raw in &ids {
                store.item_init(id(0x0300 + raw), 48, Some(&vec![*raw as u8; 48])).unwrap();
            }
            // One continuous session: every erase seen from here on is a
            // genuine compaction, not a remount's idempotent reserve re-erase.
            for round in 0..rounds {
                let raw = ids[round as usize % ids.len()];
                let payload = vec![(round as u8).wrapping_add(raw as u8); 48];
                store.write(id(0x0300 + raw), 0, &payload).unwrap();
            }
        }

        let counts: Vec<u32> = (0..PAGE_COUNT).map(|p| flash.erase_cycles(p as usize)).collect();
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        prop_assert!(max - min <= 2, "erase-cycle spread {} across {:?} exceeds bound", max - min, counts);
    }
}

/// P1/P3: crash durability and reserve uniqueness. Sweeps a `CrashPoint`
/// across every call of one `write`, starting from a snapshot with a handful
/// of already-committed items, and checks that every other item survives
/// and exactly one reserve page exists after the simulated reboot.
#[test]
fn p1_p3_crash_sweep_over_an_update() {
    let mut flash: TestFlash = SimulatedFlash::blank();
    let history: Vec<(u16, Vec<u8>)> = (0..5).map(|n| (0x0200 + n, vec![n as u8; 6])).collect();
    {
        let store = mount(&mut flash);
        for (raw_id, payload) in &history {
            store.item_init(id(*raw_id), payload.len() as u16, Some(payload)).unwrap();
        }
    }
    let base = flash.bytes().to_vec();
    let (target_id, old_payload) = &history[2];
    let new_payload: Vec<u8> = old_payload.iter().map(|b| b.wrapping_add(0x11)).collect();

    let mut dry: TestFlash = SimulatedFlashBuilder::new().build_from(base.clone());
    {
        let store = mount(&mut dry);
        store.write(id(*target_id), 0, &new_payload).unwrap();
    }
    let total_calls = dry.calls_issued();

    let prior: Vec<&(u16, Vec<u8>)> = history.iter().filter(|(i, _)| i != target_id).collect();

    for crash_after in 0..total_calls {
        let mut injected: TestFlash = SimulatedFlashBuilder::new()
            .with_crash(CrashPoint { after_calls: crash_after, at_byte: 0 })
            .build_from(base.clone());
        {
            let store = mount(&mut injected);
            let _ = store.write(id(*target_id), 0, &new_payload);
        }

        let rebooted_bytes = injected.bytes().to_vec();
        let mut rebooted: TestFlash = SimulatedFlash::from_bytes(rebooted_bytes);
        let store = mount(&mut rebooted);

        for (raw_id, payload) in &prior {
            let mut out = vec![0u8; payload.len()];
            store
                .read(id(*raw_id), 0, &mut out)
                .unwrap_or_else(|e| panic!("id {raw_id:#06x} lost after crash at call {crash_after}: {e}"));
            assert_eq!(&out, payload);
        }

        let mut out = vec![0u8; old_payload.len()];
        store
            .read(id(*target_id), 0, &mut out)
            .unwrap_or_else(|e| panic!("target id lost after crash at call {crash_after}: {e}"));
        assert!(out == *old_payload || out == new_payload);
        drop(store);

        let reserves = (0..PAGE_COUNT)
            .filter(|&p| {
                let (active, in_use, _, _) = page_header(rebooted.bytes(), p);
                active == 0xFFFF && in_use == 0xFFFF
            })
            .count();
        assert_eq!(reserves, 1, "crash at call {crash_after} left more than one reserve page");
    }
}
