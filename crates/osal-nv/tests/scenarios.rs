//! The concrete scenarios from the design doc: a fresh mount, a create/read
//! round-trip, an in-place update whose source is tombstoned, a crash swept
//! across every call of a compaction-triggering write, a crash swept across
//! every call of an ordinary update, and the master-reset protocol.

mod support;

use flash_sim::{CrashPoint, SimulatedFlash, SimulatedFlashBuilder};
use osal_nv::{NvError, NvId};

use support::{config, find_current, mount, page_header, scan_items, TestFlash, PAGE_COUNT};

fn id(raw: u16) -> NvId {
    NvId::new(raw).unwrap()
}

fn count_reserves(bytes: &[u8]) -> usize {
    (0..PAGE_COUNT)
        .filter(|&p| {
            let (active, in_use, _, _) = page_header(bytes, p);
            active == 0xFFFF && in_use == 0xFFFF
        })
        .count()
}

#[test]
fn scenario_1_fresh_mount_has_one_reserve_and_no_items() {
    let mut flash: TestFlash = SimulatedFlash::blank();
    let store = mount(&mut flash);

    let mut out = [0u8; 4];
    assert!(matches!(store.read(id(0x0010), 0, &mut out), Err(NvError::OperFailed)));
    drop(store);

    assert_eq!(count_reserves(flash.bytes()), 1, "exactly one erased reserve page after a fresh mount");
}

#[test]
fn scenario_2_create_then_read_round_trips() {
    let mut flash: TestFlash = SimulatedFlash::blank();
    let store = mount(&mut flash);

    let payload = [0xDE, 0xAD, 0xBE, 0xEF];
    store.item_init(id(0x0010), 4, Some(&payload)).unwrap();

    let mut out = [0u8; 4];
    store.read(id(0x0010), 0, &mut out).unwrap();
    assert_eq!(out, payload);
}

#[test]
fn scenario_3_write_splices_and_tombstones_the_source() {
    let mut flash: TestFlash = SimulatedFlash::blank();
    let store = mount(&mut flash);

    store.item_init(id(0x0010), 4, Some(&[0xDE, 0xAD, 0xBE, 0xEF])).unwrap();
    store.write(id(0x0010), 2, &[0x55, 0xAA]).unwrap();

    let mut out = [0u8; 4];
    store.read(id(0x0010), 0, &mut out).unwrap();
    assert_eq!(out, [0xDE, 0xAD, 0x55, 0xAA]);
    drop(store);

    let bytes = flash.bytes().to_vec();
    let items = scan_items(&bytes);
    let tombstones: Vec<_> = items.iter().filter(|it| it.is_tombstone()).collect();
    assert_eq!(tombstones.len(), 1, "exactly one tombstoned source item");
    let current = find_current(&items, 0x0010).expect("one current copy");
    assert_eq!(current.len, 4);
}

/// One scripted mutation applied against a store, replayed identically from
/// the same starting snapshot for each candidate crash point.
enum Op {
    Create(u16, Vec<u8>),
    Update(u16, u16, Vec<u8>),
}

fn apply(store: &support::TestStore<'_>, op: &Op) -> Result<(), NvError<flash_sim::SimFlashError>> {
    match op {
        Op::Create(raw_id, payload) => store
            .item_init(id(*raw_id), payload.len() as u16, Some(payload))
            .map(|_| ()),
        Op::Update(raw_id, at, payload) => store.write(id(*raw_id), *at, payload),
    }
}

/// Sweeps a `CrashPoint` across every call the given op issues when replayed
/// from `base`, verifying after each simulated reboot that every
/// already-committed item in `history` reads back unchanged and exactly one
/// reserve page exists.
fn sweep_crash_points(base: &[u8], op: &Op, history: &[(u16, Vec<u8>)]) {
    let mut dry: TestFlash = SimulatedFlashBuilder::new().build_from(base.to_vec());
    {
        let store = mount(&mut dry);
        apply(&store, op).expect("uncrashed replay of the triggering op must succeed");
    }
    let total_calls = dry.calls_issued();
    assert!(total_calls > 0, "the triggering op must touch flash at least once");

    for crash_after in 0..total_calls {
        for at_byte in [0u32, 1u32] {
            let mut injected: TestFlash = SimulatedFlashBuilder::new()
                .with_crash(CrashPoint { after_calls: crash_after, at_byte })
                .build_from(base.to_vec());
            {
                let store = mount(&mut injected);
                let _ = apply(&store, op);
            }
            assert!(injected.has_crashed(), "crash point {crash_after}/{at_byte} should have fired");

            let rebooted_bytes = injected.bytes().to_vec();
            let mut rebooted: TestFlash = SimulatedFlash::from_bytes(rebooted_bytes);
            let store = mount(&mut rebooted);

            for (raw_id, payload) in history {
                let mut out = vec![0u8; payload.len()];
                store.read(id(*raw_id), 0, &mut out).unwrap_or_else(|e| {
                    panic!("id {raw_id:#06x} must still read back after a crash at call {crash_after}: {e}")
                });
                assert_eq!(
                    &out, payload,
                    "id {raw_id:#06x} must read back unchanged after a crash at call {crash_after}"
                );
            }
            drop(store);
            assert_eq!(
                count_reserves(rebooted.bytes()),
                1,
                "exactly one erased reserve page must exist after recovering from a crash at call {crash_after}"
            );
        }
    }
}

#[test]
fn scenario_4_crash_during_a_compaction_triggering_write_preserves_every_prior_item() {
    let mut flash: TestFlash = SimulatedFlash::blank();
    let mut history: Vec<(u16, Vec<u8>)> = Vec::new();
    let mut triggering: Option<(Vec<u8>, Op)> = None;

    // Seed a handful of items, then repeatedly rewrite them with large-ish
    // payloads (64 bytes: ~7 items per 512-byte page) so tombstones pile up
    // and some page eventually needs reclaiming before the next rewrite fits.
    for n in 0..12u16 {
        history.push((0x0100 + n, vec![n as u8; 64]));
    }
    {
        let store = mount(&mut flash);
        for (raw_id, payload) in &history {
            store.item_init(id(*raw_id), payload.len() as u16, Some(payload)).unwrap();
        }
    }

    'outer: for round in 0..20u16 {
        for (slot, (raw_id, payload)) in history.clone().iter().enumerate() {
            let new_payload: Vec<u8> = payload.iter().map(|b| b.wrapping_add(round as u8 + 1)).collect();
            let pre_bytes = flash.bytes().to_vec();
            let erases_before: u32 = (0..PAGE_COUNT).map(|p| flash.erase_cycles(p as usize)).sum();

            {
                let store = mount(&mut flash);
                store.write(id(*raw_id), 0, &new_payload).unwrap();
            }

            let erases_after: u32 = (0..PAGE_COUNT).map(|p| flash.erase_cycles(p as usize)).sum();
            history[slot].1 = new_payload.clone();

            // A bare reboot always re-erases the current reserve exactly
            // once; any extra erase in this delta is the compactor reclaiming
            // a page, which is the event this scenario wants to crash on.
            if erases_after - erases_before > 1 {
                triggering = Some((pre_bytes, Op::Update(*raw_id, 0, new_payload)));
                break 'outer;
            }
        }
    }

    let (base, op) = triggering.expect("the rewrite loop should have forced at least one compaction");
    // Exclude the item under the triggering op itself: its value is
    // ambiguous (old or new) depending on exactly where the crash lands.
    let (trigger_id, _) = match &op {
        Op::Update(i, _, _) => (*i, ()),
        Op::Create(i, _) => (*i, ()),
    };
    let prior: Vec<(u16, Vec<u8>)> = history.into_iter().filter(|(i, _)| *i != trigger_id).collect();

    sweep_crash_points(&base, &op, &prior);
}

#[test]
fn scenario_5_crash_during_an_ordinary_update_collapses_to_one_consistent_copy() {
    let mut flash: TestFlash = SimulatedFlash::blank();
    {
        let store = mount(&mut flash);
        store.item_init(id(0x0010), 4, Some(&[1, 2, 3, 4])).unwrap();
    }
    let base = flash.bytes().to_vec();
    let op = Op::Update(0x0010, 0, vec![9, 9, 9, 9]);

    // No `history` to check here beyond invariants common to every crash
    // point: exactly one current copy of 0x0010 must survive, holding either
    // the pre- or post-update value, never a torn mixture.
    let mut dry: TestFlash = SimulatedFlashBuilder::new().build_from(base.clone());
    {
        let store = mount(&mut dry);
        apply(&store, &op).unwrap();
    }
    let total_calls = dry.calls_issued();

    for crash_after in 0..total_calls {
        let mut injected: TestFlash = SimulatedFlashBuilder::new()
            .with_crash(CrashPoint { after_calls: crash_after, at_byte: 0 })
            .build_from(base.clone());
        {
            let store = mount(&mut injected);
            let _ = apply(&store, &op);
        }

        let rebooted_bytes = injected.bytes().to_vec();
        let mut rebooted: TestFlash = SimulatedFlash::from_bytes(rebooted_bytes);
        let store = mount(&mut rebooted);

        let mut out = [0u8; 4];
        store.read(id(0x0010), 0, &mut out).expect("the item must still exist after any crash point");
        assert!(
            out == [1, 2, 3, 4] || out == [9, 9, 9, 9],
            "crash at call {crash_after} produced a torn value: {out:?}"
        );

        drop(store);
        let items = scan_items(rebooted.bytes());
        let currents: Vec<_> = items
            .iter()
            .filter(|it| it.id == 0x0010 && it.is_current() && !it.is_tombstone())
            .collect();
        assert_eq!(currents.len(), 1, "exactly one current copy must survive a crash at call {crash_after}");
    }
}

#[test]
fn scenario_6_master_reset_upgrades_subsequent_item_inits_to_rewrites() {
    let mut flash: TestFlash = SimulatedFlash::blank();
    {
        let store = mount(&mut flash);
        store.item_init(id(0x0020), 2, Some(&[1, 2])).unwrap();
        store.write_master_reset_key().unwrap();
    }

    let bytes = flash.bytes().to_vec();
    let mut rebooted: TestFlash = SimulatedFlash::from_bytes(bytes);
    let store = mount(&mut rebooted);

    // The master-reset flag item was rewritten to zero during this mount;
    // a subsequent item_init on an existing Id must be upgraded to a
    // rewrite with the fresh default rather than left alone.
    let outcome = store.item_init(id(0x0020), 2, Some(&[7, 7])).unwrap();
    assert_eq!(outcome, osal_nv::ItemInitOutcome::Existed);

    let mut out = [0u8; 2];
    store.read(id(0x0020), 0, &mut out).unwrap();
    assert_eq!(out, [7, 7], "master reset should have upgraded this item_init into a rewrite");
}

#[allow(dead_code)]
fn _type_check_config_is_wired_up() {
    let _ = config();
}
