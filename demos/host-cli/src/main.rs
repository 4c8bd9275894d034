//! Host-side demo of `osal-nv` against an in-memory simulated flash region:
//! mount, create an item, read it back, update it in place, and print the
//! page layout before and after. Stands in for the higher-level application
//! that would otherwise be driving the store on real hardware.

use flash_sim::SimulatedFlash;
use log::info;
use osal_nv::voltage::AlwaysOk;
use osal_nv::{ByteSumChecksum, NvId, NvStore, StoreConfig};

const PAGE_SIZE: usize = 2048;
const PAGE_COUNT: usize = 4;
const WORD_SIZE: usize = 2;

type DemoFlash = SimulatedFlash<PAGE_SIZE, PAGE_COUNT, WORD_SIZE>;

fn dump_pages(flash: &DemoFlash, label: &str) {
    println!("--- {label} ---");
    for page in 0..PAGE_COUNT {
        let base = page * PAGE_SIZE;
        let bytes = flash.bytes();
        let word = |off: usize| u16::from_le_bytes([bytes[base + off], bytes[base + off + 1]]);
        println!(
            "page {page}: active={:#06x} in_use={:#06x} xfer={:#06x} erases={}",
            word(0),
            word(2),
            word(4),
            flash.erase_cycles(page),
        );
    }
}

fn main() {
    env_logger::init();

    let mut flash: DemoFlash = SimulatedFlash::blank();
    let config = StoreConfig {
        page_count: PAGE_COUNT as u8,
        page_size: PAGE_SIZE as u32,
        word_size: WORD_SIZE as u8,
        hot_ids: vec![NvId::new(0x0001).unwrap()],
    };

    let store: NvStore<&mut DemoFlash, ByteSumChecksum, AlwaysOk> =
        NvStore::mount(&mut flash, AlwaysOk, config).expect("mount of a blank region cannot fail");
    info!("mounted a fresh {PAGE_COUNT}-page region");
    dump_pages(&flash, "after mount");

    let counter_id = NvId::new(0x0010).unwrap();
    let outcome = store
        .item_init(counter_id, 4, Some(&0u32.to_le_bytes()))
        .expect("item_init on a brand-new Id cannot fail");
    info!("item_init(0x0010) -> {outcome:?}");

    let mut buf = [0u8; 4];
    store.read(counter_id, 0, &mut buf).expect("read of a just-created item cannot fail");
    println!("counter = {}", u32::from_le_bytes(buf));

    for _ in 0..3 {
        store.read(counter_id, 0, &mut buf).unwrap();
        let next = u32::from_le_bytes(buf).wrapping_add(1);
        store.write(counter_id, 0, &next.to_le_bytes()).expect("write cannot fail on this region");
    }
    store.read(counter_id, 0, &mut buf).unwrap();
    println!("counter after 3 increments = {}", u32::from_le_bytes(buf));

    dump_pages(&flash, "after increments");
}
