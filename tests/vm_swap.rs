//! Swap round trips: dirty anonymous pages forced out by memory
//! pressure must come back with their contents intact.

use ferrite_os::userland as user;
use ferrite_os::{fs, loader, process, userland, vm, KernelConfig};

const EXE_BASE: u32 = 0x0804_8000;
const PGSIZE: u32 = 4096;

/// More stack pages than the user pool holds, so the early ones are
/// evicted to swap while the storm runs.
const STORM_PAGES: u32 = 24;

fn storm_main(_esp: u32) -> i32 {
    let base = user::esp();

    for i in 0..STORM_PAGES {
        let page_top = base - i * PGSIZE;
        let lo = page_top - PGSIZE;
        user::set_esp(lo);
        user::write_bytes(lo, &[i as u8; 64]);
        user::write_u32(page_top - 4, 0xA5A5_0000 + i);
    }

    // Touching them again faults the swapped ones back in.
    for i in 0..STORM_PAGES {
        let page_top = base - i * PGSIZE;
        let lo = page_top - PGSIZE;
        if user::read_u8(lo) != i as u8 {
            return 100 + i as i32;
        }
        if user::read_u8(lo + 63) != i as u8 {
            return 200 + i as i32;
        }
        if user::read_u32(page_top - 4) != 0xA5A5_0000 + i {
            return 300 + i as i32;
        }
    }

    vm::check_invariants();
    0
}

#[test]
fn anonymous_pages_survive_eviction() {
    let config = KernelConfig {
        user_pool_pages: 12,
        swap_sectors: 1024,
        ..KernelConfig::default()
    };
    ferrite_os::run(config, || {
        userland::register("storm", storm_main);
        let image = loader::build_executable(EXE_BASE, &[(EXE_BASE, vec![0x90; 64], 64, false)]);
        fs::FS_LOCK.acquire();
        assert!(fs::create("storm", image.len()));
        let mut file = fs::open("storm").unwrap();
        assert_eq!(file.write(&image), image.len());
        fs::FS_LOCK.release();

        let pid = process::execute("storm").expect("storm loads");
        assert_eq!(process::wait(pid), 0);

        // Process teardown returned every frame and swap slot.
        vm::check_invariants();
        ferrite_os::scheduler::check_invariants();
    });
}
