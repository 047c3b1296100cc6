//! User file mappings: demand reads through the mapping, dirty pages
//! written back by eviction and by munmap, and the mapping surviving a
//! close of the originating fd.

use ferrite_os::userland as user;
use ferrite_os::{fs, loader, process, userland, vm, KernelConfig};

const EXE_BASE: u32 = 0x0804_8000;
const PGSIZE: u32 = 4096;
const MAP_BASE: u32 = 0x1000_0000;
const FILE_LEN: usize = 6000;

fn pattern(i: usize) -> u8 {
    (i % 251) as u8
}

fn mapper_main(esp: u32) -> i32 {
    let name = esp - 64;
    user::write_bytes(name, b"map.dat\0");

    // Bad requests are refused without side effects.
    if user::sys_mmap(1, MAP_BASE) != -1 {
        return 1;
    }
    let fd = user::sys_open(name);
    if fd < 2 {
        return 2;
    }
    if user::sys_mmap(fd, MAP_BASE + 1) != -1 {
        return 3;
    }
    if user::sys_mmap(fd, 0) != -1 {
        return 4;
    }

    let id = user::sys_mmap(fd, MAP_BASE);
    if id < 0 {
        return 5;
    }
    // The mapping holds its own file reference.
    user::sys_close(fd);

    // Demand reads see the file bytes; the tail past EOF is zero.
    if user::read_u8(MAP_BASE) != pattern(0) {
        return 6;
    }
    if user::read_u8(MAP_BASE + 5000) != pattern(5000) {
        return 7;
    }
    if user::read_u8(MAP_BASE + FILE_LEN as u32 + 10) != 0 {
        return 8;
    }

    // Dirty both pages.
    user::write_u8(MAP_BASE + 100, 0xEE);
    user::write_u8(MAP_BASE + PGSIZE + 7, 0xDD);

    // Force eviction pressure so the dirty mapping pages get written
    // back to the file by the clock, then fault them back in.
    let base = user::esp();
    for i in 0..16u32 {
        let lo = base - (i + 1) * PGSIZE;
        user::set_esp(lo);
        user::write_u8(lo, i as u8);
    }
    if user::read_u8(MAP_BASE + 100) != 0xEE {
        return 9;
    }
    if user::read_u8(MAP_BASE + PGSIZE + 7) != 0xDD {
        return 10;
    }

    vm::check_invariants();

    if user::syscall(ferrite_os::syscalls::SYS_MUNMAP, &[id as u32]) != 0 {
        return 11;
    }
    0
}

fn unmapped_after_main(_esp: u32) -> i32 {
    // A fresh process never sees the mapping region.
    user::read_u8(MAP_BASE);
    0
}

#[test]
fn mmap_write_back_round_trip() {
    let config = KernelConfig {
        user_pool_pages: 10,
        ..KernelConfig::default()
    };
    ferrite_os::run(config, || {
        userland::register("mapper", mapper_main);
        userland::register("after", unmapped_after_main);
        for name in ["mapper", "after"] {
            let image =
                loader::build_executable(EXE_BASE, &[(EXE_BASE, vec![0x90; 64], 64, false)]);
            fs::FS_LOCK.acquire();
            assert!(fs::create(name, image.len()));
            let mut file = fs::open(name).unwrap();
            assert_eq!(file.write(&image), image.len());
            fs::FS_LOCK.release();
        }

        // The data file, filled with a recognizable pattern.
        fs::FS_LOCK.acquire();
        assert!(fs::create("map.dat", FILE_LEN));
        let mut data = fs::open("map.dat").unwrap();
        let bytes: Vec<u8> = (0..FILE_LEN).map(pattern).collect();
        assert_eq!(data.write(&bytes), FILE_LEN);
        fs::FS_LOCK.release();

        let pid = process::execute("mapper").expect("mapper loads");
        assert_eq!(process::wait(pid), 0);

        // The dirty bytes reached the file; everything else is intact.
        fs::FS_LOCK.acquire();
        let mut data = fs::open("map.dat").unwrap();
        let mut readback = vec![0u8; FILE_LEN];
        assert_eq!(data.read(&mut readback), FILE_LEN);
        fs::FS_LOCK.release();
        assert_eq!(readback[100], 0xEE);
        assert_eq!(readback[PGSIZE as usize + 7], 0xDD);
        assert_eq!(readback[0], pattern(0));
        assert_eq!(readback[5000], pattern(5000));
        assert_eq!(readback[99], pattern(99));

        // Address space teardown left the mapping region unmapped for
        // the next process.
        let pid = process::execute("after").expect("after loads");
        assert_eq!(process::wait(pid), -1);

        vm::check_invariants();
    });
}
