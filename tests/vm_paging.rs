//! Demand paging: stack growth within the window, fatal faults outside
//! it, and write protection of executable pages.

use ferrite_os::userland as user;
use ferrite_os::{console, fs, loader, process, userland, KernelConfig};

const EXE_BASE: u32 = 0x0804_8000;
const PGSIZE: u32 = 4096;

fn install_program(name: &str, body: userland::UserProgram) {
    userland::register(name, body);
    let image = loader::build_executable(EXE_BASE, &[(EXE_BASE, vec![0x90; 64], 64, false)]);
    fs::FS_LOCK.acquire();
    assert!(fs::create(name, image.len()));
    let mut file = fs::open(name).unwrap();
    assert_eq!(file.write(&image), image.len());
    fs::FS_LOCK.release();
}

fn growth_main(_esp: u32) -> i32 {
    // Move the stack pointer two pages down and touch just below it:
    // the fault lands within the 32-byte window and must materialize a
    // fresh anonymous page.
    let esp = user::esp();
    user::set_esp(esp - 2 * PGSIZE);
    let sp = user::esp();
    user::write_u32(sp - 4, 0xDEAD_BEEF);
    if user::read_u32(sp - 4) != 0xDEAD_BEEF {
        return 1;
    }
    // The grown page arrived zero-filled.
    if user::read_u32(sp - 12) != 0 {
        return 2;
    }
    0
}

fn wild_write_main(_esp: u32) -> i32 {
    // Far below the stack pointer, outside the growth window: fatal.
    let esp = user::esp();
    user::write_u32(esp - 3 * PGSIZE, 1);
    0
}

fn ro_write_main(_esp: u32) -> i32 {
    // The code segment is mapped read-only; writing it is fatal.
    user::write_u8(EXE_BASE, 0);
    0
}

fn null_deref_main(_esp: u32) -> i32 {
    // Page zero is never mapped.
    user::read_u8(0);
    0
}

fn exe_read_main(_esp: u32) -> i32 {
    // Reading the mapped image pages works and sees the file bytes.
    if user::read_u8(EXE_BASE) != 0x90 {
        return 1;
    }
    if user::read_u8(EXE_BASE + 63) != 0x90 {
        return 2;
    }
    // The demand-mapped tail past filesz is zero-filled.
    if user::read_u8(EXE_BASE + 64) != 0 {
        return 3;
    }
    0
}

#[test]
fn stack_growth_and_fault_boundaries() {
    ferrite_os::run(KernelConfig::default(), || {
        install_program("growth", growth_main);
        install_program("wild", wild_write_main);
        install_program("rowrite", ro_write_main);
        install_program("nullref", null_deref_main);
        install_program("exeread", exe_read_main);

        let pid = process::execute("growth").unwrap();
        assert_eq!(process::wait(pid), 0);

        let pid = process::execute("exeread").unwrap();
        assert_eq!(process::wait(pid), 0);

        for prog in ["wild", "rowrite", "nullref"] {
            let pid = process::execute(prog).unwrap();
            assert_eq!(process::wait(pid), -1, "{} must be killed", prog);
            assert!(console::take().contains(&format!("{}: exit(-1)", prog)));
        }

        ferrite_os::vm::check_invariants();
        ferrite_os::scheduler::check_invariants();
    });
}
