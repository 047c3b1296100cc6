//! Process lifecycle end to end: exec/wait/exit, argument passing, the
//! fd table and the file and keyboard system calls, and the checked
//! user-pointer discipline.

use ferrite_os::drivers::input;
use ferrite_os::scheduler::Tid;
use ferrite_os::userland as user;
use ferrite_os::{console, fs, loader, process, userland, KernelConfig};

const EXE_BASE: u32 = 0x0804_8000;

/// Register a program body and place a matching executable image in the
/// file system.
fn install_program(name: &str, body: userland::UserProgram) {
    userland::register(name, body);
    let image = loader::build_executable(EXE_BASE, &[(EXE_BASE, vec![0x90; 64], 64, false)]);
    fs::FS_LOCK.acquire();
    assert!(fs::create(name, image.len()));
    let mut file = fs::open(name).unwrap();
    assert_eq!(file.write(&image), image.len());
    fs::FS_LOCK.release();
}

fn echo_main(esp: u32) -> i32 {
    // Stack top: dummy return address, argc, argv.
    let argc = user::read_u32(esp + 4);
    let argv = user::read_u32(esp + 8);
    if esp % 4 != 0 {
        return 1;
    }
    if argc != 3 {
        return 2;
    }
    let arg0 = user::read_u32(argv);
    let arg1 = user::read_u32(argv + 4);
    let arg2 = user::read_u32(argv + 8);
    // argv[0] sits lowest; the sentinel terminates the vector.
    if !(arg0 < arg1 && arg1 < arg2) {
        return 3;
    }
    if user::read_u32(argv + 12) != 0 {
        return 4;
    }
    if user::read_cstring(arg0) != "echo" {
        return 5;
    }
    if user::read_cstring(arg1) != "hello" {
        return 6;
    }
    if user::read_cstring(arg2) != "world" {
        return 7;
    }
    user::sys_write(1, arg1, 5);
    42
}

fn parent_main(esp: u32) -> i32 {
    let sp = esp - 64;
    user::write_bytes(sp, b"echo hello world\0");
    let pid = user::sys_exec(sp);
    if pid < 0 {
        return 1;
    }
    if user::sys_wait(pid) != 42 {
        return 2;
    }
    // A second wait on the same child fails immediately.
    if user::sys_wait(pid) != -1 {
        return 3;
    }
    0
}

fn filer_main(esp: u32) -> i32 {
    let name = esp - 64;
    user::write_bytes(name, b"data.bin\0");
    if !user::sys_create(name, 16) {
        return 1;
    }
    let fd = user::sys_open(name);
    if fd < 2 {
        return 2;
    }
    if user::sys_filesize(fd) != 16 {
        return 3;
    }

    let buf = esp - 128;
    user::write_bytes(buf, b"abcdefgh");
    if user::sys_write(fd, buf, 8) != 8 {
        return 4;
    }
    if user::sys_tell(fd) != 8 {
        return 5;
    }
    user::sys_seek(fd, 4);
    if user::sys_tell(fd) != 4 {
        return 6;
    }
    if user::sys_read(fd, buf, 8) != 8 {
        return 7;
    }
    if user::read_u8(buf) != b'e' || user::read_u8(buf + 3) != b'h' {
        return 8;
    }
    // Bytes past what was written read back as zeros.
    if user::read_u8(buf + 4) != 0 {
        return 9;
    }
    user::sys_close(fd);
    if user::sys_read(fd, buf, 1) != -1 {
        return 10;
    }
    if !user::sys_remove(name) {
        return 11;
    }
    if user::sys_open(name) != -1 {
        return 12;
    }
    0
}

fn kbd_main(esp: u32) -> i32 {
    let buf = esp - 32;
    if user::sys_read(0, buf, 2) != 2 {
        return 1;
    }
    if user::read_u8(buf) != b'h' || user::read_u8(buf + 1) != b'i' {
        return 2;
    }
    // Writing to the keyboard is refused.
    if user::sys_write(0, buf, 1) != -1 {
        return 3;
    }
    0
}

fn bad_ptr_main(_esp: u32) -> i32 {
    // Kernel-space buffer: the write call must kill us with -1, so
    // reaching the return is itself a failure.
    user::sys_write(1, 0xC000_0000, 4);
    0
}

fn bad_syscall_main(_esp: u32) -> i32 {
    user::syscall(999, &[]);
    0
}

#[test]
fn process_lifecycle() {
    ferrite_os::run(KernelConfig::default(), || {
        install_program("echo", echo_main);
        install_program("parent", parent_main);
        install_program("filer", filer_main);
        install_program("kbd", kbd_main);
        install_program("badptr", bad_ptr_main);
        install_program("badsys", bad_syscall_main);

        // Plain exec/wait with arguments.
        let pid = process::execute("echo hello world").expect("echo loads");
        assert_eq!(process::wait(pid), 42);
        let out = console::take();
        assert!(out.contains("hello"), "echo output missing: {:?}", out);
        assert!(out.contains("echo: exit(42)"), "exit line missing: {:?}", out);

        // Waiting twice, or for someone else's child, fails.
        assert_eq!(process::wait(pid), -1);
        assert_eq!(process::wait(Tid(9999)), -1);

        // exec of a missing or corrupt executable fails cleanly.
        assert!(process::execute("no-such-binary").is_none());
        userland::register("corrupt", |_| 0);
        fs::FS_LOCK.acquire();
        assert!(fs::create("corrupt", 64));
        let mut f = fs::open("corrupt").unwrap();
        f.write(&[0u8; 64]);
        fs::FS_LOCK.release();
        assert!(process::execute("corrupt").is_none());

        // A process execing and waiting on its own child.
        let pid = process::execute("parent").expect("parent loads");
        assert_eq!(process::wait(pid), 0);
        console::take();

        // The write-deny on the executable is released after exit.
        fs::FS_LOCK.acquire();
        let mut exe = fs::open("echo").unwrap();
        assert_eq!(exe.write(&[0]), 1, "deny must be lifted after exit");
        exe.seek(0);
        assert_eq!(exe.write(&[0x7F]), 1); // restore the ELF magic
        drop(exe);
        fs::FS_LOCK.release();

        // File descriptor table and file syscalls.
        let pid = process::execute("filer").expect("filer loads");
        assert_eq!(process::wait(pid), 0);

        // Keyboard fd: bytes fed before exec are drained one by one.
        input::feed(b"hi");
        let pid = process::execute("kbd").expect("kbd loads");
        assert_eq!(process::wait(pid), 0);
        assert_eq!(input::pending(), 0);

        // Invalid user pointers and unknown syscalls kill the process.
        let pid = process::execute("badptr").expect("badptr loads");
        assert_eq!(process::wait(pid), -1);
        assert!(console::take().contains("badptr: exit(-1)"));

        let pid = process::execute("badsys").expect("badsys loads");
        assert_eq!(process::wait(pid), -1);

        ferrite_os::scheduler::check_invariants();
        ferrite_os::vm::check_invariants();
    });
}
