//! The user side of the simulated machine.
//!
//! Built-in user programs are registered by name; the loader resolves an
//! image's entry against this table, the way a shell knows its built-in
//! binaries. A program runs in "user mode": every memory access goes
//! through the simulated MMU (faulting pages in, growing the stack,
//! dying on illegal accesses) and every kernel service goes through the
//! syscall frame on the user stack.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::process::{self, usermem};
use crate::scheduler;
use crate::syscalls;

/// A user program entry point: receives the initial stack pointer,
/// returns the exit status if it ever returns from "main".
pub type UserProgram = fn(esp: u32) -> i32;

lazy_static! {
    static ref REGISTRY: Mutex<BTreeMap<String, UserProgram>> = Mutex::new(BTreeMap::new());
}

/// Register a program under its executable name.
pub fn register(name: &str, program: UserProgram) {
    REGISTRY.lock().insert(String::from(name), program);
}

pub(crate) fn lookup(name: &str) -> Option<UserProgram> {
    REGISTRY.lock().get(name).copied()
}

/// An unhandled fault in user mode kills the process.
fn fault() -> ! {
    process::trigger_exit(-1)
}

/// Current user stack pointer of the running process.
pub fn esp() -> u32 {
    current_ctx().user_esp()
}

/// Move the user stack pointer (push/pop in user code).
pub fn set_esp(esp: u32) {
    current_ctx().set_user_esp(esp);
}

fn current_ctx() -> std::sync::Arc<process::ProcessContext> {
    scheduler::current_process_ctx().expect("user access outside a process")
}

pub fn read_u8(addr: u32) -> u8 {
    match usermem::copy_byte_from_user(addr) {
        Some(byte) => byte,
        None => fault(),
    }
}

pub fn write_u8(addr: u32, byte: u8) {
    if !usermem::copy_byte_to_user(addr, byte) {
        fault();
    }
}

pub fn read_u32(addr: u32) -> u32 {
    let mut bytes = [0u8; 4];
    if !usermem::memcpy_from_user(&mut bytes, addr) {
        fault();
    }
    u32::from_le_bytes(bytes)
}

pub fn write_u32(addr: u32, value: u32) {
    if !usermem::memcpy_to_user(addr, &value.to_le_bytes()) {
        fault();
    }
}

pub fn read_bytes(addr: u32, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    if !usermem::memcpy_from_user(&mut buf, addr) {
        fault();
    }
    buf
}

pub fn write_bytes(addr: u32, bytes: &[u8]) {
    if !usermem::memcpy_to_user(addr, bytes) {
        fault();
    }
}

/// Read a C string out of user memory.
pub fn read_cstring(addr: u32) -> String {
    match usermem::strlcpy_from_user(addr, crate::memory::PGSIZE) {
        Some(s) => s,
        None => fault(),
    }
}

/// Perform a system call: lay the number and arguments out on the user
/// stack the way the real stubs do, trap into the kernel, and restore
/// the stack pointer.
pub fn syscall(number: u32, args: &[u32]) -> i32 {
    let saved_esp = esp();
    let sp = saved_esp - 4 * (args.len() as u32 + 1);
    set_esp(sp);
    write_u32(sp, number);
    for (i, &arg) in args.iter().enumerate() {
        write_u32(sp + 4 * (i as u32 + 1), arg);
    }
    let result = syscalls::handler(sp);
    set_esp(saved_esp);
    result
}

// The user-side syscall stubs.

pub fn sys_exit(status: i32) -> ! {
    syscall(syscalls::SYS_EXIT, &[status as u32]);
    unreachable!("exit returned")
}

pub fn sys_exec(cmd_addr: u32) -> i32 {
    syscall(syscalls::SYS_EXEC, &[cmd_addr])
}

pub fn sys_wait(pid: i32) -> i32 {
    syscall(syscalls::SYS_WAIT, &[pid as u32])
}

pub fn sys_create(name_addr: u32, size: u32) -> bool {
    syscall(syscalls::SYS_CREATE, &[name_addr, size]) != 0
}

pub fn sys_remove(name_addr: u32) -> bool {
    syscall(syscalls::SYS_REMOVE, &[name_addr]) != 0
}

pub fn sys_open(name_addr: u32) -> i32 {
    syscall(syscalls::SYS_OPEN, &[name_addr])
}

pub fn sys_filesize(fd: i32) -> i32 {
    syscall(syscalls::SYS_FILESIZE, &[fd as u32])
}

pub fn sys_read(fd: i32, buf_addr: u32, len: u32) -> i32 {
    syscall(syscalls::SYS_READ, &[fd as u32, buf_addr, len])
}

pub fn sys_write(fd: i32, buf_addr: u32, len: u32) -> i32 {
    syscall(syscalls::SYS_WRITE, &[fd as u32, buf_addr, len])
}

pub fn sys_seek(fd: i32, pos: u32) {
    syscall(syscalls::SYS_SEEK, &[fd as u32, pos]);
}

pub fn sys_tell(fd: i32) -> i32 {
    syscall(syscalls::SYS_TELL, &[fd as u32])
}

pub fn sys_close(fd: i32) {
    syscall(syscalls::SYS_CLOSE, &[fd as u32]);
}

pub fn sys_mmap(fd: i32, addr: u32) -> i32 {
    syscall(syscalls::SYS_MMAP, &[fd as u32, addr])
}

pub fn sys_munmap(mapid: i32) {
    syscall(syscalls::SYS_MUNMAP, &[mapid as u32]);
}
