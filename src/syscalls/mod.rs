//! The system-call interface.
//!
//! The trampoline hands the handler a user stack pointer; the syscall
//! number and every argument are popped off the user stack with checked
//! reads, and any invalid user pointer anywhere in a call makes the
//! process exit with status -1. Console output and file I/O move
//! through 128-byte bursts, with the user-side copies kept outside the
//! file-system lock so a copy can fault a page in without re-entering
//! it.

use crate::console;
use crate::drivers::input;
use crate::fs;
use crate::process::{self, usermem, FdContext, FdKind};
use crate::scheduler::thread::Tid;
use crate::vm;

pub const SYS_HALT: u32 = 0;
pub const SYS_EXIT: u32 = 1;
pub const SYS_EXEC: u32 = 2;
pub const SYS_WAIT: u32 = 3;
pub const SYS_CREATE: u32 = 4;
pub const SYS_REMOVE: u32 = 5;
pub const SYS_OPEN: u32 = 6;
pub const SYS_FILESIZE: u32 = 7;
pub const SYS_READ: u32 = 8;
pub const SYS_WRITE: u32 = 9;
pub const SYS_SEEK: u32 = 10;
pub const SYS_TELL: u32 = 11;
pub const SYS_CLOSE: u32 = 12;
pub const SYS_MMAP: u32 = 13;
pub const SYS_MUNMAP: u32 = 14;

/// I/O burst size for console writes and file transfers.
const IO_BURST: usize = 128;

pub fn init() {
    log::debug!("syscall: interface ready");
}

/// Pop the i-th word above the syscall number off the user stack.
fn arg(sp: u32, index: u32) -> u32 {
    let mut bytes = [0u8; 4];
    if !usermem::memcpy_from_user(&mut bytes, sp + 4 * (index + 1)) {
        process::trigger_exit(-1);
    }
    u32::from_le_bytes(bytes)
}

/// Handle a system call whose frame starts at `sp` on the user stack.
pub fn handler(sp: u32) -> i32 {
    let mut number_bytes = [0u8; 4];
    if !usermem::memcpy_from_user(&mut number_bytes, sp) {
        process::trigger_exit(-1);
    }
    let number = u32::from_le_bytes(number_bytes);

    match number {
        SYS_HALT => sys_halt(),
        SYS_EXIT => process::trigger_exit(arg(sp, 0) as i32),
        SYS_EXEC => sys_exec(arg(sp, 0)),
        SYS_WAIT => sys_wait(arg(sp, 0) as i32),
        SYS_CREATE => sys_create(arg(sp, 0), arg(sp, 1)),
        SYS_REMOVE => sys_remove(arg(sp, 0)),
        SYS_OPEN => sys_open(arg(sp, 0)),
        SYS_FILESIZE => sys_filesize(arg(sp, 0) as i32),
        SYS_READ => sys_read(arg(sp, 0) as i32, arg(sp, 1), arg(sp, 2)),
        SYS_WRITE => sys_write(arg(sp, 0) as i32, arg(sp, 1), arg(sp, 2)),
        SYS_SEEK => sys_seek(arg(sp, 0) as i32, arg(sp, 1)),
        SYS_TELL => sys_tell(arg(sp, 0) as i32),
        SYS_CLOSE => sys_close(arg(sp, 0) as i32),
        SYS_MMAP => sys_mmap(arg(sp, 0) as i32, arg(sp, 1)),
        SYS_MUNMAP => sys_munmap(arg(sp, 0) as i32),
        // Unknown syscall numbers kill the process.
        _ => process::trigger_exit(-1),
    }
}

fn sys_halt() -> i32 {
    log::info!("halt: shutting the machine down");
    crate::scheduler::exit_thread()
}

fn user_string(addr: u32) -> String {
    match usermem::strlcpy_from_user(addr, crate::memory::PGSIZE) {
        Some(s) => s,
        None => process::trigger_exit(-1),
    }
}

fn sys_exec(cmd_addr: u32) -> i32 {
    let cmd = user_string(cmd_addr);
    match process::execute(&cmd) {
        Some(pid) => pid.0 as i32,
        None => -1,
    }
}

fn sys_wait(pid: i32) -> i32 {
    if pid < 0 {
        return -1;
    }
    process::wait(Tid(pid as u64))
}

fn sys_create(name_addr: u32, size: u32) -> i32 {
    let name = user_string(name_addr);
    if name.is_empty() {
        return 0;
    }
    fs::FS_LOCK.acquire();
    let created = fs::create(&name, size as usize);
    fs::FS_LOCK.release();
    created as i32
}

fn sys_remove(name_addr: u32) -> i32 {
    let name = user_string(name_addr);
    fs::FS_LOCK.acquire();
    let removed = fs::remove(&name);
    fs::FS_LOCK.release();
    removed as i32
}

/// Run `f` with the fd-table entry for `fd`, or None if it is not open.
fn with_fd<R>(fd: i32, f: impl FnOnce(&mut FdContext) -> R) -> Option<R> {
    let ctx = process::current_ctx();
    let mut table = ctx.fd_table.lock();
    let entry = table.iter_mut().find(|e| e.fd == fd)?;
    Some(f(entry))
}

fn sys_open(name_addr: u32) -> i32 {
    let name = user_string(name_addr);
    fs::FS_LOCK.acquire();
    let file = fs::open(&name);
    fs::FS_LOCK.release();

    match file {
        Some(file) => {
            let ctx = process::current_ctx();
            let mut table = ctx.fd_table.lock();
            process::alloc_fd(&mut table, FdKind::File(file))
        }
        None => -1,
    }
}

fn sys_filesize(fd: i32) -> i32 {
    fs::FS_LOCK.acquire();
    let size = with_fd(fd, |entry| match &entry.kind {
        FdKind::File(file) => file.length() as i32,
        _ => -1,
    });
    fs::FS_LOCK.release();
    size.unwrap_or(-1)
}

fn sys_read(fd: i32, buf_addr: u32, len: u32) -> i32 {
    if fd == 0 {
        // Keyboard: one blocking byte at a time.
        for i in 0..len {
            let byte = input::getc();
            if !usermem::copy_byte_to_user(buf_addr + i, byte) {
                process::trigger_exit(-1);
            }
        }
        return len as i32;
    }

    let mut total = 0usize;
    let mut buf = [0u8; IO_BURST];
    while (total as u32) < len {
        let chunk = IO_BURST.min((len as usize) - total);

        fs::FS_LOCK.acquire();
        let read = with_fd(fd, |entry| match &mut entry.kind {
            FdKind::File(file) => Some(file.read(&mut buf[..chunk])),
            _ => None,
        });
        fs::FS_LOCK.release();

        let read = match read {
            Some(Some(n)) => n,
            // Not an open regular file.
            _ => return -1,
        };
        if read == 0 {
            break;
        }
        // The copy runs outside the lock so a fault can page the
        // buffer in.
        if !usermem::memcpy_to_user(buf_addr + total as u32, &buf[..read]) {
            process::trigger_exit(-1);
        }
        total += read;
        if read < chunk {
            break;
        }
    }
    total as i32
}

fn sys_write(fd: i32, buf_addr: u32, len: u32) -> i32 {
    if fd == 0 {
        return -1;
    }

    let mut total = 0usize;
    let mut buf = [0u8; IO_BURST];
    while (total as u32) < len {
        let chunk = IO_BURST.min((len as usize) - total);
        if !usermem::memcpy_from_user(&mut buf[..chunk], buf_addr + total as u32) {
            process::trigger_exit(-1);
        }

        if fd == 1 {
            console::write_bytes(&buf[..chunk]);
            total += chunk;
            continue;
        }

        fs::FS_LOCK.acquire();
        let written = with_fd(fd, |entry| match &mut entry.kind {
            FdKind::File(file) => Some(file.write(&buf[..chunk])),
            _ => None,
        });
        fs::FS_LOCK.release();

        let written = match written {
            Some(Some(n)) => n,
            _ => return -1,
        };
        total += written;
        if written < chunk {
            break;
        }
    }
    total as i32
}

fn sys_seek(fd: i32, pos: u32) -> i32 {
    fs::FS_LOCK.acquire();
    with_fd(fd, |entry| {
        if let FdKind::File(file) = &mut entry.kind {
            file.seek(pos);
        }
    });
    fs::FS_LOCK.release();
    0
}

fn sys_tell(fd: i32) -> i32 {
    fs::FS_LOCK.acquire();
    let pos = with_fd(fd, |entry| match &entry.kind {
        FdKind::File(file) => file.tell() as i32,
        _ => -1,
    });
    fs::FS_LOCK.release();
    pos.unwrap_or(-1)
}

fn sys_close(fd: i32) -> i32 {
    fs::FS_LOCK.acquire();
    let ctx = process::current_ctx();
    ctx.fd_table.lock().retain(|e| e.fd != fd);
    fs::FS_LOCK.release();
    0
}

fn sys_mmap(fd: i32, addr: u32) -> i32 {
    // The mapping holds its own handle to the file, so closing the fd
    // later does not unmap.
    fs::FS_LOCK.acquire();
    let file = with_fd(fd, |entry| match &entry.kind {
        FdKind::File(file) => Some(file.reopen()),
        _ => None,
    });

    let result = match file {
        Some(Some(file)) => {
            let ctx = process::current_ctx();
            vm::mmap_user(&ctx.vm, file, addr)
        }
        _ => None,
    };
    fs::FS_LOCK.release();
    result.unwrap_or(-1)
}

fn sys_munmap(mapid: i32) -> i32 {
    let ctx = process::current_ctx();
    fs::FS_LOCK.acquire();
    let ok = vm::munmap_user(&ctx.vm, mapid);
    fs::FS_LOCK.release();
    if ok {
        0
    } else {
        -1
    }
}
