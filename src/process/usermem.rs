//! Checked user-memory access.
//!
//! Every byte copied across the privilege boundary must tolerate a page
//! fault on the user side. Instead of a fault-fixup trampoline, the
//! simulated MMU is probed directly: a miss invokes the VMM's fault
//! handler (which may materialize the page or grow the stack) and the
//! access retries; an unhandled fault surfaces as an error the caller
//! turns into `exit(-1)`.

use crate::memory::palloc;
use crate::memory::{is_user_vaddr, pg_ofs, pg_round_down};
use crate::process;
use crate::vm;

/// Copy one byte from user space. None when `uaddr` is outside user
/// space or unmapped beyond repair.
pub fn copy_byte_from_user(uaddr: u32) -> Option<u8> {
    if !is_user_vaddr(uaddr) {
        return None;
    }
    let (vm_state, _ctx) = process::active()?;
    let upage = pg_round_down(uaddr);
    loop {
        let resolved = vm_state.pagedir.lock().translate(upage);
        match resolved {
            Some((kpage, _writable)) => {
                let byte = palloc::with_page(kpage, |bytes| bytes[pg_ofs(uaddr) as usize]);
                vm_state.pagedir.lock().set_accessed(upage);
                return Some(byte);
            }
            None => {
                if !vm::page_fault(uaddr, false) {
                    return None;
                }
            }
        }
    }
}

/// Copy one byte into user space. False when the address is invalid or
/// the mapping is not writable.
pub fn copy_byte_to_user(uaddr: u32, byte: u8) -> bool {
    if !is_user_vaddr(uaddr) {
        return false;
    }
    let Some((vm_state, _ctx)) = process::active() else {
        return false;
    };
    let upage = pg_round_down(uaddr);
    loop {
        let resolved = vm_state.pagedir.lock().translate(upage);
        match resolved {
            Some((_, false)) => return false,
            Some((kpage, true)) => {
                palloc::with_page(kpage, |bytes| bytes[pg_ofs(uaddr) as usize] = byte);
                let mut pd = vm_state.pagedir.lock();
                pd.set_accessed(upage);
                pd.set_dirty(upage);
                return true;
            }
            None => {
                if !vm::page_fault(uaddr, true) {
                    return false;
                }
            }
        }
    }
}

fn contained_in_user(uaddr: u32, n: usize) -> bool {
    if n == 0 {
        return is_user_vaddr(uaddr);
    }
    match uaddr.checked_add(n as u32 - 1) {
        Some(last) => is_user_vaddr(uaddr) && is_user_vaddr(last),
        None => false,
    }
}

/// Copy `dst.len()` bytes from user space, byte by byte. Both endpoints
/// are checked before the first access.
pub fn memcpy_from_user(dst: &mut [u8], usrc: u32) -> bool {
    if !contained_in_user(usrc, dst.len()) {
        return false;
    }
    for (i, slot) in dst.iter_mut().enumerate() {
        match copy_byte_from_user(usrc + i as u32) {
            Some(byte) => *slot = byte,
            None => return false,
        }
    }
    true
}

/// Copy `src.len()` bytes into user space, byte by byte.
pub fn memcpy_to_user(udst: u32, src: &[u8]) -> bool {
    if !contained_in_user(udst, src.len()) {
        return false;
    }
    for (i, &byte) in src.iter().enumerate() {
        if !copy_byte_to_user(udst + i as u32, byte) {
            return false;
        }
    }
    true
}

/// Length of a null-terminated user string, not counting the
/// terminator. Bounded by the extent of user space.
pub fn strlen_user(uaddr: u32) -> Option<u32> {
    let mut len = 0u32;
    loop {
        let byte = copy_byte_from_user(uaddr.checked_add(len)?)?;
        if byte == 0 {
            return Some(len);
        }
        len += 1;
    }
}

/// Copy a null-terminated user string, truncated to `max` bytes.
pub fn strlcpy_from_user(uaddr: u32, max: usize) -> Option<String> {
    let len = strlen_user(uaddr)? as usize;
    let mut buf = vec![0u8; len.min(max)];
    if !memcpy_from_user(&mut buf, uaddr) {
        return None;
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}
