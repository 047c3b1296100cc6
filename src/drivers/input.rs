//! Keyboard input queue.
//!
//! The keyboard collaborator pushes bytes in; fd 0 drains them one
//! blocking byte at a time. A counting semaphore tracks available bytes
//! so readers sleep instead of polling.

use std::collections::VecDeque;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::sync::Semaphore;

struct InputQueue {
    buffer: Mutex<VecDeque<u8>>,
    available: Semaphore,
}

lazy_static! {
    static ref INPUT: InputQueue = InputQueue {
        buffer: Mutex::new(VecDeque::new()),
        available: Semaphore::new(0),
    };
}

/// Feed bytes from the keyboard side. Callable from any kernel thread.
pub fn feed(bytes: &[u8]) {
    for &b in bytes {
        INPUT.buffer.lock().push_back(b);
        INPUT.available.up();
    }
}

/// Take one byte, blocking until a key arrives.
pub fn getc() -> u8 {
    INPUT.available.down();
    INPUT
        .buffer
        .lock()
        .pop_front()
        .expect("input semaphore out of sync")
}

/// Bytes currently buffered.
pub fn pending() -> usize {
    INPUT.buffer.lock().len()
}
