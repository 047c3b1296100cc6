//! The low-level CPU hand-off.
//!
//! On real hardware this is a few lines of assembly that save the
//! outgoing thread's callee-saved registers and resume the incoming
//! kernel stack. Here every kernel thread is backed by a parked host
//! thread and the "CPU" is possession of the right to run: `switch`
//! wakes the incoming thread's parker and parks the outgoing one. The
//! contract is the same — entered with interrupts off, returns in the
//! context of the incoming thread, and the previous thread is left for
//! the incoming one to reap.

use std::sync::{Condvar, Mutex};

/// One thread's parking spot. Wake-ups are token-based so an unpark that
/// races ahead of the park is not lost.
pub struct Parker {
    runnable: Mutex<bool>,
    cvar: Condvar,
}

impl Parker {
    pub fn new() -> Parker {
        Parker {
            runnable: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Block the calling host thread until [`unpark`](Self::unpark).
    pub fn park(&self) {
        let mut runnable = self.runnable.lock().expect("parker poisoned");
        while !*runnable {
            runnable = self.cvar.wait(runnable).expect("parker poisoned");
        }
        *runnable = false;
    }

    /// Hand the CPU to the parked thread.
    pub fn unpark(&self) {
        let mut runnable = self.runnable.lock().expect("parker poisoned");
        *runnable = true;
        self.cvar.notify_one();
    }
}

impl Default for Parker {
    fn default() -> Self {
        Parker::new()
    }
}

/// Payload carried by the controlled unwind that ends a dying thread's
/// host thread. The scheduler has already handed the CPU away when this
/// is thrown; the thread entry wrapper catches it and lets the host
/// thread finish.
pub struct ThreadExitToken;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unpark_before_park_is_not_lost() {
        let parker = Arc::new(Parker::new());
        parker.unpark();
        // Token already present: this must not block.
        parker.park();
    }
}
