//! The system timer.
//!
//! The tick source itself is an external collaborator: something calls
//! [`interrupt`] once per tick. In this repository that something is the
//! idle thread (one tick per `hlt`, letting simulated time advance while
//! everyone sleeps) or a test driving time by hand. The handler runs in
//! interrupt context and does the per-tick accounting: statistics, MLFQS
//! updates, sleeper wake-ups behind the `earliest_wakeup_tick` fast
//! path, and quantum expiry.

use core::sync::atomic::{AtomicI64, Ordering};

use crate::interrupt as intr;
use crate::scheduler;

/// Timer interrupts per simulated second.
pub const TIMER_FREQ: i64 = 100;

static TICKS: AtomicI64 = AtomicI64::new(0);

/// Ticks elapsed since boot.
pub fn ticks() -> i64 {
    TICKS.load(Ordering::SeqCst)
}

/// The timer IRQ entry point. Called by the external tick source while
/// interrupts are enabled; runs the handler in interrupt context.
pub fn interrupt() {
    intr::external(|| {
        let now = TICKS.fetch_add(1, Ordering::SeqCst) + 1;
        scheduler::tick_handler(now, TIMER_FREQ);
    });
}

/// Sleep for `duration` ticks relative to now.
pub fn sleep(duration: i64) {
    sleep_until(ticks() + duration);
}

/// Sleep until the global tick counter reaches `wakeup_tick`.
pub fn sleep_until(wakeup_tick: i64) {
    scheduler::sleep_until(wakeup_tick);
}

/// One `hlt` worth of idle time: deliver the next timer interrupt. If no
/// thread is ready and none is sleeping, no interrupt can ever make
/// progress again — that is a deadlock in the client program.
pub(crate) fn idle_tick() {
    if scheduler::quiescent() {
        let threads = scheduler::snapshot();
        panic!(
            "system is idle with nothing to wake up; deadlock?\n{:#?}",
            threads
        );
    }
    interrupt();
}
