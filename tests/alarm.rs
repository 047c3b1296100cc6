//! Timed sleep: threads must not wake before their deadline and must be
//! runnable the moment it passes.
//!
//! The timer tick source is external to the kernel core, so the test
//! drives time by hand. One kernel boot per test binary.

use std::sync::{Arc, Mutex};

use ferrite_os::scheduler::{self, ThreadState};
use ferrite_os::{timer, KernelConfig};

#[test]
fn sleepers_wake_exactly_on_time() {
    ferrite_os::run(KernelConfig::default(), || {
        for _ in 0..100 {
            timer::interrupt();
        }
        assert_eq!(timer::ticks(), 100);

        let woke_at = Arc::new(Mutex::new(0i64));
        let woke = woke_at.clone();
        scheduler::spawn("sleeper", 40, move || {
            timer::sleep_until(200);
            *woke.lock().unwrap() = timer::ticks();
        })
        .unwrap();

        // The sleeper outranks us, so it already ran and went to sleep.
        while timer::ticks() < 199 {
            timer::interrupt();
            let info = scheduler::snapshot()
                .into_iter()
                .find(|t| t.name == "sleeper")
                .expect("sleeper alive");
            assert_eq!(info.state, ThreadState::Blocked, "woke early");
            assert_eq!(*woke_at.lock().unwrap(), 0);
        }
        scheduler::check_invariants();

        // Tick 200: the wake-up preempts us before this returns.
        timer::interrupt();
        assert_eq!(*woke_at.lock().unwrap(), 200);
        scheduler::check_invariants();

        // The relative form sleeps against the current tick count.
        let woke_at = Arc::new(Mutex::new(0i64));
        let woke = woke_at.clone();
        let start = timer::ticks();
        scheduler::spawn("napper", 40, move || {
            timer::sleep(5);
            *woke.lock().unwrap() = timer::ticks();
        })
        .unwrap();
        for _ in 0..5 {
            timer::interrupt();
        }
        assert_eq!(*woke_at.lock().unwrap(), start + 5);

        // Sleeping in the past returns on the very next tick.
        let woke_at = Arc::new(Mutex::new(-1i64));
        let woke = woke_at.clone();
        scheduler::spawn("eager", 40, move || {
            timer::sleep_until(0);
            *woke.lock().unwrap() = timer::ticks();
        })
        .unwrap();
        timer::interrupt();
        assert_eq!(*woke_at.lock().unwrap(), timer::ticks());
    });
}
