//! Priority donation through lock chains, and priority-ordered wakeup
//! of semaphores and condition variables.

use std::sync::Arc;

use ferrite_os::scheduler::{self, PRI_DEFAULT, PRI_MIN};
use ferrite_os::sync::{Condvar, Lock, Semaphore};
use ferrite_os::{console, println, KernelConfig};

#[test]
fn donation_and_wakeup_order() {
    ferrite_os::run(KernelConfig::default(), || {
        single_donation();
        nested_donation();
        donation_released_with_lock();
        semaphore_wakes_highest_priority_fifo();
        condvar_signals_highest_priority();
        try_variants_and_broadcast();
    });
}

/// H blocks on a lock we hold: our priority must rise to H's and fall
/// back to base once we release.
fn single_donation() {
    scheduler::set_priority(10);
    let lock = Arc::new(Lock::new());
    let done = Arc::new(Semaphore::new(0));
    lock.acquire();

    let (l, d) = (lock.clone(), done.clone());
    scheduler::spawn("donor", 50, move || {
        l.acquire();
        l.release();
        d.up();
    })
    .unwrap();

    // The donor preempted us, blocked on the lock, and donated.
    assert_eq!(scheduler::get_priority(), 50);
    scheduler::check_invariants();

    lock.release();
    done.down();
    assert_eq!(scheduler::get_priority(), 10);
    scheduler::set_priority(PRI_DEFAULT);
}

/// H waits on B held by M; M waits on A held by us. H's priority must
/// reach us through both hops.
fn nested_donation() {
    scheduler::set_priority(10);
    let lock_a = Arc::new(Lock::new());
    let lock_b = Arc::new(Lock::new());
    let done = Arc::new(Semaphore::new(0));
    lock_a.acquire();

    let (a, b, d) = (lock_a.clone(), lock_b.clone(), done.clone());
    scheduler::spawn("mid", 30, move || {
        b.acquire();
        a.acquire();
        a.release();
        b.release();
        d.up();
    })
    .unwrap();
    assert_eq!(scheduler::get_priority(), 30, "one hop");

    let (b, d) = (lock_b.clone(), done.clone());
    scheduler::spawn("high", 50, move || {
        b.acquire();
        b.release();
        d.up();
    })
    .unwrap();
    assert_eq!(scheduler::get_priority(), 50, "two hops");
    let mid = scheduler::snapshot()
        .into_iter()
        .find(|t| t.name == "mid")
        .unwrap();
    assert_eq!(mid.priority, 50, "intermediate holder elevated");
    scheduler::check_invariants();

    lock_a.release();
    done.down();
    done.down();
    assert_eq!(scheduler::get_priority(), 10);
    scheduler::check_invariants();
    scheduler::set_priority(PRI_DEFAULT);
}

/// Holding a second lock with a lesser donor keeps the larger donation
/// only while its lock is held.
fn donation_released_with_lock() {
    scheduler::set_priority(10);
    let lock_a = Arc::new(Lock::new());
    let lock_b = Arc::new(Lock::new());
    let done = Arc::new(Semaphore::new(0));
    lock_a.acquire();
    lock_b.acquire();

    let (a, d) = (lock_a.clone(), done.clone());
    scheduler::spawn("donor-a", 40, move || {
        a.acquire();
        a.release();
        d.up();
    })
    .unwrap();
    let (b, d) = (lock_b.clone(), done.clone());
    scheduler::spawn("donor-b", 25, move || {
        b.acquire();
        b.release();
        d.up();
    })
    .unwrap();
    assert_eq!(scheduler::get_priority(), 40);

    // Dropping A loses the 40-donation; the 25 through B remains.
    lock_a.release();
    done.down();
    assert_eq!(scheduler::get_priority(), 25);
    lock_b.release();
    done.down();
    assert_eq!(scheduler::get_priority(), 10);
    scheduler::set_priority(PRI_DEFAULT);
}

/// `up` hands the semaphore to the highest-priority waiter; equal
/// priorities wake in arrival order.
fn semaphore_wakes_highest_priority_fifo() {
    scheduler::set_priority(60);
    let sema = Arc::new(Semaphore::new(0));
    for (name, priority) in [("w-low", 30), ("w-first", 40), ("w-second", 40)] {
        let s = sema.clone();
        scheduler::spawn(name, priority, move || {
            s.down();
            println!("{}", scheduler::current_name());
        })
        .unwrap();
    }
    // Step below the waiters so all three run and block on `down`.
    scheduler::set_priority(PRI_MIN);
    console::take();
    scheduler::check_invariants();

    // Each `up` hands off to the best waiter, which preempts us.
    sema.up();
    sema.up();
    sema.up();
    assert_eq!(console::take(), "w-first\nw-second\nw-low\n");
    scheduler::set_priority(PRI_DEFAULT);
}

/// Non-blocking acquire attempts and condvar broadcast.
fn try_variants_and_broadcast() {
    let sema = Semaphore::new(1);
    assert!(sema.try_down());
    assert!(!sema.try_down());
    sema.up();
    assert!(sema.try_down());
    sema.up();

    let lock = Arc::new(Lock::new());
    assert!(lock.try_acquire());
    assert!(lock.held_by_current_thread());
    let l = lock.clone();
    let grabbed = Arc::new(Semaphore::new(0));
    let g = grabbed.clone();
    scheduler::spawn("contender", 50, move || {
        // The lock is taken; a try must fail without blocking.
        assert!(!l.try_acquire());
        g.up();
    })
    .unwrap();
    grabbed.down();
    lock.release();

    // Broadcast drains every waiter.
    scheduler::set_priority(60);
    let cond = Arc::new(Condvar::new());
    let woken = Arc::new(Semaphore::new(0));
    for i in 0..3 {
        let (l, c, w) = (lock.clone(), cond.clone(), woken.clone());
        scheduler::spawn(&format!("bcast{}", i), 40, move || {
            l.acquire();
            c.wait(&l);
            l.release();
            w.up();
        })
        .unwrap();
    }
    scheduler::set_priority(PRI_MIN);
    lock.acquire();
    cond.broadcast(&lock);
    lock.release();
    for _ in 0..3 {
        woken.down();
    }
    scheduler::set_priority(PRI_DEFAULT);
    scheduler::check_invariants();
}

/// `signal` wakes the highest-priority condvar waiter first.
fn condvar_signals_highest_priority() {
    scheduler::set_priority(60);
    let lock = Arc::new(Lock::new());
    let cond = Arc::new(Condvar::new());
    for (name, priority) in [("c-low", 20), ("c-high", 45)] {
        let (l, c) = (lock.clone(), cond.clone());
        scheduler::spawn(name, priority, move || {
            l.acquire();
            c.wait(&l);
            println!("{}", scheduler::current_name());
            l.release();
        })
        .unwrap();
    }
    // Let both waiters enter `wait` before signalling.
    scheduler::set_priority(PRI_MIN);
    console::take();

    lock.acquire();
    cond.signal(&lock);
    cond.signal(&lock);
    lock.release();
    assert_eq!(console::take(), "c-high\nc-low\n");
    scheduler::set_priority(PRI_DEFAULT);
    scheduler::check_invariants();
}
