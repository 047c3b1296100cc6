//! Thread table, ready queue and the scheduling loop.
//!
//! All mutable scheduling state — the thread table, the ready queue, the
//! sleep list and the synchronization registries — lives in the global
//! [`SCHEDULER`] behind one spin lock. Critical sections are short and
//! the lock is never held across a context switch: `schedule` picks the
//! next thread, drops the lock, and only then hands the CPU over.
//!
//! The ready queue is kept sorted by effective priority, descending,
//! FIFO among equals. `next_thread_to_run` pops the head; when the queue
//! is empty the idle thread runs. The idle thread is never queued.

pub mod context;
pub mod fixed;
pub(crate) mod mlfqs;
pub mod thread;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::interrupt;
use crate::memory::palloc::{self, Pool};
use crate::process::{self, ProcessContext};
use crate::sync::{Lock, LockState, Semaphore, SemaState, Slots};
use crate::KernelConfig;
use crate::KernelError;
use context::{Parker, ThreadExitToken};
use fixed::Fixed;
use thread::Thread;

pub use thread::{ThreadInfo, ThreadState, Tid, PRI_DEFAULT, PRI_MAX, PRI_MIN};

/// Upper bound on nice values; the lower bound is the negation.
pub const NICE_MAX: i32 = 20;

pub struct Scheduler {
    pub(crate) threads: BTreeMap<Tid, Thread>,
    /// Tids in READY state, sorted by effective priority descending,
    /// stable FIFO on ties.
    pub(crate) ready: Vec<Tid>,
    /// Tids blocked in a timed sleep, in no particular order.
    pub(crate) sleepers: Vec<Tid>,
    /// Minimum `wakeup_tick` over `sleepers`; `i64::MAX` when empty.
    pub(crate) earliest_wakeup: i64,
    pub(crate) current: Tid,
    /// The outgoing side of an in-flight context switch, reaped by the
    /// incoming thread in `schedule_tail`.
    prev: Option<Tid>,
    pub(crate) idle: Option<Tid>,
    next_tid: u64,

    pub(crate) mlfqs: bool,
    load_avg: Fixed,
    time_slice: u32,
    slice_ticks: u32,

    idle_ticks: i64,
    kernel_ticks: i64,
    user_ticks: i64,

    /// Semaphore states, keyed by `SemaId`.
    pub(crate) semas: Slots<SemaState>,
    /// Lock states, keyed by `LockId`.
    pub(crate) locks: Slots<LockState>,
}

pub(crate) type SchedGuard = spin::MutexGuard<'static, Scheduler>;

lazy_static! {
    pub(crate) static ref SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());
    static ref TID_LOCK: Lock = Lock::new();
}

impl Scheduler {
    fn new() -> Scheduler {
        Scheduler {
            threads: BTreeMap::new(),
            ready: Vec::new(),
            sleepers: Vec::new(),
            earliest_wakeup: i64::MAX,
            current: Tid(0),
            prev: None,
            idle: None,
            next_tid: 1,
            mlfqs: false,
            load_avg: Fixed::ZERO,
            time_slice: 4,
            slice_ticks: 0,
            idle_ticks: 0,
            kernel_ticks: 0,
            user_ticks: 0,
            semas: Slots::new(),
            locks: Slots::new(),
        }
    }

    pub(crate) fn thread(&self, tid: Tid) -> &Thread {
        self.threads.get(&tid).expect("no such thread")
    }

    pub(crate) fn thread_mut(&mut self, tid: Tid) -> &mut Thread {
        self.threads.get_mut(&tid).expect("no such thread")
    }

    /// Insert into the ready queue keeping it sorted by priority
    /// descending; equal priorities go behind existing ones (FIFO).
    pub(crate) fn insert_ready(&mut self, tid: Tid) {
        let priority = self.thread(tid).priority;
        let pos = self
            .ready
            .iter()
            .position(|&t| self.thread(t).priority < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, tid);
    }

    /// Transition a BLOCKED thread to READY. Does not preempt; the
    /// caller decides whether to yield.
    pub(crate) fn unblock(&mut self, tid: Tid) {
        assert_eq!(self.thread(tid).state, ThreadState::Blocked);
        self.insert_ready(tid);
        self.thread_mut(tid).state = ThreadState::Ready;
    }

    /// Re-sort one READY thread after its priority changed.
    pub(crate) fn fix_ready_order(&mut self, tid: Tid) {
        if let Some(pos) = self.ready.iter().position(|&t| t == tid) {
            self.ready.remove(pos);
            self.insert_ready(tid);
        }
    }

    fn pop_next(&mut self) -> Tid {
        if self.ready.is_empty() {
            self.idle.expect("ready queue empty before idle thread exists")
        } else {
            self.ready.remove(0)
        }
    }

    /// Whether the head of the ready queue outranks the running thread.
    pub(crate) fn preemptible(&self) -> bool {
        match self.ready.first() {
            Some(&head) => self.thread(head).priority > self.thread(self.current).priority,
            None => false,
        }
    }

    /// Effective priority from held-lock donations, zero under MLFQS.
    pub(crate) fn donation_to(&self, tid: Tid) -> i32 {
        if self.mlfqs {
            return 0;
        }
        self.thread(tid)
            .held_locks
            .iter()
            .map(|&lock| crate::sync::lock_donation(self, lock))
            .max()
            .unwrap_or(0)
    }

    /// Recompute one thread's effective priority.
    pub(crate) fn fix_priority(&mut self, tid: Tid) {
        if self.mlfqs {
            let priority = mlfqs::priority_for(self.thread(tid));
            self.thread_mut(tid).priority = priority;
            return;
        }
        let donation = self.donation_to(tid);
        let t = self.thread_mut(tid);
        t.priority = donation.max(t.base_priority);
    }

    fn fix_priority_all(&mut self) {
        let tids: Vec<Tid> = self.threads.keys().copied().collect();
        for tid in tids {
            self.fix_priority(tid);
        }
        // Many priorities may have moved; rebuild the queue order. The
        // sort is stable, so FIFO among equals is preserved.
        let mut order: Vec<(Tid, i32)> = self
            .ready
            .iter()
            .map(|&t| (t, self.thread(t).priority))
            .collect();
        order.sort_by(|a, b| b.1.cmp(&a.1));
        self.ready = order.into_iter().map(|(t, _)| t).collect();
    }

    /// Wake every sleeper whose deadline has passed and recompute the
    /// minimum wakeup tick.
    fn wakeup(&mut self, now: i64) {
        let due: Vec<Tid> = self
            .sleepers
            .iter()
            .copied()
            .filter(|&t| self.thread(t).wakeup_tick <= now)
            .collect();
        self.sleepers.retain(|t| !due.contains(t));
        for tid in due {
            self.unblock(tid);
        }
        self.earliest_wakeup = self
            .sleepers
            .iter()
            .map(|&t| self.thread(t).wakeup_tick)
            .min()
            .unwrap_or(i64::MAX);
    }
}

/// Initialize the threading system, transforming the calling host thread
/// into the kernel's "main" thread.
pub fn init(config: &KernelConfig) {
    assert_eq!(interrupt::get_level(), interrupt::IntrLevel::Off);

    let mut s = SCHEDULER.lock();
    assert!(s.threads.is_empty(), "scheduler initialized twice");
    s.mlfqs = config.mlfqs;
    s.time_slice = config.time_slice;

    // The initial thread is allocated by hand: the tid lock cannot be
    // used before at least one thread exists.
    let tid = Tid(s.next_tid);
    s.next_tid += 1;
    let mut main = Thread::new(tid, "main", PRI_DEFAULT, Arc::new(Parker::new()));
    main.state = ThreadState::Running;
    s.threads.insert(tid, main);
    s.current = tid;
}

/// Start preemptive scheduling: create the idle thread and enable
/// interrupts on the main thread.
pub fn start() {
    let started = Arc::new(Semaphore::new(0));
    let handshake = started.clone();
    let tid = spawn("idle", PRI_MIN, move || idle_loop(handshake)).expect("idle thread");
    SCHEDULER.lock().idle = Some(tid);

    interrupt::enable();

    // Wait for the idle thread to run once and check in.
    started.down();
}

/// Executes when no other thread is ready. It blocks immediately; the
/// scheduler hands it the CPU only as a fallback, at which point it lets
/// simulated time advance by one tick (the `hlt`-until-IRQ of a real
/// machine) and blocks again.
fn idle_loop(started: Arc<Semaphore>) {
    started.up();
    loop {
        interrupt::disable();
        block_current();
        interrupt::enable();
        crate::timer::idle_tick();
    }
}

/// Create a new kernel thread and add it to the ready queue. May preempt
/// the caller if the new thread outranks it. Fails with `OutOfMemory`
/// when no kernel stack page can be allocated.
pub fn spawn<F>(name: &str, priority: i32, f: F) -> Result<Tid, KernelError>
where
    F: FnOnce() + Send + 'static,
{
    create_thread(name, priority, None, f)
}

/// Like [`spawn`], but links a process context to the new thread and
/// records it in the creator's children list before the thread can run.
pub(crate) fn spawn_process<F>(
    name: &str,
    priority: i32,
    ctx: Arc<ProcessContext>,
    f: F,
) -> Result<Tid, KernelError>
where
    F: FnOnce() + Send + 'static,
{
    create_thread(name, priority, Some(ctx), f)
}

fn create_thread<F>(
    name: &str,
    priority: i32,
    ctx: Option<Arc<ProcessContext>>,
    f: F,
) -> Result<Tid, KernelError>
where
    F: FnOnce() + Send + 'static,
{
    let stack = palloc::get_page(Pool::Kernel).ok_or(KernelError::OutOfMemory)?;
    let tid = allocate_tid();
    let parker = Arc::new(Parker::new());

    {
        let mut s = SCHEDULER.lock();
        let mut t = Thread::new(tid, name, priority, parker.clone());
        t.stack = Some(stack);
        t.parent = Some(s.current);
        if let Some(ctx) = ctx {
            ctx.set_pid(tid);
            t.process_ctx = Some(ctx.clone());
            let cur = s.current;
            s.thread_mut(cur).children.push(ctx);
        }
        s.threads.insert(tid, t);
    }

    // The backing host thread parks until the scheduler first hands it
    // the CPU.
    let thread_name = String::from(name);
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
                parker.park();
                schedule_tail_on_entry();
                interrupt::enable();
                f();
                exit_thread();
            }));
            match result {
                Err(payload) if payload.is::<ThreadExitToken>() => {
                    // Normal death: the CPU was handed away in
                    // exit_thread; the host thread just finishes.
                }
                Err(_) => {
                    // A kernel thread panicked for real. Nothing can
                    // reschedule sanely past this point.
                    eprintln!("kernel thread panicked; aborting");
                    std::process::abort();
                }
                Ok(()) => unreachable!("thread body returned without exiting"),
            }
        })
        .expect("host thread spawn failed");

    let old = interrupt::disable();
    SCHEDULER.lock().unblock(tid);
    interrupt::set_level(old);

    if preemptible() {
        yield_now();
    }
    Ok(tid)
}

fn allocate_tid() -> Tid {
    TID_LOCK.acquire();
    let tid = {
        let mut s = SCHEDULER.lock();
        let tid = Tid(s.next_tid);
        s.next_tid += 1;
        tid
    };
    TID_LOCK.release();
    tid
}

/// Tid of the running thread.
pub fn current_tid() -> Tid {
    let s = SCHEDULER.lock();
    s.current
}

/// Name of the running thread.
pub fn current_name() -> String {
    let s = SCHEDULER.lock();
    s.thread(s.current).name.clone()
}

pub(crate) fn current_process_ctx() -> Option<Arc<ProcessContext>> {
    let s = SCHEDULER.lock();
    s.thread(s.current).process_ctx.clone()
}

/// Find a child process context of the running thread by pid.
pub(crate) fn find_child(pid: Tid) -> Option<Arc<ProcessContext>> {
    let s = SCHEDULER.lock();
    s.thread(s.current)
        .children
        .iter()
        .find(|ctx| ctx.pid() == pid)
        .cloned()
}

/// Unlink a child process context from the running thread. The context
/// is dropped outside the scheduler lock: its semaphores re-enter it.
pub(crate) fn remove_child(pid: Tid) {
    let removed = {
        let mut s = SCHEDULER.lock();
        let cur = s.current;
        let children = &mut s.thread_mut(cur).children;
        children
            .iter()
            .position(|ctx| ctx.pid() == pid)
            .map(|pos| children.remove(pos))
    };
    drop(removed);
}

/// Yield the CPU to the highest-priority ready thread; the caller stays
/// READY and may be rescheduled immediately.
pub fn yield_now() {
    assert!(!interrupt::context());

    let old = interrupt::disable();
    let mut s = SCHEDULER.lock();
    let cur = s.current;
    if Some(cur) != s.idle {
        s.insert_ready(cur);
    }
    s.thread_mut(cur).state = ThreadState::Ready;
    let s = schedule(s);
    drop(s);
    interrupt::set_level(old);
}

/// Whether the ready-queue head outranks the running thread.
pub(crate) fn preemptible() -> bool {
    SCHEDULER.lock().preemptible()
}

/// Block the running thread and schedule another. Returns once this
/// thread is unblocked and scheduled again. Must be called with
/// interrupts off, outside an interrupt handler.
pub(crate) fn block_current() {
    assert!(!interrupt::context());
    assert_eq!(interrupt::get_level(), interrupt::IntrLevel::Off);

    let s = SCHEDULER.lock();
    let s = block(s);
    drop(s);
}

/// Block with the scheduler lock already held; returns the re-acquired
/// guard once this thread runs again.
pub(crate) fn block(mut s: SchedGuard) -> SchedGuard {
    let cur = s.current;
    s.thread_mut(cur).state = ThreadState::Blocked;
    schedule(s)
}

/// Pick and switch to the next thread. At entry the running thread's
/// state must already have been changed away from RUNNING. Returns with
/// the lock re-acquired in the context of the (re)scheduled caller.
pub(crate) fn schedule(mut s: SchedGuard) -> SchedGuard {
    assert_eq!(interrupt::get_level(), interrupt::IntrLevel::Off);

    let cur = s.current;
    debug_assert_ne!(s.thread(cur).state, ThreadState::Running);

    let next = s.pop_next();
    if next == cur {
        // The caller is still the best choice; keep running.
        s.thread_mut(cur).state = ThreadState::Running;
        s.slice_ticks = 0;
        return s;
    }

    s.prev = Some(cur);
    s.current = next;
    let next_parker = s.thread(next).parker.clone();
    let my_parker = s.thread(cur).parker.clone();
    drop(s);

    // Hand over the CPU, then wait for it to come back.
    next_parker.unpark();
    my_parker.park();

    let mut s = SCHEDULER.lock();
    if let Some(dead) = schedule_tail(&mut s) {
        // Destroying a thread can drop semaphores, which re-enter the
        // scheduler lock; finish the reap without it.
        drop(s);
        drop(dead);
        s = SCHEDULER.lock();
    }
    s
}

/// Completes a switch in the context of the incoming thread: mark it
/// running, start a fresh time slice, activate its address space, and
/// pull out the previous thread for destruction if it is dying. The
/// caller drops the returned corpse after releasing the scheduler lock.
#[must_use]
fn schedule_tail(s: &mut Scheduler) -> Option<Thread> {
    let cur = s.current;
    s.thread_mut(cur).state = ThreadState::Running;
    s.slice_ticks = 0;

    let mut dead = None;
    if let Some(prev) = s.prev.take() {
        if prev != cur && s.thread(prev).state == ThreadState::Dying {
            let corpse = s.threads.remove(&prev).expect("dying thread vanished");
            if let Some(page) = corpse.stack {
                palloc::free_page(page);
            }
            dead = Some(corpse);
        }
    }

    process::activate(s.thread(cur).process_ctx.clone());
    dead
}

fn schedule_tail_on_entry() {
    let mut s = SCHEDULER.lock();
    let dead = schedule_tail(&mut s);
    drop(s);
    drop(dead);
}

/// Deschedule and destroy the running thread. The next thread reaps the
/// kernel stack in the tail of its switch. Never returns.
pub fn exit_thread() -> ! {
    assert!(!interrupt::context());

    process::exit_cleanup();

    interrupt::disable();
    let mut s = SCHEDULER.lock();
    let cur = s.current;
    s.thread_mut(cur).state = ThreadState::Dying;

    let next = s.pop_next();
    assert_ne!(next, cur, "dying thread rescheduled");
    s.prev = Some(cur);
    s.current = next;
    let next_parker = s.thread(next).parker.clone();
    drop(s);
    next_parker.unpark();

    // Unwind the host thread; the entry wrapper swallows the token.
    std::panic::panic_any(ThreadExitToken)
}

/// Put the running thread to sleep until the given tick. The idle thread
/// returns immediately instead of sleeping.
pub(crate) fn sleep_until(wakeup_tick: i64) {
    assert!(!interrupt::context());

    let old = interrupt::disable();
    let mut s = SCHEDULER.lock();
    let cur = s.current;
    if Some(cur) == s.idle {
        drop(s);
        interrupt::set_level(old);
        return;
    }
    s.thread_mut(cur).wakeup_tick = wakeup_tick;
    if s.earliest_wakeup > wakeup_tick {
        s.earliest_wakeup = wakeup_tick;
    }
    s.sleepers.push(cur);
    s.thread_mut(cur).state = ThreadState::Blocked;
    let s = schedule(s);
    drop(s);
    interrupt::set_level(old);
}

/// Timer-tick bookkeeping; runs in interrupt context. `now` is the tick
/// count after incrementing.
pub(crate) fn tick_handler(now: i64, timer_freq: i64) {
    assert!(interrupt::context());

    let mut s = SCHEDULER.lock();
    let cur = s.current;

    // Account the tick.
    if Some(cur) == s.idle {
        s.idle_ticks += 1;
    } else if s.thread(cur).process_ctx.is_some() {
        s.user_ticks += 1;
    } else {
        s.kernel_ticks += 1;
    }

    if s.mlfqs {
        if Some(cur) != s.idle {
            let rc = s.thread(cur).recent_cpu;
            s.thread_mut(cur).recent_cpu = rc + Fixed::from_int(1);
        }
        if now % timer_freq == 0 {
            mlfqs::update_load_avg(&mut s);
            mlfqs::update_recent_cpu_all(&mut s);
        }
        if now % 4 == 0 {
            s.fix_priority_all();
        }
    }

    // Sleep wake-ups, gated by the fast path.
    if now >= s.earliest_wakeup {
        s.wakeup(now);
    }

    // Quantum accounting.
    s.slice_ticks += 1;
    let expired = s.slice_ticks >= s.time_slice;
    let preempt = s.preemptible();
    drop(s);

    if expired || preempt {
        interrupt::yield_on_return();
    }
}

/// True when nothing is ready and nothing is sleeping — with the idle
/// thread running, no future event can change that.
pub(crate) fn quiescent() -> bool {
    let s = SCHEDULER.lock();
    s.ready.is_empty() && s.sleepers.is_empty()
}

/// Set the running thread's base priority; its effective priority may
/// stay higher through donations. A no-op under MLFQS.
pub fn set_priority(new_priority: i32) {
    assert!(!interrupt::context());
    assert!((PRI_MIN..=PRI_MAX).contains(&new_priority));

    {
        let mut s = SCHEDULER.lock();
        if s.mlfqs {
            return;
        }
        let cur = s.current;
        s.thread_mut(cur).base_priority = new_priority;
        s.fix_priority(cur);
        if let Some(lock) = s.thread(cur).wait_on_lock {
            crate::sync::propagate_donation(&mut s, lock, 0);
        }
    }
    if preemptible() {
        yield_now();
    }
}

/// Effective priority of the running thread.
pub fn get_priority() -> i32 {
    let s = SCHEDULER.lock();
    s.thread(s.current).priority
}

/// Set the running thread's nice value, clamped to [-20, 20], and
/// recompute its priority.
pub fn set_nice(nice: i32) {
    {
        let mut s = SCHEDULER.lock();
        let cur = s.current;
        s.thread_mut(cur).nice = nice.clamp(-NICE_MAX, NICE_MAX);
        s.fix_priority(cur);
    }
    if preemptible() {
        yield_now();
    }
}

pub fn get_nice() -> i32 {
    let s = SCHEDULER.lock();
    s.thread(s.current).nice
}

/// 100 times the system load average, rounded.
pub fn load_avg_x100() -> i32 {
    SCHEDULER.lock().load_avg.mul_int(100).to_int_round()
}

/// 100 times the running thread's recent_cpu, rounded.
pub fn recent_cpu_x100() -> i32 {
    let s = SCHEDULER.lock();
    s.thread(s.current).recent_cpu.mul_int(100).to_int_round()
}

/// Timer ticks spent in (idle, kernel, user) threads.
pub fn tick_stats() -> (i64, i64, i64) {
    let s = SCHEDULER.lock();
    (s.idle_ticks, s.kernel_ticks, s.user_ticks)
}

/// Snapshot of every thread, for diagnostics and tests.
pub fn snapshot() -> Vec<ThreadInfo> {
    let s = SCHEDULER.lock();
    s.threads
        .values()
        .map(|t| ThreadInfo {
            tid: t.tid,
            name: t.name.clone(),
            state: t.state,
            priority: t.priority,
            base_priority: t.base_priority,
        })
        .collect()
}

/// Check the scheduler's structural invariants. Intended for tests;
/// panics on violation.
pub fn check_invariants() {
    let s = SCHEDULER.lock();

    // Exactly one RUNNING thread, and it is `current`.
    let running: Vec<Tid> = s
        .threads
        .values()
        .filter(|t| t.state == ThreadState::Running)
        .map(|t| t.tid)
        .collect();
    assert_eq!(running, vec![s.current], "exactly one RUNNING thread");

    // Ready queue sorted by priority, descending.
    for pair in s.ready.windows(2) {
        assert!(
            s.thread(pair[0]).priority >= s.thread(pair[1]).priority,
            "ready queue out of order"
        );
    }

    for t in s.threads.values() {
        // Under MLFQS base_priority is unused; computed priorities may
        // land anywhere in range.
        if !s.mlfqs {
            assert!(t.priority >= t.base_priority, "priority below base");
        }

        // Queue membership is exclusive and matches the state.
        let in_ready = s.ready.contains(&t.tid);
        let in_sleep = s.sleepers.contains(&t.tid);
        let in_sema = s
            .semas
            .iter()
            .any(|sema| sema.waiters.contains(&t.tid));
        let memberships = [in_ready, in_sleep, in_sema]
            .iter()
            .filter(|&&b| b)
            .count();
        match t.state {
            ThreadState::Ready => {
                if Some(t.tid) != s.idle {
                    assert!(in_ready && memberships == 1, "READY thread not queued once");
                }
            }
            ThreadState::Blocked => {
                if Some(t.tid) != s.idle {
                    assert!(
                        memberships == 1,
                        "BLOCKED thread {} in {} waiter collections",
                        t.name,
                        memberships
                    );
                }
            }
            _ => assert_eq!(memberships, 0, "running/dying thread still queued"),
        }

        // A thread waiting on a lock is in that lock's waiter queue and
        // does not own it.
        if let Some(lock) = t.wait_on_lock {
            let state = s.locks.get(lock.0);
            assert_ne!(state.owner, Some(t.tid), "thread waits on its own lock");
            assert!(
                s.semas.get(state.sema.0).waiters.contains(&t.tid),
                "wait_on_lock without waiter entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(tid: u64, priority: i32) -> Thread {
        Thread::new(Tid(tid), "t", priority, Arc::new(Parker::new()))
    }

    #[test]
    fn ready_queue_orders_by_priority_with_fifo_ties() {
        let mut s = Scheduler::new();
        for (tid, pri) in [(1, 10), (2, 30), (3, 30), (4, 20)] {
            s.threads.insert(Tid(tid), bare(tid, pri));
            s.insert_ready(Tid(tid));
        }
        assert_eq!(s.ready, vec![Tid(2), Tid(3), Tid(4), Tid(1)]);

        // Raising a thread re-sorts it behind equals.
        s.thread_mut(Tid(1)).priority = 30;
        s.fix_ready_order(Tid(1));
        assert_eq!(s.ready, vec![Tid(2), Tid(3), Tid(1), Tid(4)]);
    }

    #[test]
    fn wakeup_recomputes_minimum() {
        let mut s = Scheduler::new();
        for (tid, tick) in [(1, 100), (2, 200), (3, 150)] {
            s.threads.insert(Tid(tid), bare(tid, PRI_DEFAULT));
            s.thread_mut(Tid(tid)).wakeup_tick = tick;
            s.sleepers.push(Tid(tid));
        }
        s.earliest_wakeup = 100;

        s.wakeup(120);
        assert_eq!(s.sleepers, vec![Tid(2), Tid(3)]);
        assert_eq!(s.earliest_wakeup, 150);
        assert_eq!(s.thread(Tid(1)).state, ThreadState::Ready);

        s.wakeup(500);
        assert!(s.sleepers.is_empty());
        assert_eq!(s.earliest_wakeup, i64::MAX);
    }
}
