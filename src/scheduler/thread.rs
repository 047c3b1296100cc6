//! Thread control blocks.

use std::sync::Arc;

use crate::memory::palloc::PageHandle;
use crate::process::ProcessContext;
use crate::scheduler::context::Parker;
use crate::scheduler::fixed::Fixed;
use crate::sync::LockId;

/// Unique, monotonically increasing thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tid(pub u64);

/// Lowest possible priority.
pub const PRI_MIN: i32 = 0;
/// Default priority for new threads.
pub const PRI_DEFAULT: i32 = 31;
/// Highest possible priority.
pub const PRI_MAX: i32 = 63;

/// Thread state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Blocked,
    Dying,
}

/// A single kernel thread.
///
/// Lives in the scheduler's thread table; every mutable field is guarded
/// by the scheduler lock. A thread is in at most one queue at a time:
/// the ready queue, the sleep list, or one semaphore's waiter queue.
pub struct Thread {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,

    /// Priority assigned by the owner, in [PRI_MIN, PRI_MAX].
    pub base_priority: i32,
    /// Effective priority: max(base_priority, donations). Never below
    /// `base_priority`.
    pub priority: i32,
    /// Locks currently owned, enumerated when recomputing donation.
    pub held_locks: Vec<LockId>,
    /// The one lock this thread is blocked on, if any.
    pub wait_on_lock: Option<LockId>,

    /// Tick at which a sleeping thread returns to READY.
    pub wakeup_tick: i64,

    /// MLFQS inputs.
    pub nice: i32,
    pub recent_cpu: Fixed,

    /// Kernel stack page; the context-switch tail frees it when a DYING
    /// thread is reaped. The initial thread has none (its stack was not
    /// obtained from the page allocator).
    pub stack: Option<PageHandle>,

    /// Hand-off point for the simulated CPU.
    pub parker: Arc<Parker>,

    /// Process context, only when running a user program.
    pub process_ctx: Option<Arc<ProcessContext>>,
    /// Parent thread (no ownership implied).
    pub parent: Option<Tid>,
    /// Contexts of child processes; owned here until the parent waits.
    pub children: Vec<Arc<ProcessContext>>,
}

impl Thread {
    pub fn new(tid: Tid, name: &str, priority: i32, parker: Arc<Parker>) -> Thread {
        assert!((PRI_MIN..=PRI_MAX).contains(&priority));
        Thread {
            tid,
            name: String::from(name),
            state: ThreadState::Blocked,
            base_priority: priority,
            priority,
            held_locks: Vec::new(),
            wait_on_lock: None,
            wakeup_tick: 0,
            nice: 0,
            recent_cpu: Fixed::ZERO,
            stack: None,
            parker,
            process_ctx: None,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Snapshot of one thread for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    pub priority: i32,
    pub base_priority: i32,
}
