//! Interrupt state for the simulated CPU.
//!
//! The interrupt flag is CPU state: it belongs to whichever thread is
//! running and is saved/restored across context switches. The simulation
//! keeps it in a thread-local cell on the backing host thread, which gives
//! exactly those semantics for free — a thread that disabled interrupts
//! and blocked resumes with them still disabled.
//!
//! Disabling interrupts is the kernel's lowest-level mutual exclusion:
//! with one simulated CPU, no other thread can run while the current one
//! holds the CPU, so state touched only with interrupts off is safe.
//! External handlers (the timer IRQ) run via [`external`], which models
//! the dispatcher: handler runs with interrupts off in interrupt context,
//! and a requested yield is deferred to the simulated `iret`.

use core::cell::Cell;

/// Interrupt level of the running thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    Off,
    On,
}

std::thread_local! {
    // New threads start with interrupts off; the scheduler enables them
    // once the thread body begins (the scheduler runs with interrupts off).
    static LEVEL: Cell<IntrLevel> = const { Cell::new(IntrLevel::Off) };
    static IN_EXTERNAL: Cell<bool> = const { Cell::new(false) };
    static YIELD_ON_RETURN: Cell<bool> = const { Cell::new(false) };
}

/// Current interrupt level.
pub fn get_level() -> IntrLevel {
    LEVEL.with(|l| l.get())
}

/// Set the interrupt level, returning the previous one.
pub fn set_level(level: IntrLevel) -> IntrLevel {
    LEVEL.with(|l| l.replace(level))
}

/// Disable interrupts, returning the previous level.
pub fn disable() -> IntrLevel {
    set_level(IntrLevel::Off)
}

/// Enable interrupts, returning the previous level. Must not be called
/// from within an external handler.
pub fn enable() -> IntrLevel {
    assert!(!context(), "interrupts enabled inside an external handler");
    set_level(IntrLevel::On)
}

/// True while an external (IRQ) handler is running.
pub fn context() -> bool {
    IN_EXTERNAL.with(|c| c.get())
}

/// Request a yield once the external handler returns. Only meaningful
/// from interrupt context.
pub fn yield_on_return() {
    assert!(context(), "yield_on_return outside an external handler");
    YIELD_ON_RETURN.with(|y| y.set(true));
}

/// Run `handler` as an external interrupt on top of the current thread.
///
/// The hardware only delivers external interrupts while the flag is set,
/// so calling this with interrupts disabled is a collaborator bug. On the
/// simulated `iret`, a pending yield request is honored — this is the
/// deferred preemption of `sema_up`-from-IRQ and quantum expiry.
pub fn external<F: FnOnce()>(handler: F) {
    assert!(!context(), "nested external interrupt");
    assert_eq!(
        get_level(),
        IntrLevel::On,
        "external interrupt delivered with interrupts disabled"
    );

    set_level(IntrLevel::Off);
    IN_EXTERNAL.with(|c| c.set(true));
    handler();
    IN_EXTERNAL.with(|c| c.set(false));
    set_level(IntrLevel::On);

    if YIELD_ON_RETURN.with(|y| y.replace(false)) {
        crate::scheduler::yield_now();
    }
}
