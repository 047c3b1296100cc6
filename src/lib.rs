//! FerriteOS — the core of a teaching-grade operating system kernel.
//!
//! One simulated CPU runs many cooperating kernel threads with priority
//! scheduling, priority donation through nested lock chains, and an MLFQS
//! alternative. User processes get demand-paged virtual memory with a
//! clock-hand eviction policy and a swap device. The hardware edges (timer
//! IRQ source, context switch, MMU, block device, keyboard, console) are
//! simulated collaborators with the same contracts a real machine would
//! provide, which is what lets the whole kernel boot inside a test binary.

pub mod console;
pub mod interrupt;
pub mod scheduler;
pub mod sync;
pub mod timer;
pub mod memory;
pub mod drivers;
pub mod fs;
pub mod vm;
pub mod loader;
pub mod process;
pub mod syscalls;
pub mod userland;

use core::sync::atomic::{AtomicBool, Ordering};

/// Errors surfaced by kernel-internal allocation paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free page in the relevant pool and nothing evictable.
    OutOfMemory,
    /// Executable failed validation or could not be loaded.
    LoadFailed,
}

/// Boot-time configuration for the kernel core.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Use the multi-level feedback queue scheduler instead of
    /// donation-based priority scheduling (`-o mlfqs`).
    pub mlfqs: bool,
    /// Pages in the kernel pool (thread stacks, kernel buffers).
    pub kernel_pool_pages: usize,
    /// Pages in the user pool (process frames). Exhausting this pool is
    /// what drives eviction.
    pub user_pool_pages: usize,
    /// Sectors on the swap block device. Zero means no swap device is
    /// registered.
    pub swap_sectors: usize,
    /// Timer ticks per scheduling quantum.
    pub time_slice: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            mlfqs: false,
            kernel_pool_pages: 256,
            user_pool_pages: 256,
            swap_sectors: 1024,
            time_slice: 4,
        }
    }
}

impl KernelConfig {
    /// Parse kernel command-line options. Only `-o mlfqs` affects the core.
    pub fn from_args<'a>(args: impl IntoIterator<Item = &'a str>) -> Self {
        let mut config = KernelConfig::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "-o" {
                if let Some("mlfqs") = args.next() {
                    config.mlfqs = true;
                }
            }
        }
        config
    }
}

static BOOTED: AtomicBool = AtomicBool::new(false);

/// Boot the kernel and run `main_fn` as the initial thread.
///
/// Initialization order is fixed and explicit: console, memory pools,
/// block devices, file system, threading, swap, syscalls; then the idle
/// thread is created and preemptive scheduling starts. The calling host
/// thread becomes the kernel's "main" thread; `run` returns when
/// `main_fn` does.
///
/// The kernel's global state can be initialized once per process, so a
/// test binary gets exactly one `run`.
pub fn run<F>(config: KernelConfig, main_fn: F)
where
    F: FnOnce() + Send,
{
    assert!(
        !BOOTED.swap(true, Ordering::SeqCst),
        "kernel already booted in this process"
    );

    // Thread death unwinds with a token payload (see scheduler::context);
    // keep the default hook quiet for those, loud for real panics.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if info.payload().is::<scheduler::context::ThreadExitToken>() {
            return;
        }
        default_hook(info);
    }));

    console::init();
    log::info!("FerriteOS booting (mlfqs={})", config.mlfqs);

    memory::init(&config);
    drivers::init(&config);
    fs::init();
    scheduler::init(&config);
    vm::swap::init();
    syscalls::init();

    // Start preemptive scheduling: creates the idle thread and enables
    // interrupts on the main thread.
    scheduler::start();

    main_fn();
}
