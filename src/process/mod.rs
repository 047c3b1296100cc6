//! Process lifecycle: execute, wait, exit.
//!
//! A process context is the durable part of a process — pid, exit code,
//! fd table, the load/exit handshake semaphores — owned by the parent's
//! children list so it survives the child thread until the parent waits
//! or exits. The child thread holds its own `Arc`; whoever drops last
//! frees it.

pub mod usermem;

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::fs::{self, File};
use crate::loader;
use crate::memory::{PGSIZE, PHYS_BASE};
use crate::println;
use crate::scheduler::thread::Tid;
use crate::scheduler::{self, PRI_DEFAULT};
use crate::userland;
use crate::vm::{self, ProcessVm};

/// A file-descriptor table entry. fd 0 and fd 1 are pseudo-entries for
/// the keyboard and the screen, created before any user file.
pub(crate) struct FdContext {
    pub fd: i32,
    pub kind: FdKind,
}

pub(crate) enum FdKind {
    KeyboardIn,
    ScreenOut,
    File(File),
}

/// The durable portion of a process.
pub struct ProcessContext {
    pid: AtomicU64,
    exit_code: AtomicI32,
    load_success: AtomicBool,
    /// Signalled by the child on exit; downed by the parent exactly once.
    pub(crate) exit_sema: crate::sync::Semaphore,
    /// Signalled by the child after attempting the executable load.
    pub(crate) load_sema: crate::sync::Semaphore,
    pub(crate) fd_table: Mutex<Vec<FdContext>>,
    /// The executable, held open with writes denied for the process
    /// lifetime.
    pub(crate) exe_file: Mutex<Option<Arc<Mutex<File>>>>,
    pub(crate) vm: Arc<ProcessVm>,
    /// Last-known user stack pointer, consulted by the stack-growth
    /// heuristic.
    user_esp: AtomicU32,
}

impl ProcessContext {
    pub fn new() -> Arc<ProcessContext> {
        Arc::new(ProcessContext {
            pid: AtomicU64::new(0),
            exit_code: AtomicI32::new(-1),
            load_success: AtomicBool::new(false),
            exit_sema: crate::sync::Semaphore::new(0),
            load_sema: crate::sync::Semaphore::new(0),
            fd_table: Mutex::new(Vec::new()),
            exe_file: Mutex::new(None),
            vm: ProcessVm::new(),
            user_esp: AtomicU32::new(PHYS_BASE),
        })
    }

    pub fn pid(&self) -> Tid {
        Tid(self.pid.load(Ordering::SeqCst))
    }

    pub(crate) fn set_pid(&self, tid: Tid) {
        self.pid.store(tid.0, Ordering::SeqCst);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub fn user_esp(&self) -> u32 {
        self.user_esp.load(Ordering::SeqCst)
    }

    pub(crate) fn set_user_esp(&self, esp: u32) {
        self.user_esp.store(esp, Ordering::SeqCst);
    }

    fn load_success(&self) -> bool {
        self.load_success.load(Ordering::SeqCst)
    }
}

struct ActiveSpace {
    vm: Arc<ProcessVm>,
    ctx: Arc<ProcessContext>,
}

/// Process context of the running thread; a syscall from a bare kernel
/// thread is a programming error.
pub(crate) fn current_ctx() -> Arc<ProcessContext> {
    scheduler::current_process_ctx().expect("no process context on this thread")
}

lazy_static! {
    /// The address space the simulated MMU currently resolves against;
    /// switched on every context switch, like CR3.
    static ref ACTIVE: Mutex<Option<ActiveSpace>> = Mutex::new(None);
}

/// Activate the address space of the thread being switched in.
pub(crate) fn activate(ctx: Option<Arc<ProcessContext>>) {
    *ACTIVE.lock() = ctx.map(|ctx| ActiveSpace {
        vm: ctx.vm.clone(),
        ctx,
    });
}

/// The active address space and its process, if any.
pub(crate) fn active() -> Option<(Arc<ProcessVm>, Arc<ProcessContext>)> {
    let active = ACTIVE.lock();
    active.as_ref().map(|a| (a.vm.clone(), a.ctx.clone()))
}

/// Start a new process running `cmd`. Blocks until the child reports
/// whether its executable loaded; returns the child's pid on success.
pub fn execute(cmd: &str) -> Option<Tid> {
    let prog_name = cmd.split_whitespace().next()?.to_string();
    let ctx = ProcessContext::new();
    let cmd_owned = String::from(cmd);
    let child_ctx = ctx.clone();
    let tid = scheduler::spawn_process(&prog_name, PRI_DEFAULT, ctx.clone(), move || {
        start_process(cmd_owned, child_ctx)
    })
    .ok()?;

    ctx.load_sema.down();
    if !ctx.load_success() {
        scheduler::remove_child(tid);
        return None;
    }
    Some(tid)
}

/// Child-side entry: load the executable, lay out the initial user
/// stack, report to the parent, and enter user code.
fn start_process(cmd: String, ctx: Arc<ProcessContext>) {
    let argv: Vec<String> = cmd.split_whitespace().map(String::from).collect();
    match load(&argv[0], &ctx) {
        Ok(program) => {
            init_fd_table(&ctx);

            let mut esp = PHYS_BASE;
            ctx.set_user_esp(esp);
            push_args(&argv, &mut esp);
            ctx.set_user_esp(esp);

            ctx.load_success.store(true, Ordering::SeqCst);
            ctx.load_sema.up();

            // The simulated interrupt-return into user space: run the
            // image's registered entry with the prepared stack.
            let status = program(esp);
            // User main returned without exit(); its return value is
            // the exit status.
            trigger_exit(status);
        }
        Err(err) => {
            log::debug!("load failed for '{}': {:?}", argv[0], err);
            ctx.load_success.store(false, Ordering::SeqCst);
            ctx.load_sema.up();
            scheduler::exit_thread();
        }
    }
}

/// Open and validate the executable, demand-map its segments and the
/// initial stack page, and resolve the entry point.
fn load(name: &str, ctx: &ProcessContext) -> Result<userland::UserProgram, loader::LoadError> {
    fs::FS_LOCK.acquire();
    let result = (|| {
        let mut file = fs::open(name).ok_or(loader::LoadError::NotFound)?;
        file.deny_write();

        let mut image = vec![0u8; file.length() as usize];
        file.seek(0);
        file.read(&mut image);
        let parsed = loader::parse(&image, file.length())?;

        let file = Arc::new(Mutex::new(file));
        for segment in &parsed.segments {
            loader::map_segment(&ctx.vm, file.clone(), segment)
                .ok_or(loader::LoadError::MapError)?;
        }

        // The initial stack: one anonymous page just below PHYS_BASE.
        vm::create_anonymous(&ctx.vm, PHYS_BASE - PGSIZE as u32, true)
            .ok_or(loader::LoadError::MapError)?;

        let program = userland::lookup(name).ok_or(loader::LoadError::NoEntry)?;
        log::trace!("load '{}': entry {:#x}", name, parsed.entry);

        *ctx.exe_file.lock() = Some(file);
        Ok(program)
    })();
    fs::FS_LOCK.release();
    result
}

fn init_fd_table(ctx: &ProcessContext) {
    let mut table = ctx.fd_table.lock();
    let fd0 = alloc_fd(&mut table, FdKind::KeyboardIn);
    let fd1 = alloc_fd(&mut table, FdKind::ScreenOut);
    assert_eq!((fd0, fd1), (0, 1));
}

/// Allocate the smallest unused fd and insert the entry, keeping the
/// table sorted by fd number.
pub(crate) fn alloc_fd(table: &mut Vec<FdContext>, kind: FdKind) -> i32 {
    let mut fd = 0;
    let mut pos = 0;
    for (i, entry) in table.iter().enumerate() {
        if entry.fd == fd {
            fd += 1;
            pos = i + 1;
        } else {
            break;
        }
    }
    table.insert(pos, FdContext { fd, kind });
    fd
}

/// Push the argv vector onto the initial user stack.
///
/// Layout, top down: argument strings in reverse order, stack pointer
/// rounded down to a 4-byte boundary, a NULL sentinel, the argv
/// pointers in index order (argv[0] lowest), a pointer to argv, argc,
/// and a dummy return address.
fn push_args(argv: &[String], esp: &mut u32) {
    let mut arg_addrs = vec![0u32; argv.len()];
    for (i, arg) in argv.iter().enumerate().rev() {
        let bytes = arg.as_bytes();
        *esp -= bytes.len() as u32 + 1;
        arg_addrs[i] = *esp;
        assert!(
            usermem::memcpy_to_user(*esp, bytes) && usermem::copy_byte_to_user(*esp + bytes.len() as u32, 0),
            "argv string push failed"
        );
    }

    *esp &= !3;

    let push_word = |esp: &mut u32, word: u32| {
        *esp -= 4;
        assert!(
            usermem::memcpy_to_user(*esp, &word.to_le_bytes()),
            "argv word push failed"
        );
    };

    push_word(esp, 0); // argv[argc] sentinel
    for i in (0..argv.len()).rev() {
        push_word(esp, arg_addrs[i]);
    }
    let argv_ptr = *esp;
    push_word(esp, argv_ptr);
    push_word(esp, argv.len() as u32);
    push_word(esp, 0); // dummy return address
}

/// Wait for a child to exit and reap it. Returns the child's exit code,
/// or -1 if `pid` is not an unwaited child of the caller.
pub fn wait(pid: Tid) -> i32 {
    let Some(ctx) = scheduler::find_child(pid) else {
        return -1;
    };
    ctx.exit_sema.down();
    let code = ctx.exit_code();
    scheduler::remove_child(pid);
    code
}

/// Exit the current process with `status`: publish the code, wake the
/// parent, print the exit line, and terminate the thread (which tears
/// down the process resources).
pub fn trigger_exit(status: i32) -> ! {
    let ctx = scheduler::current_process_ctx().expect("process exit from a kernel thread");
    ctx.exit_code.store(status, Ordering::SeqCst);
    ctx.exit_sema.up();
    println!("{}: exit({})", scheduler::current_name(), status);
    scheduler::exit_thread()
}

/// Release the current thread's process resources: close every fd,
/// re-allow writes to the executable and close it, write back and
/// unmap the `mmap` blocks, then destroy the address space. No-op for
/// kernel threads.
pub(crate) fn exit_cleanup() {
    let Some(ctx) = scheduler::current_process_ctx() else {
        return;
    };

    fs::FS_LOCK.acquire();
    ctx.fd_table.lock().clear();
    if let Some(exe) = ctx.exe_file.lock().take() {
        exe.lock().allow_write();
    }
    vm::munmap_all(&ctx.vm);
    fs::FS_LOCK.release();

    vm::destroy(&ctx.vm);
    activate(None);
}
