//! The virtual-memory manager.
//!
//! Each process owns a mapping table from page-aligned user addresses to
//! [`MmapInfo`]s, a list of its frames, and the blocks created by the
//! `mmap` system call. Declaring a mapping installs a stub PTE; the
//! contents materialize on the first fault, from file, swap, or zero
//! fill. When the user pool runs dry the fault path evicts frames via
//! the clock algorithm in [`swap`] until an allocation succeeds.
//!
//! The whole fault path runs under the file-system lock — eviction may
//! have to write a dirty page back to its file — which also serializes
//! faults against each other. That is the documented lock order:
//! filesystem lock, then swap lock, then the short spin sections.

pub mod frame;
pub mod mmap;
pub mod swap;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::fs::{self, File};
use crate::memory::pagedir::PageDir;
use crate::memory::palloc::{self, Pool};
use crate::memory::{pg_ofs, pg_round_down, PGSIZE, PHYS_BASE, STACK_GROW_SLACK, STACK_LIMIT};
use crate::process;
use crate::sync::Slots;
use frame::{Frame, FrameId};
use mmap::{Backing, MapId, MmapInfo, MmapUserBlock};

pub(crate) struct VmTables {
    pub maps: Slots<MmapInfo>,
    pub frames: Slots<Frame>,
}

lazy_static! {
    pub(crate) static ref VM: Mutex<VmTables> = Mutex::new(VmTables {
        maps: Slots::new(),
        frames: Slots::new(),
    });
}

/// Per-process virtual-memory state.
pub struct ProcessVm {
    pub(crate) pagedir: Arc<Mutex<PageDir>>,
    /// upage -> mapping, the per-process mapping table.
    pub(crate) mmaps: Mutex<BTreeMap<u32, MapId>>,
    /// Frames owned by this process.
    pub(crate) frames: Mutex<Vec<FrameId>>,
    /// Blocks created by the `mmap` system call.
    pub(crate) blocks: Mutex<Vec<MmapUserBlock>>,
    next_mapid: AtomicI32,
}

impl ProcessVm {
    pub fn new() -> Arc<ProcessVm> {
        Arc::new(ProcessVm {
            pagedir: Arc::new(Mutex::new(PageDir::new())),
            mmaps: Mutex::new(BTreeMap::new()),
            frames: Mutex::new(Vec::new()),
            blocks: Mutex::new(Vec::new()),
            next_mapid: AtomicI32::new(1),
        })
    }
}

/// Declare an anonymous zero-fill mapping at `upage`.
pub(crate) fn create_anonymous(vm: &ProcessVm, upage: u32, writable: bool) -> Option<MapId> {
    create_mapping(vm, upage, writable, Backing::Anonymous)
}

/// Declare a file-backed mapping of `size` bytes at `offset`.
pub(crate) fn create_file_map(
    vm: &ProcessVm,
    upage: u32,
    file: Arc<Mutex<File>>,
    writable: bool,
    exe: bool,
    offset: u32,
    size: u32,
) -> Option<MapId> {
    assert!(size as usize <= PGSIZE);
    create_mapping(
        vm,
        upage,
        writable,
        Backing::File {
            file,
            offset,
            size,
            exe,
        },
    )
}

fn create_mapping(vm: &ProcessVm, upage: u32, writable: bool, backing: Backing) -> Option<MapId> {
    assert_eq!(pg_ofs(upage), 0);

    let mut mmaps = vm.mmaps.lock();
    if mmaps.contains_key(&upage) {
        return None;
    }

    let map_id;
    {
        let mut vt = VM.lock();
        let frame_id = FrameId(vt.frames.alloc(Frame::new_stub()));
        map_id = MapId(vt.maps.alloc(MmapInfo {
            upage,
            writable,
            backing,
            frame: frame_id,
            pagedir: vm.pagedir.clone(),
        }));
        vt.frames.get_mut(frame_id.0).mappings.push(map_id);
        vm.frames.lock().push(frame_id);
    }

    let installed = vm.pagedir.lock().set_page_stub(upage, writable);
    assert!(installed, "mapping table and page table out of sync");
    mmaps.insert(upage, map_id);
    Some(map_id)
}

/// Handle a not-present fault at `fault_addr`. Returns false when the
/// fault is fatal for the process.
pub(crate) fn page_fault(fault_addr: u32, write: bool) -> bool {
    let Some((vm, ctx)) = process::active() else {
        return false;
    };

    // The fault may read the backing file or write an evicted page back
    // to one; take the file-system lock first, per the lock order.
    fs::FS_LOCK.acquire();
    let handled = handle_fault(&vm, &ctx, fault_addr, write);
    fs::FS_LOCK.release();
    handled
}

fn handle_fault(
    vm: &ProcessVm,
    ctx: &process::ProcessContext,
    fault_addr: u32,
    write: bool,
) -> bool {
    if fault_addr >= PHYS_BASE {
        return false;
    }
    let upage = pg_round_down(fault_addr);

    loop {
        let mapping = vm.mmaps.lock().get(&upage).copied();
        if let Some(map_id) = mapping {
            let writable = VM.lock().maps.get(map_id.0).writable;
            if write && !writable {
                return false;
            }
            return activate_frame(vm, map_id);
        }

        // Unknown page: maybe a stack extension. The heuristic accepts
        // addresses within the stack limit that land no more than
        // STACK_GROW_SLACK bytes below the user stack pointer.
        let esp = ctx.user_esp();
        let in_stack_region = fault_addr >= PHYS_BASE - STACK_LIMIT;
        if in_stack_region && fault_addr + STACK_GROW_SLACK >= esp {
            if create_anonymous(vm, upage, true).is_none() {
                return false;
            }
            continue;
        }
        return false;
    }
}

enum Fill {
    Zero,
    Swap(crate::drivers::block::BlockSector),
    FileRead {
        file: Arc<Mutex<File>>,
        offset: u32,
        size: u32,
    },
}

/// Materialize a frame: obtain a physical page (evicting if necessary),
/// fill it from swap, file, or zeros, and install PTEs for every alias.
fn activate_frame(vm: &ProcessVm, map_id: MapId) -> bool {
    let (frame_id, fill, aliases) = {
        let vt = VM.lock();
        let map = vt.maps.get(map_id.0);
        let frame_id = map.frame;
        let frame = vt.frames.get(frame_id.0);

        if frame.kpage.is_some() {
            // Already resident; only the PTEs were missing.
            drop(vt);
            install_aliases(vm, frame_id);
            return true;
        }

        let fill = if frame.is_swapped_out {
            Fill::Swap(frame.swap_sector.expect("swapped frame without sector"))
        } else {
            match &map.backing {
                Backing::File {
                    file, offset, size, ..
                } => Fill::FileRead {
                    file: file.clone(),
                    offset: *offset,
                    size: *size,
                },
                Backing::Anonymous => Fill::Zero,
            }
        };
        let aliases: Vec<(u32, bool)> = frame
            .mappings
            .iter()
            .map(|&m| {
                let info = vt.maps.get(m.0);
                (info.upage, info.writable)
            })
            .collect();
        (frame_id, fill, aliases)
    };

    // Obtain a physical page, evicting until one is free.
    let kpage = loop {
        if let Some(page) = palloc::get_page(Pool::User) {
            break page;
        }
        if !swap::evict_one() {
            // No evictable victim: out of memory, fatal to the process.
            return false;
        }
    };

    match fill {
        Fill::Zero => palloc::with_page(kpage, |bytes| bytes.fill(0)),
        Fill::Swap(sector) => {
            swap::read_in(sector, kpage);
            swap::free_slot(sector);
        }
        Fill::FileRead { file, offset, size } => {
            let mut buf = vec![0u8; size as usize];
            let mut f = file.lock();
            f.seek(offset);
            let read = f.read(&mut buf);
            drop(f);
            palloc::with_page(kpage, |bytes| {
                bytes[..read].copy_from_slice(&buf[..read]);
                bytes[read..].fill(0);
            });
        }
    }

    {
        let mut vt = VM.lock();
        let frame = vt.frames.get_mut(frame_id.0);
        frame.kpage = Some(kpage);
        frame.is_stub = false;
        frame.is_swapped_out = false;
        frame.swap_sector = None;
    }
    for (upage, writable) in aliases {
        vm.pagedir.lock().install(upage, kpage, writable);
    }
    swap::register_active(frame_id);
    true
}

fn install_aliases(vm: &ProcessVm, frame_id: FrameId) {
    let vt = VM.lock();
    let frame = vt.frames.get(frame_id.0);
    let kpage = frame.kpage.expect("installing aliases of non-resident frame");
    for &m in &frame.mappings {
        let info = vt.maps.get(m.0);
        vm.pagedir.lock().install(info.upage, kpage, info.writable);
    }
}

/// Map `file` at `addr` for the `mmap` system call: one block of
/// page-sized chunks. Returns the mapping id.
pub(crate) fn mmap_user(vm: &ProcessVm, file: File, addr: u32) -> Option<i32> {
    let length = file.length();
    if length == 0 || addr == 0 || pg_ofs(addr) != 0 {
        return None;
    }
    if addr.checked_add(length).is_none() || addr + length > PHYS_BASE {
        return None;
    }

    let file = Arc::new(Mutex::new(file));
    let mut chunks = Vec::new();
    let pages = (length as usize).div_ceil(PGSIZE) as u32;
    for i in 0..pages {
        let upage = addr + i * PGSIZE as u32;
        let chunk_off = i * PGSIZE as u32;
        let size = (length - chunk_off).min(PGSIZE as u32);
        match create_file_map(vm, upage, file.clone(), true, false, chunk_off, size) {
            Some(map_id) => chunks.push(map_id),
            None => {
                // Partial overlap with an existing mapping: roll back.
                for chunk in chunks {
                    drop_chunk(vm, chunk);
                }
                return None;
            }
        }
    }

    let id = vm.next_mapid.fetch_add(1, Ordering::SeqCst);
    vm.blocks.lock().push(MmapUserBlock { id, file, chunks });
    Some(id)
}

/// Tear down one `mmap` block, writing dirty chunks back to the file.
/// Caller holds the file-system lock.
pub(crate) fn munmap_user(vm: &ProcessVm, mapid: i32) -> bool {
    let block = {
        let mut blocks = vm.blocks.lock();
        let pos = blocks.iter().position(|b| b.id == mapid);
        match pos {
            Some(pos) => blocks.remove(pos),
            None => return false,
        }
    };
    cleanup_block(vm, block);
    true
}

/// Tear down every `mmap` block of the process. Caller holds the
/// file-system lock.
pub(crate) fn munmap_all(vm: &ProcessVm) {
    loop {
        let block = vm.blocks.lock().pop();
        match block {
            Some(block) => cleanup_block(vm, block),
            None => break,
        }
    }
}

fn cleanup_block(vm: &ProcessVm, block: MmapUserBlock) {
    for chunk in block.chunks {
        write_back_chunk(vm, chunk);
        drop_chunk(vm, chunk);
    }
}

/// Write a resident dirty chunk back to its file. A chunk that went to
/// swap was clean at eviction (dirty chunks are written to the file
/// instead), so swap contents never need to reach the file here.
fn write_back_chunk(vm: &ProcessVm, chunk: MapId) {
    let (upage, kpage, file, offset, size) = {
        let vt = VM.lock();
        let map = vt.maps.get(chunk.0);
        let frame = vt.frames.get(map.frame.0);
        let (file, offset, size) = match &map.backing {
            Backing::File {
                file, offset, size, ..
            } => (file.clone(), *offset, *size),
            Backing::Anonymous => unreachable!("mmap chunk without file backing"),
        };
        (map.upage, frame.kpage, file, offset, size)
    };

    let Some(kpage) = kpage else { return };
    if !vm.pagedir.lock().dirty(upage) {
        return;
    }

    let mut buf = vec![0u8; size as usize];
    palloc::with_page(kpage, |bytes| buf.copy_from_slice(&bytes[..size as usize]));
    let mut f = file.lock();
    f.seek(offset);
    f.write(&buf);
}

/// Remove one mapping and its frame from the process and the global
/// registries, releasing any physical page or swap slot it holds.
fn drop_chunk(vm: &ProcessVm, chunk: MapId) {
    let frame_id = VM.lock().maps.get(chunk.0).frame;
    vm.frames.lock().retain(|&f| f != frame_id);
    release_frame(vm, frame_id);
}

fn release_frame(vm: &ProcessVm, frame_id: FrameId) {
    let frame = {
        let mut vt = VM.lock();
        let frame = vt.frames.free(frame_id.0);
        for &m in &frame.mappings {
            let map = vt.maps.free(m.0);
            vm.mmaps.lock().remove(&map.upage);
            map.pagedir.lock().remove(map.upage);
        }
        frame
    };

    if let Some(kpage) = frame.kpage {
        swap::unregister_active(frame_id);
        palloc::free_page(kpage);
    }
    if frame.is_swapped_out {
        swap::free_slot(frame.swap_sector.expect("swapped frame without sector"));
    }
}

/// Destroy the process's address space: every remaining frame and
/// mapping, including swap slots of evicted pages. The `mmap` blocks
/// must have been cleaned up beforehand.
pub(crate) fn destroy(vm: &ProcessVm) {
    assert!(vm.blocks.lock().is_empty(), "mmap blocks outlive teardown");
    let frames: Vec<FrameId> = vm.frames.lock().drain(..).collect();
    for frame_id in frames {
        release_frame(vm, frame_id);
    }
    assert!(vm.mmaps.lock().is_empty(), "mappings outlive their frames");
}

/// Check the VM-wide structural invariants. Intended for tests; panics
/// on violation.
pub fn check_invariants() {
    let vt = VM.lock();
    let (active, used_sectors) = swap::debug_state();

    let mut swapped = 0usize;
    for (id, frame) in vt.frames.iter_ids() {
        if frame.is_swapped_out {
            swapped += 1;
            assert!(frame.swap_sector.is_some());
            assert!(frame.kpage.is_none(), "swapped frame still resident");
        }
        let in_active = active.contains(&FrameId(id));
        assert_eq!(
            in_active,
            frame.kpage.is_some() && !frame.is_swapped_out,
            "active-frame list out of sync for frame {}",
            id
        );
        for &m in &frame.mappings {
            assert_eq!(
                vt.maps.get(m.0).frame,
                FrameId(id),
                "mapping does not point back at its frame"
            );
        }
    }
    assert_eq!(
        used_sectors,
        swap::SECTORS_PER_PAGE * swapped,
        "swap bitmap does not match swapped frame count"
    );

    for (id, map) in vt.maps.iter_ids() {
        assert!(
            vt.frames.get(map.frame.0).mappings.contains(&MapId(id)),
            "frame does not list its mapping"
        );
    }
}
