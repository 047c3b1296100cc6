//! Swap space and frame eviction.
//!
//! One lock guards the three pieces of eviction state: the system-wide
//! active-frame list, the clock hand into it, and the bitmap of swap
//! sectors. The clock algorithm gives every frame a second chance:
//! frames with any accessed alias get their accessed bits cleared and
//! the hand moves on; the first frame with no accessed bit set is the
//! victim.
//!
//! Evicting writes the page either back to its file (dirty, file-backed,
//! not part of the executable image), nowhere (read-only executable
//! pages are re-read from the image), or to a contiguous run of swap
//! sectors. The caller already holds the file-system lock, keeping the
//! documented lock order.

use std::sync::Arc;

use bit_field::BitField;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::drivers::block::{self, BlockDevice, BlockRole, BlockSector, BLOCK_SECTOR_SIZE};
use crate::memory::pagedir::PteFlags;
use crate::memory::palloc::{self, PageHandle};
use crate::memory::PGSIZE;
use crate::vm::frame::FrameId;
use crate::vm::mmap::Backing;
use crate::vm::VM;

/// Sectors occupied by one page.
pub const SECTORS_PER_PAGE: usize = PGSIZE / BLOCK_SECTOR_SIZE;

struct SwapState {
    /// Every frame with resident contents, in clock order.
    active: Vec<FrameId>,
    /// Clock hand: an index into `active`.
    hand: usize,
    /// One bit per swap sector; set means in use.
    bitmap: Vec<u64>,
    sectors: usize,
    dev: Option<Arc<BlockDevice>>,
}

lazy_static! {
    static ref SWAP: Mutex<SwapState> = Mutex::new(SwapState {
        active: Vec::new(),
        hand: 0,
        bitmap: Vec::new(),
        sectors: 0,
        dev: None,
    });
}

/// Discover the swap device by role and size the sector bitmap.
pub fn init() {
    let mut sw = SWAP.lock();
    if let Some(dev) = block::get_role(BlockRole::Swap) {
        let sectors = dev.size() as usize;
        sw.bitmap = vec![0u64; sectors.div_ceil(64)];
        sw.sectors = sectors;
        sw.dev = Some(dev);
        log::debug!("swap: {} sectors available", sectors);
    } else {
        log::debug!("swap: no device with swap role");
    }
}

/// A frame became resident: add it to the clock's rotation.
pub(crate) fn register_active(frame: FrameId) {
    let mut sw = SWAP.lock();
    sw.active.push(frame);
}

/// A frame left residency outside the eviction path (process teardown).
pub(crate) fn unregister_active(frame: FrameId) {
    let mut sw = SWAP.lock();
    if let Some(pos) = sw.active.iter().position(|&f| f == frame) {
        sw.active.remove(pos);
        if pos < sw.hand {
            sw.hand -= 1;
        }
        if sw.hand >= sw.active.len() {
            sw.hand = 0;
        }
    }
}

/// Evict one frame to free a physical page. False when nothing is
/// evictable.
pub(crate) fn evict_one() -> bool {
    let mut sw = SWAP.lock();
    let Some(victim) = find_victim(&mut sw) else {
        return false;
    };
    deactivate_frame(&mut sw, victim);
    true
}

/// Advance the clock hand until it rests on a frame with no accessed
/// alias, clearing accessed bits as it sweeps. Removes the victim from
/// the active list.
fn find_victim(sw: &mut SwapState) -> Option<FrameId> {
    let vt = VM.lock();
    if sw.active.is_empty() {
        return None;
    }

    // Two full sweeps suffice: the first clears every accessed bit.
    for _ in 0..2 * sw.active.len() + 1 {
        let frame_id = sw.active[sw.hand];
        let frame = vt.frames.get(frame_id.0);
        let accessed = frame.mappings.iter().any(|&m| {
            let map = vt.maps.get(m.0);
            map.pagedir.lock().accessed(map.upage)
        });
        if accessed {
            for &m in &frame.mappings {
                let map = vt.maps.get(m.0);
                map.pagedir.lock().clear_accessed(map.upage);
            }
            sw.hand = (sw.hand + 1) % sw.active.len();
        } else {
            sw.active.remove(sw.hand);
            if sw.hand >= sw.active.len() {
                sw.hand = 0;
            }
            return Some(frame_id);
        }
    }
    unreachable!("clock hand swept twice without finding a victim");
}

/// Push a frame's contents out and mark it non-resident: clear every
/// aliased PTE, write the page to its file or to swap (or discard
/// read-only executable pages), and free the kernel page.
fn deactivate_frame(sw: &mut SwapState, frame_id: FrameId) {
    struct Evicted {
        kpage: PageHandle,
        dirty_file: Option<(Arc<Mutex<crate::fs::File>>, u32, u32)>,
        exe_only: bool,
    }

    let evicted = {
        let vt = VM.lock();
        let frame = vt.frames.get(frame_id.0);
        let kpage = frame.kpage.expect("evicting a non-resident frame");
        let mut dirty_file = None;
        let mut exe_only = !frame.mappings.is_empty();
        for &m in &frame.mappings {
            let map = vt.maps.get(m.0);
            let old = map.pagedir.lock().deactivate(map.upage);
            let dirty = old.flags.contains(PteFlags::DIRTY);
            match &map.backing {
                Backing::File {
                    file,
                    offset,
                    size,
                    exe,
                } => {
                    if !*exe && dirty {
                        assert!(
                            dirty_file.is_none(),
                            "more than one dirty file-backed alias"
                        );
                        dirty_file = Some((file.clone(), *offset, *size));
                    }
                    if !*exe || map.writable {
                        exe_only = false;
                    }
                }
                Backing::Anonymous => exe_only = false,
            }
        }
        Evicted {
            kpage,
            dirty_file,
            exe_only,
        }
    };

    let mut swapped_to = None;
    if let Some((file, offset, size)) = evicted.dirty_file {
        // Modified file data goes back to the file.
        let mut buf = vec![0u8; size as usize];
        palloc::with_page(evicted.kpage, |bytes| {
            buf.copy_from_slice(&bytes[..size as usize]);
        });
        let mut f = file.lock();
        f.seek(offset);
        f.write(&buf);
    } else if evicted.exe_only {
        // Read-only code: drop it, the image still has it.
    } else {
        // Anything else survives only in swap.
        let sector = scan_and_flip(sw).expect("swap space exhausted");
        let dev = sw.dev.clone().expect("swap-out without a swap device");
        palloc::with_page(evicted.kpage, |bytes| {
            let mut chunk = [0u8; BLOCK_SECTOR_SIZE];
            for i in 0..SECTORS_PER_PAGE {
                chunk.copy_from_slice(&bytes[i * BLOCK_SECTOR_SIZE..(i + 1) * BLOCK_SECTOR_SIZE]);
                dev.write(sector + i as BlockSector, &chunk);
            }
        });
        swapped_to = Some(sector);
    }

    palloc::free_page(evicted.kpage);

    let mut vt = VM.lock();
    let frame = vt.frames.get_mut(frame_id.0);
    frame.kpage = None;
    frame.is_swapped_out = swapped_to.is_some();
    frame.swap_sector = swapped_to;
}

/// Read a page back in from swap. The slot stays allocated; the caller
/// frees it once the frame is resident again.
pub(crate) fn read_in(sector: BlockSector, kpage: PageHandle) {
    let dev = {
        let sw = SWAP.lock();
        for i in 0..SECTORS_PER_PAGE {
            assert!(
                bitmap_get(&sw.bitmap, sector as usize + i),
                "reading a free swap slot"
            );
        }
        sw.dev.clone().expect("swap-in without a swap device")
    };
    palloc::with_page(kpage, |bytes| {
        let mut chunk = [0u8; BLOCK_SECTOR_SIZE];
        for i in 0..SECTORS_PER_PAGE {
            dev.read(sector + i as BlockSector, &mut chunk);
            bytes[i * BLOCK_SECTOR_SIZE..(i + 1) * BLOCK_SECTOR_SIZE].copy_from_slice(&chunk);
        }
    });
}

/// Release a page's run of swap sectors.
pub(crate) fn free_slot(sector: BlockSector) {
    let mut sw = SWAP.lock();
    for i in 0..SECTORS_PER_PAGE {
        let idx = sector as usize + i;
        assert!(bitmap_get(&sw.bitmap, idx), "freeing a free swap slot");
        sw.bitmap[idx / 64].set_bit(idx % 64, false);
    }
}

fn bitmap_get(bitmap: &[u64], idx: usize) -> bool {
    bitmap[idx / 64].get_bit(idx % 64)
}

/// Find a contiguous run of `SECTORS_PER_PAGE` free sectors and mark
/// them used, returning the first.
fn scan_and_flip(sw: &mut SwapState) -> Option<BlockSector> {
    if sw.sectors < SECTORS_PER_PAGE {
        return None;
    }
    let mut start = 0;
    while start + SECTORS_PER_PAGE <= sw.sectors {
        let run_used = (0..SECTORS_PER_PAGE).position(|i| bitmap_get(&sw.bitmap, start + i));
        match run_used {
            Some(used) => start += used + 1,
            None => {
                for i in 0..SECTORS_PER_PAGE {
                    let idx = start + i;
                    sw.bitmap[idx / 64].set_bit(idx % 64, true);
                }
                return Some(start as BlockSector);
            }
        }
    }
    None
}

/// Snapshot for invariant checks: the active list and the number of
/// used swap sectors.
pub(crate) fn debug_state() -> (Vec<FrameId>, usize) {
    let sw = SWAP.lock();
    let used = sw
        .bitmap
        .iter()
        .map(|word| word.count_ones() as usize)
        .sum();
    (sw.active.clone(), used)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_state(sectors: usize) -> SwapState {
        SwapState {
            active: Vec::new(),
            hand: 0,
            bitmap: vec![0u64; sectors.div_ceil(64)],
            sectors,
            dev: None,
        }
    }

    #[test]
    fn scan_and_flip_finds_contiguous_runs() {
        let mut sw = empty_state(SECTORS_PER_PAGE * 3);
        let a = scan_and_flip(&mut sw).unwrap();
        let b = scan_and_flip(&mut sw).unwrap();
        let c = scan_and_flip(&mut sw).unwrap();
        assert_eq!(
            (a, b, c),
            (
                0,
                SECTORS_PER_PAGE as BlockSector,
                2 * SECTORS_PER_PAGE as BlockSector
            )
        );
        assert_eq!(scan_and_flip(&mut sw), None);

        // Free the middle run; the scanner reuses it.
        for i in 0..SECTORS_PER_PAGE {
            let idx = b as usize + i;
            sw.bitmap[idx / 64].set_bit(idx % 64, false);
        }
        assert_eq!(scan_and_flip(&mut sw), Some(b));
    }
}
