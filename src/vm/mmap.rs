//! Virtual-memory mappings.

use std::sync::Arc;

use spin::Mutex;

use crate::fs::File;
use crate::memory::pagedir::PageDir;
use crate::vm::frame::FrameId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapId(pub(crate) usize);

/// What backs a mapping's contents.
pub(crate) enum Backing {
    /// Zero-filled on first touch, swap thereafter.
    Anonymous,
    /// A region of a file: `size` bytes at `offset`, tail zero-filled.
    File {
        file: Arc<Mutex<File>>,
        offset: u32,
        size: u32,
        /// Executable image pages are re-read from the image instead of
        /// being written back on eviction.
        exe: bool,
    },
}

/// The association of one user virtual page with its backing store,
/// resolvable to a frame.
pub(crate) struct MmapInfo {
    /// Page-aligned user virtual address, unique within the process.
    pub upage: u32,
    /// Whether user code may write through this mapping.
    pub writable: bool,
    pub backing: Backing,
    pub frame: FrameId,
    /// The owning process's page table.
    pub pagedir: Arc<Mutex<PageDir>>,
}

impl MmapInfo {
    pub fn is_exe(&self) -> bool {
        matches!(self.backing, Backing::File { exe: true, .. })
    }
}

/// One user-level `mmap` call: a file plus its page-sized chunks.
pub(crate) struct MmapUserBlock {
    pub id: i32,
    pub file: Arc<Mutex<File>>,
    pub chunks: Vec<MapId>,
}
