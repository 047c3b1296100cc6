//! Physical frame descriptors.

use crate::drivers::block::BlockSector;
use crate::memory::palloc::PageHandle;
use crate::vm::mmap::MapId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(pub(crate) usize);

/// One physical frame, possibly not resident.
///
/// Created as a stub when a mapping is declared, materialized on fault,
/// evicted by the clock hand, destroyed with its process. All mappings
/// aliasing a frame belong to the same process.
pub(crate) struct Frame {
    /// Kernel page holding the contents, unset while not resident.
    pub kpage: Option<PageHandle>,
    /// MmapInfos aliasing this frame.
    pub mappings: Vec<MapId>,
    /// No content has ever been materialized; zero-fill on first touch.
    pub is_stub: bool,
    /// Contents currently live in swap.
    pub is_swapped_out: bool,
    /// First swap sector of the page when swapped out.
    pub swap_sector: Option<BlockSector>,
}

impl Frame {
    pub fn new_stub() -> Frame {
        Frame {
            kpage: None,
            mappings: Vec::new(),
            is_stub: true,
            is_swapped_out: false,
            swap_sector: None,
        }
    }
}
