//! Per-process page tables for the simulated MMU.
//!
//! A PTE is in one of three states: absent (the address is unknown),
//! stub (not present, but the VMM knows the mapping and its
//! writability), or resident (present, backed by a frame). The stub
//! state is what lets the fault handler distinguish "known mapping that
//! needs materializing" from "illegal access". Accessed and dirty bits
//! are maintained by the user-memory access paths and consumed by the
//! clock eviction algorithm.

use std::collections::BTreeMap;

use bitflags::bitflags;

use super::palloc::PageHandle;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        /// Not present, but known to the VMM.
        const STUB     = 1 << 2;
        const ACCESSED = 1 << 3;
        const DIRTY    = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pte {
    pub flags: PteFlags,
    pub kpage: Option<PageHandle>,
}

/// One process's page table.
pub struct PageDir {
    entries: BTreeMap<u32, Pte>,
}

impl PageDir {
    pub fn new() -> PageDir {
        PageDir {
            entries: BTreeMap::new(),
        }
    }

    /// Record a known-but-absent mapping with its writability. Fails if
    /// the page is already known.
    pub fn set_page_stub(&mut self, upage: u32, writable: bool) -> bool {
        if self.entries.contains_key(&upage) {
            return false;
        }
        let mut flags = PteFlags::STUB;
        flags.set(PteFlags::WRITABLE, writable);
        self.entries.insert(upage, Pte { flags, kpage: None });
        true
    }

    /// Make a known mapping resident.
    pub fn install(&mut self, upage: u32, kpage: PageHandle, writable: bool) {
        let pte = self.entries.get_mut(&upage).expect("installing unknown page");
        let mut flags = PteFlags::PRESENT;
        flags.set(PteFlags::WRITABLE, writable);
        pte.flags = flags;
        pte.kpage = Some(kpage);
    }

    /// Drop a mapping back to the stub state so future accesses fault.
    /// Returns the PTE as it was.
    pub fn deactivate(&mut self, upage: u32) -> Pte {
        let pte = self.entries.get_mut(&upage).expect("deactivating unknown page");
        let old = *pte;
        pte.flags &= PteFlags::WRITABLE;
        pte.flags |= PteFlags::STUB;
        pte.kpage = None;
        old
    }

    /// Forget a mapping entirely.
    pub fn remove(&mut self, upage: u32) {
        self.entries.remove(&upage);
    }

    pub fn lookup(&self, upage: u32) -> Option<Pte> {
        self.entries.get(&upage).copied()
    }

    /// Whether the address belongs to a known mapping (stub or resident).
    pub fn is_known(&self, upage: u32) -> bool {
        self.entries.contains_key(&upage)
    }

    /// Resolve a resident page to its frame and writability.
    pub fn translate(&self, upage: u32) -> Option<(PageHandle, bool)> {
        let pte = self.entries.get(&upage)?;
        if !pte.flags.contains(PteFlags::PRESENT) {
            return None;
        }
        Some((
            pte.kpage.expect("present PTE without frame"),
            pte.flags.contains(PteFlags::WRITABLE),
        ))
    }

    pub fn set_accessed(&mut self, upage: u32) {
        if let Some(pte) = self.entries.get_mut(&upage) {
            pte.flags |= PteFlags::ACCESSED;
        }
    }

    pub fn clear_accessed(&mut self, upage: u32) {
        if let Some(pte) = self.entries.get_mut(&upage) {
            pte.flags -= PteFlags::ACCESSED;
        }
    }

    pub fn accessed(&self, upage: u32) -> bool {
        self.entries
            .get(&upage)
            .is_some_and(|pte| pte.flags.contains(PteFlags::ACCESSED))
    }

    pub fn set_dirty(&mut self, upage: u32) {
        if let Some(pte) = self.entries.get_mut(&upage) {
            pte.flags |= PteFlags::DIRTY;
        }
    }

    pub fn dirty(&self, upage: u32) -> bool {
        self.entries
            .get(&upage)
            .is_some_and(|pte| pte.flags.contains(PteFlags::DIRTY))
    }
}

impl Default for PageDir {
    fn default() -> Self {
        PageDir::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::palloc::{self, Pool};

    #[test]
    fn stub_to_resident_and_back() {
        let mut pd = PageDir::new();
        assert!(pd.set_page_stub(0x1000, true));
        assert!(!pd.set_page_stub(0x1000, false), "duplicate mapping");
        assert!(pd.is_known(0x1000));
        assert_eq!(pd.translate(0x1000), None);

        // The pools are process-global; tests share one init.
        crate::memory::init(&crate::KernelConfig::default());
        let page = palloc::get_page(Pool::User).unwrap();
        pd.install(0x1000, page, true);
        assert_eq!(pd.translate(0x1000), Some((page, true)));

        pd.set_accessed(0x1000);
        pd.set_dirty(0x1000);
        let old = pd.deactivate(0x1000);
        assert!(old.flags.contains(PteFlags::DIRTY));
        assert!(pd.is_known(0x1000));
        assert_eq!(pd.translate(0x1000), None);
        assert!(!pd.accessed(0x1000));
        palloc::free_page(page);
    }
}
