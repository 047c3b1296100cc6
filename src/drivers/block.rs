//! Sector-addressed block devices.
//!
//! Devices are registered under a role and discovered by it; the swap
//! subsystem asks for the device with role `Swap`. The backing store is
//! an in-memory sector array with the usual 512-byte sector size.

use std::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

pub const BLOCK_SECTOR_SIZE: usize = 512;

pub type BlockSector = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    Swap,
}

pub struct BlockDevice {
    name: &'static str,
    sectors: Mutex<Vec<u8>>,
    size: BlockSector,
}

impl BlockDevice {
    pub fn new(name: &'static str, size: usize) -> Arc<BlockDevice> {
        Arc::new(BlockDevice {
            name,
            sectors: Mutex::new(vec![0u8; size * BLOCK_SECTOR_SIZE]),
            size: size as BlockSector,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Device size in sectors.
    pub fn size(&self) -> BlockSector {
        self.size
    }

    pub fn read(&self, sector: BlockSector, buf: &mut [u8; BLOCK_SECTOR_SIZE]) {
        assert!(sector < self.size, "sector {} out of range", sector);
        let offset = sector as usize * BLOCK_SECTOR_SIZE;
        buf.copy_from_slice(&self.sectors.lock()[offset..offset + BLOCK_SECTOR_SIZE]);
    }

    pub fn write(&self, sector: BlockSector, buf: &[u8; BLOCK_SECTOR_SIZE]) {
        assert!(sector < self.size, "sector {} out of range", sector);
        let offset = sector as usize * BLOCK_SECTOR_SIZE;
        self.sectors.lock()[offset..offset + BLOCK_SECTOR_SIZE].copy_from_slice(buf);
    }
}

lazy_static! {
    static ref REGISTRY: Mutex<Vec<(BlockRole, Arc<BlockDevice>)>> = Mutex::new(Vec::new());
}

pub fn register(role: BlockRole, dev: Arc<BlockDevice>) {
    log::debug!("block: registered {} with role {:?}", dev.name(), role);
    REGISTRY.lock().push((role, dev));
}

/// Find the device registered under `role`.
pub fn get_role(role: BlockRole) -> Option<Arc<BlockDevice>> {
    REGISTRY
        .lock()
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, d)| d.clone())
}
