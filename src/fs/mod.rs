//! The file system collaborator.
//!
//! A flat, in-memory file system with classic classroom-kernel
//! semantics: files are created at a fixed size, reads and writes clamp
//! at end-of-file, removal unlinks the name while open handles keep the
//! inode alive, and a `deny_write` count on the inode blocks writes for
//! as long as any denier exists (the executable of a running process).
//!
//! Every call into the file system happens under the single global
//! [`struct@FS_LOCK`]; it is the outermost lock in the documented order
//! `filesystem-lock → swap-lock → interrupt-disable`.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::sync::Lock;

struct InodeData {
    data: Vec<u8>,
    deny_write: u32,
}

pub struct Inode {
    inner: Mutex<InodeData>,
}

impl Inode {
    fn new(size: usize) -> Arc<Inode> {
        Arc::new(Inode {
            inner: Mutex::new(InodeData {
                data: vec![0u8; size],
                deny_write: 0,
            }),
        })
    }
}

/// An open file: an inode plus a position and a per-handle write-deny
/// flag. Dropping the handle releases its deny.
pub struct File {
    inode: Arc<Inode>,
    pos: u32,
    denying: bool,
}

impl File {
    /// Read from the current position, advancing it. Short reads at
    /// end-of-file.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let inner = self.inode.inner.lock();
        let pos = self.pos as usize;
        if pos >= inner.data.len() {
            return 0;
        }
        let n = buf.len().min(inner.data.len() - pos);
        buf[..n].copy_from_slice(&inner.data[pos..pos + n]);
        drop(inner);
        self.pos += n as u32;
        n
    }

    /// Write at the current position, advancing it. Writes are clamped
    /// at end-of-file (files do not grow) and denied entirely while any
    /// handle denies writes.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let mut inner = self.inode.inner.lock();
        if inner.deny_write > 0 {
            return 0;
        }
        let pos = self.pos as usize;
        if pos >= inner.data.len() {
            return 0;
        }
        let n = buf.len().min(inner.data.len() - pos);
        inner.data[pos..pos + n].copy_from_slice(&buf[..n]);
        drop(inner);
        self.pos += n as u32;
        n
    }

    pub fn seek(&mut self, pos: u32) {
        self.pos = pos;
    }

    pub fn tell(&self) -> u32 {
        self.pos
    }

    pub fn length(&self) -> u32 {
        self.inode.inner.lock().data.len() as u32
    }

    /// Deny writes to the underlying inode for this handle's lifetime.
    pub fn deny_write(&mut self) {
        if !self.denying {
            self.denying = true;
            self.inode.inner.lock().deny_write += 1;
        }
    }

    /// Re-allow writes previously denied through this handle.
    pub fn allow_write(&mut self) {
        if self.denying {
            self.denying = false;
            let mut inner = self.inode.inner.lock();
            assert!(inner.deny_write > 0);
            inner.deny_write -= 1;
        }
    }

    /// A fresh handle to the same inode, positioned at the start.
    pub fn reopen(&self) -> File {
        File {
            inode: self.inode.clone(),
            pos: 0,
            denying: false,
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.allow_write();
    }
}

lazy_static! {
    static ref FILES: Mutex<BTreeMap<String, Arc<Inode>>> = Mutex::new(BTreeMap::new());
    /// The single global file-system lock, held across every call.
    pub static ref FS_LOCK: Lock = Lock::new();
}

pub fn init() {
    log::debug!("filesys: in-memory file table ready");
}

/// Create a file of the given fixed size. False if the name exists.
pub fn create(name: &str, size: usize) -> bool {
    let mut files = FILES.lock();
    if files.contains_key(name) {
        return false;
    }
    files.insert(String::from(name), Inode::new(size));
    true
}

/// Unlink a file by name. Open handles keep the contents alive.
pub fn remove(name: &str) -> bool {
    FILES.lock().remove(name).is_some()
}

/// Open a file by name.
pub fn open(name: &str) -> Option<File> {
    let files = FILES.lock();
    let inode = files.get(name)?;
    Some(File {
        inode: inode.clone(),
        pos: 0,
        denying: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_size_files_clamp_io() {
        assert!(create("clamp.bin", 8));
        assert!(!create("clamp.bin", 8), "duplicate create");

        let mut f = open("clamp.bin").unwrap();
        assert_eq!(f.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]), 8);
        f.seek(6);
        let mut buf = [0u8; 4];
        assert_eq!(f.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[7, 8]);

        assert!(remove("clamp.bin"));
        assert!(open("clamp.bin").is_none());
        // The dropped name does not block the open handle.
        f.seek(0);
        let mut all = [0u8; 8];
        assert_eq!(f.read(&mut all), 8);
        assert_eq!(all[0], 1);
    }

    #[test]
    fn deny_write_blocks_all_writers() {
        assert!(create("deny.bin", 4));
        let mut exe = open("deny.bin").unwrap();
        let mut other = open("deny.bin").unwrap();

        exe.deny_write();
        assert_eq!(other.write(&[9]), 0);
        exe.allow_write();
        assert_eq!(other.write(&[9]), 1);

        // Dropping a denying handle re-allows.
        let mut third = open("deny.bin").unwrap();
        third.deny_write();
        drop(third);
        other.seek(0);
        assert_eq!(other.write(&[5]), 1);
    }
}
