//! ELF32 executable loading.
//!
//! The loader validates an i386 ELF executable and demand-maps its
//! PT_LOAD segments into the process address space: nothing is read
//! until the first fault on each page. The simulator does not execute
//! mapped machine code — the image's behavior comes from the user
//! program registry, resolved by executable name — but the image bytes
//! really are paged in, evicted and re-read from the file.

use std::sync::Arc;

use spin::Mutex;

use crate::fs::File;
use crate::memory::{is_user_vaddr, PGSIZE};
use crate::vm::{self, ProcessVm};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_SHLIB: u32 = 5;

const PF_W: u32 = 2;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

const PGMASK: u32 = PGSIZE as u32 - 1;

#[derive(Debug, PartialEq, Eq)]
pub enum LoadError {
    NotFound,
    InvalidFormat,
    UnsupportedArch,
    UnsupportedType,
    BadSegment,
    /// The image names no entry known to the program registry.
    NoEntry,
    MapError,
}

/// One validated PT_LOAD segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub offset: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub writable: bool,
}

#[derive(Debug, PartialEq)]
pub struct ParsedImage {
    pub entry: u32,
    pub segments: Vec<Segment>,
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Parse and validate the executable header and program headers.
/// `file_len` bounds the segment offsets, as in the original loader.
pub fn parse(data: &[u8], file_len: u32) -> Result<ParsedImage, LoadError> {
    if data.len() < EHDR_SIZE {
        return Err(LoadError::InvalidFormat);
    }
    if data[0..4] != ELF_MAGIC {
        return Err(LoadError::InvalidFormat);
    }
    if data[4] != ELFCLASS32 || data[5] != ELFDATA2LSB {
        return Err(LoadError::UnsupportedArch);
    }
    if read_u16(data, 16) != ET_EXEC {
        return Err(LoadError::UnsupportedType);
    }
    if read_u16(data, 18) != EM_386 {
        return Err(LoadError::UnsupportedArch);
    }
    if read_u32(data, 20) != 1 {
        return Err(LoadError::InvalidFormat);
    }
    let entry = read_u32(data, 24);
    let phoff = read_u32(data, 28) as usize;
    let phentsize = read_u16(data, 42) as usize;
    let phnum = read_u16(data, 44) as usize;
    if phentsize != PHDR_SIZE || phnum > 1024 {
        return Err(LoadError::InvalidFormat);
    }

    let mut segments = Vec::new();
    for i in 0..phnum {
        let at = phoff + i * PHDR_SIZE;
        if at + PHDR_SIZE > data.len() {
            return Err(LoadError::InvalidFormat);
        }
        let p_type = read_u32(data, at);
        match p_type {
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => return Err(LoadError::UnsupportedType),
            PT_LOAD => {
                let segment = Segment {
                    offset: read_u32(data, at + 4),
                    vaddr: read_u32(data, at + 8),
                    filesz: read_u32(data, at + 16),
                    memsz: read_u32(data, at + 20),
                    writable: read_u32(data, at + 24) & PF_W != 0,
                };
                validate_segment(&segment, file_len)?;
                segments.push(segment);
            }
            _ => {} // Ignore this segment.
        }
    }
    Ok(ParsedImage { entry, segments })
}

/// The original's segment sanity rules.
fn validate_segment(seg: &Segment, file_len: u32) -> Result<(), LoadError> {
    // File offset and vaddr must agree modulo the page size.
    if seg.offset & PGMASK != seg.vaddr & PGMASK {
        return Err(LoadError::BadSegment);
    }
    if seg.offset > file_len {
        return Err(LoadError::BadSegment);
    }
    if seg.memsz < seg.filesz || seg.memsz == 0 {
        return Err(LoadError::BadSegment);
    }
    // The region must live in user space and must not wrap.
    let end = match seg.vaddr.checked_add(seg.memsz) {
        Some(end) => end,
        None => return Err(LoadError::BadSegment),
    };
    if !is_user_vaddr(seg.vaddr) || !is_user_vaddr(end) {
        return Err(LoadError::BadSegment);
    }
    // Mapping page 0 would let null dereferences through.
    if seg.vaddr < PGSIZE as u32 {
        return Err(LoadError::BadSegment);
    }
    Ok(())
}

/// Demand-map one segment: `filesz` bytes read from the file page by
/// page, the rest zero-filled, all marked as executable-image pages.
pub(crate) fn map_segment(
    vm: &ProcessVm,
    file: Arc<Mutex<File>>,
    seg: &Segment,
) -> Option<()> {
    let file_page = seg.offset & !PGMASK;
    let mem_page = seg.vaddr & !PGMASK;
    let page_offset = seg.vaddr & PGMASK;

    let (mut read_bytes, mut zero_bytes) = if seg.filesz > 0 {
        let read = page_offset + seg.filesz;
        let total = (page_offset + seg.memsz).div_ceil(PGSIZE as u32) * PGSIZE as u32;
        (read, total - read)
    } else {
        let total = (page_offset + seg.memsz).div_ceil(PGSIZE as u32) * PGSIZE as u32;
        (0, total)
    };

    let mut upage = mem_page;
    let mut pos = 0u32;
    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = read_bytes.min(PGSIZE as u32);
        let page_zero = PGSIZE as u32 - page_read;

        vm::create_file_map(
            vm,
            upage,
            file.clone(),
            seg.writable,
            true,
            file_page + pos,
            page_read,
        )?;

        pos += page_read;
        read_bytes -= page_read;
        zero_bytes -= page_zero;
        upage += PGSIZE as u32;
    }
    Some(())
}

/// Assemble a minimal valid image for the given segments, placing each
/// segment's bytes at a file offset congruent to its vaddr modulo the
/// page size. Used by the userland build tooling and the tests.
pub fn build_executable(entry: u32, segments: &[(u32, Vec<u8>, u32, bool)]) -> Vec<u8> {
    let phoff = EHDR_SIZE;
    let mut image = vec![0u8; EHDR_SIZE + segments.len() * PHDR_SIZE];

    image[0..4].copy_from_slice(&ELF_MAGIC);
    image[4] = ELFCLASS32;
    image[5] = ELFDATA2LSB;
    image[6] = 1; // EV_CURRENT
    image[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
    image[18..20].copy_from_slice(&EM_386.to_le_bytes());
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..28].copy_from_slice(&entry.to_le_bytes());
    image[28..32].copy_from_slice(&(phoff as u32).to_le_bytes());
    image[40..42].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    image[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    image[44..46].copy_from_slice(&(segments.len() as u16).to_le_bytes());

    for (i, (vaddr, data, memsz, writable)) in segments.iter().enumerate() {
        // Next free offset with the right page congruence.
        let congruent = (image.len() as u32 & !PGMASK) + PGSIZE as u32 + (vaddr & PGMASK);
        let offset = if congruent - PGSIZE as u32 >= image.len() as u32 {
            congruent - PGSIZE as u32
        } else {
            congruent
        };
        image.resize(offset as usize + data.len(), 0);
        image[offset as usize..].copy_from_slice(data);

        let at = phoff + i * PHDR_SIZE;
        image[at..at + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        image[at + 4..at + 8].copy_from_slice(&offset.to_le_bytes());
        image[at + 8..at + 12].copy_from_slice(&vaddr.to_le_bytes());
        image[at + 16..at + 20].copy_from_slice(&(data.len() as u32).to_le_bytes());
        image[at + 20..at + 24].copy_from_slice(&memsz.to_le_bytes());
        let flags = if *writable { PF_W } else { 0 };
        image[at + 24..at + 28].copy_from_slice(&flags.to_le_bytes());
    }
    image
}
