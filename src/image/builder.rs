// CLASSIFICATION: COMMUNITY
// Filename: builder.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Minimal ELF64 writer for synthetic test and harness images.

use crate::kernel::MapFlags;
use crate::stack::PAGE_SIZE;

const EHDR_LEN: usize = 64;
const PHDR_LEN: usize = 56;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const EM_X86_64: u16 = 0x3e;
const PT_LOAD: u32 = 1;
const PT_INTERP: u32 = 3;
const PT_GNU_STACK: u32 = 0x6474_e551;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

struct Segment {
    vaddr: u64,
    data: Vec<u8>,
    mem_size: u64,
    flags: u32,
}

/// Builds little-endian ELF64 images with page-aligned `PT_LOAD` segments.
pub struct ElfBuilder {
    kind: u16,
    entry: u64,
    segments: Vec<Segment>,
    interp: Option<Vec<u8>>,
    stack_size: Option<u64>,
}

impl ElfBuilder {
    /// Position-independent image (`ET_DYN`).
    #[must_use]
    pub fn dynamic(entry: u64) -> Self {
        Self::new(ET_DYN, entry)
    }

    /// Fixed-address image (`ET_EXEC`).
    #[must_use]
    pub fn executable(entry: u64) -> Self {
        Self::new(ET_EXEC, entry)
    }

    fn new(kind: u16, entry: u64) -> Self {
        Self {
            kind,
            entry,
            segments: Vec::new(),
            interp: None,
            stack_size: None,
        }
    }

    /// Loadable segment: `data` at `vaddr`, zero-filled up to `mem_size`.
    #[must_use]
    pub fn segment(mut self, vaddr: u64, data: &[u8], mem_size: u64, flags: MapFlags) -> Self {
        let mut pf = 0;
        if flags.contains(MapFlags::PERM_READ) {
            pf |= PF_R;
        }
        if flags.contains(MapFlags::PERM_WRITE) {
            pf |= PF_W;
        }
        if flags.contains(MapFlags::PERM_EXECUTE) {
            pf |= PF_X;
        }
        self.segments.push(Segment {
            vaddr,
            data: data.to_vec(),
            mem_size: mem_size.max(data.len() as u64),
            flags: pf,
        });
        self
    }

    /// Request the dynamic linker `path`.
    #[must_use]
    pub fn interp(self, path: &str) -> Self {
        let mut raw = path.as_bytes().to_vec();
        raw.push(0);
        self.raw_interp(&raw)
    }

    /// `PT_INTERP` contents exactly as given, terminator included or not.
    #[must_use]
    pub fn raw_interp(mut self, raw: &[u8]) -> Self {
        self.interp = Some(raw.to_vec());
        self
    }

    /// Emit `PT_GNU_STACK` asking for `size` bytes of stack.
    #[must_use]
    pub fn stack_size(mut self, size: u64) -> Self {
        self.stack_size = Some(size);
        self
    }

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len()
            + usize::from(self.interp.is_some())
            + usize::from(self.stack_size.is_some());
        let interp_off = EHDR_LEN + phnum * PHDR_LEN;
        let interp_len = self.interp.as_ref().map_or(0, Vec::len);

        let mut cursor = align_up(interp_off + interp_len, PAGE_SIZE);
        let mut placed = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            let offset = cursor + seg.vaddr as usize % PAGE_SIZE;
            placed.push(offset);
            cursor = align_up(offset + seg.data.len(), PAGE_SIZE);
        }

        let mut out = Vec::with_capacity(cursor);
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        put16(&mut out, self.kind);
        put16(&mut out, EM_X86_64);
        put32(&mut out, 1);
        put64(&mut out, self.entry);
        put64(&mut out, EHDR_LEN as u64);
        put64(&mut out, 0);
        put32(&mut out, 0);
        put16(&mut out, EHDR_LEN as u16);
        put16(&mut out, PHDR_LEN as u16);
        put16(&mut out, phnum as u16);
        put16(&mut out, 64);
        put16(&mut out, 0);
        put16(&mut out, 0);

        if let Some(interp) = &self.interp {
            let len = interp.len() as u64;
            phdr(&mut out, PT_INTERP, PF_R, interp_off as u64, 0, len, len, 1);
        }
        for (seg, offset) in self.segments.iter().zip(&placed) {
            phdr(
                &mut out,
                PT_LOAD,
                seg.flags,
                *offset as u64,
                seg.vaddr,
                seg.data.len() as u64,
                seg.mem_size,
                PAGE_SIZE as u64,
            );
        }
        if let Some(size) = self.stack_size {
            phdr(&mut out, PT_GNU_STACK, PF_R | PF_W, 0, 0, 0, size, 16);
        }

        if let Some(interp) = &self.interp {
            out.extend_from_slice(interp);
        }
        for (seg, offset) in self.segments.iter().zip(&placed) {
            out.resize(*offset, 0);
            out.extend_from_slice(&seg.data);
        }
        out
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn put16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

#[allow(clippy::too_many_arguments)]
fn phdr(
    out: &mut Vec<u8>,
    kind: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    file_size: u64,
    mem_size: u64,
    align: u64,
) {
    put32(out, kind);
    put32(out, flags);
    put64(out, offset);
    put64(out, vaddr);
    put64(out, vaddr);
    put64(out, file_size);
    put64(out, mem_size);
    put64(out, align);
}
