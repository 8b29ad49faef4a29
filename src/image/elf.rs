// CLASSIFICATION: COMMUNITY
// Filename: elf.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! ELF64 loader mapping `PT_LOAD` segments into a target address space.

use std::sync::Arc;

use log::{debug, info};
use xmas_elf::header::{Class, Type as ElfType};
use xmas_elf::program::{Flags, Type};
use xmas_elf::ElfFile;

use super::{ImageLoad, ImageLoader, LoadedImage};
use crate::kernel::{Handle, Kernel, MapFlags};
use crate::stack::{page_round_up, PAGE_SIZE};
use crate::status::Status;

const PT_GNU_STACK: u32 = 0x6474_e551;
const PHDR64_LEN: usize = 56;
/// Images larger than this are refused before being read.
pub const MAX_IMAGE_SIZE: usize = 64 << 20;

#[derive(Debug, Default, Clone, Copy)]
pub struct ElfLoader;

impl ElfLoader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    offset: usize,
    vaddr: usize,
    file_size: usize,
    mem_size: usize,
    flags: MapFlags,
}

/// Parsed image. Holds a copy of the image bytes so later steps never go
/// back to the memory object.
pub struct ElfLoad {
    bytes: Vec<u8>,
    dynamic: bool,
    entry: usize,
    segments: Vec<Segment>,
    interp: Option<(usize, usize)>,
    stack_size: Option<usize>,
}

fn map_flags(flags: Flags) -> MapFlags {
    let mut out = MapFlags::empty();
    if flags.is_read() {
        out |= MapFlags::PERM_READ;
    }
    if flags.is_write() {
        out |= MapFlags::PERM_WRITE;
    }
    if flags.is_execute() {
        out |= MapFlags::PERM_EXECUTE;
    }
    out
}

fn to_usize(value: u64) -> Result<usize, Status> {
    usize::try_from(value).map_err(|_| Status::OutOfRange)
}

/// The program-header table must lie inside the image before xmas-elf
/// slices it.
fn check_program_headers(elf: &ElfFile<'_>, image_len: usize) -> Result<(), Status> {
    let offset = to_usize(elf.header.pt2.ph_offset()).map_err(|_| Status::InvalidArgs)?;
    let entry_size = usize::from(elf.header.pt2.ph_entry_size());
    let count = usize::from(elf.header.pt2.ph_count());
    if count == 0 {
        return Ok(());
    }
    if entry_size < PHDR64_LEN {
        debug!("[elf] program header entry size {entry_size} too small");
        return Err(Status::InvalidArgs);
    }
    let end = count
        .checked_mul(entry_size)
        .and_then(|table| table.checked_add(offset));
    match end {
        Some(end) if end <= image_len => Ok(()),
        _ => {
            debug!("[elf] program header table at 0x{offset:x} overruns image");
            Err(Status::InvalidArgs)
        }
    }
}

impl ElfLoad {
    fn parse(bytes: Vec<u8>) -> Result<Self, Status> {
        let elf = ElfFile::new(&bytes).map_err(|err| {
            debug!("[elf] rejected image: {err}");
            Status::InvalidArgs
        })?;
        if !matches!(elf.header.pt1.class(), Class::SixtyFour) {
            return Err(Status::NotSupported);
        }
        let dynamic = match elf.header.pt2.type_().as_type() {
            ElfType::Executable => false,
            ElfType::SharedObject => true,
            _ => return Err(Status::NotSupported),
        };
        let entry = to_usize(elf.header.pt2.entry_point())?;
        check_program_headers(&elf, bytes.len())?;

        let mut segments = Vec::new();
        let mut interp = None;
        let mut stack_size = None;
        for ph in elf.program_iter() {
            let offset = to_usize(ph.offset())?;
            let file_size = to_usize(ph.file_size())?;
            let mem_size = to_usize(ph.mem_size())?;
            match ph.get_type() {
                Ok(Type::Load) => {
                    if file_size > mem_size {
                        return Err(Status::InvalidArgs);
                    }
                    // Empty segments map nothing and do not widen the span.
                    if mem_size > 0 {
                        segments.push(Segment {
                            offset,
                            vaddr: to_usize(ph.virtual_addr())?,
                            file_size,
                            mem_size,
                            flags: map_flags(ph.flags()),
                        });
                    }
                }
                Ok(Type::Interp) => interp = Some((offset, file_size)),
                Ok(Type::OsSpecific(PT_GNU_STACK)) if mem_size > 0 => stack_size = Some(mem_size),
                _ => {}
            }
            if offset
                .checked_add(file_size)
                .map_or(true, |end| end > bytes.len())
            {
                return Err(Status::InvalidArgs);
            }
        }
        drop(elf);
        Ok(Self {
            bytes,
            dynamic,
            entry,
            segments,
            interp,
            stack_size,
        })
    }

    fn span(&self) -> Result<(usize, usize), Status> {
        let first = self.segments.first().ok_or(Status::InvalidArgs)?;
        let mut lo = first.vaddr;
        let mut hi = first.vaddr;
        for seg in &self.segments {
            let end = seg.vaddr.checked_add(seg.mem_size).ok_or(Status::OutOfRange)?;
            lo = lo.min(seg.vaddr);
            hi = hi.max(end);
        }
        let lo = lo & !(PAGE_SIZE - 1);
        let hi = page_round_up(hi).ok_or(Status::OutOfRange)?;
        Ok((lo, hi))
    }

    fn map_segment(
        &self,
        kernel: &Arc<dyn Kernel>,
        region: &Handle,
        lo: usize,
        bias: usize,
        seg: &Segment,
    ) -> Result<(), Status> {
        let page = seg.vaddr & !(PAGE_SIZE - 1);
        let lead = seg.vaddr - page;
        let len = page_round_up(lead + seg.mem_size).ok_or(Status::OutOfRange)?;
        let vmo = Handle::from_raw(Arc::clone(kernel), kernel.vmo_create(len)?);
        if seg.file_size > 0 {
            let data = &self.bytes[seg.offset..seg.offset + seg.file_size];
            kernel.vmo_write(vmo.raw(), lead, data)?;
        }
        let addr = kernel.vmar_map(region.raw(), Some(page - lo), vmo.raw(), 0, len, seg.flags)?;
        info!(
            "[elf] mapped segment virt=0x{:x} size=0x{len:x} flags={:?}",
            addr.wrapping_add(lead),
            seg.flags
        );
        debug_assert_eq!(addr, page.wrapping_add(bias));
        Ok(())
    }
}

impl ImageLoad for ElfLoad {
    fn interp(&self) -> Result<Option<String>, Status> {
        let Some((offset, len)) = self.interp else {
            return Ok(None);
        };
        let raw = &self.bytes[offset..offset + len];
        let (&last, body) = raw.split_last().ok_or(Status::InvalidArgs)?;
        if last != 0 {
            return Err(Status::InvalidArgs);
        }
        let name = body.split(|&b| b == 0).next().unwrap_or_default();
        let name = std::str::from_utf8(name).map_err(|_| Status::InvalidArgs)?;
        Ok(Some(name.to_owned()))
    }

    fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    fn finish(&mut self, root_vmar: &Handle) -> Result<LoadedImage, Status> {
        let kernel = root_vmar.kernel().ok_or(Status::InvalidHandle)?;
        let (lo, hi) = self.span()?;
        let placement = if self.dynamic {
            None
        } else {
            let root_base = kernel.vmar_base(root_vmar.raw())?;
            Some(lo.checked_sub(root_base).ok_or(Status::OutOfRange)?)
        };
        let (region, base) = kernel.vmar_allocate(root_vmar.raw(), placement, hi - lo)?;
        let region = Handle::from_raw(Arc::clone(kernel), region);
        let bias = base.wrapping_sub(lo);
        for seg in &self.segments {
            self.map_segment(kernel, &region, lo, bias, seg)?;
        }
        Ok(LoadedImage {
            base,
            entry: self.entry.wrapping_add(bias),
        })
    }
}

impl ImageLoader for ElfLoader {
    fn start(&self, image: &Handle) -> Result<Box<dyn ImageLoad>, Status> {
        let kernel = image.kernel().ok_or(Status::InvalidHandle)?;
        let size = kernel.vmo_size(image.raw())?;
        if size > MAX_IMAGE_SIZE {
            return Err(Status::NoResources);
        }
        let mut bytes = vec![0u8; size];
        kernel.vmo_read(image.raw(), 0, &mut bytes)?;
        Ok(Box::new(ElfLoad::parse(bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ElfBuilder;
    use crate::kernel::host::{HostKernel, ROOT_VMAR_BASE};

    fn image(host: &Arc<HostKernel>, bytes: &[u8]) -> Handle {
        host.handle(host.vmo_with_contents(bytes).unwrap())
    }

    fn root(host: &Arc<HostKernel>) -> (Handle, Handle) {
        let job = host.create_job();
        let (proc, vmar) = host.process_create(job, "elf-test").unwrap();
        host.handle_close(job).unwrap();
        (host.handle(proc), host.handle(vmar))
    }

    #[test]
    fn dynamic_image_is_relocated_and_filled() {
        let host = HostKernel::shared();
        let bytes = ElfBuilder::dynamic(0x1010)
            .segment(0x1000, b"\x90\x90\xc3", 0x2000, MapFlags::PERM_READ | MapFlags::PERM_EXECUTE)
            .build();
        let (proc, vmar) = root(&host);
        let vmo = image(&host, &bytes);
        let mut load = ElfLoader::new().start(&vmo).unwrap();
        assert_eq!(load.interp().unwrap(), None);
        let loaded = load.finish(&vmar).unwrap();
        assert_eq!(loaded.base, ROOT_VMAR_BASE);
        assert_eq!(loaded.entry, ROOT_VMAR_BASE + 0x10);

        let text = host.read_mapped(proc.raw(), loaded.base, 4).unwrap();
        assert_eq!(text, b"\x90\x90\xc3\0");
        let mappings = host.mappings(proc.raw());
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].len, 0x2000);
    }

    #[test]
    fn fixed_image_lands_at_its_link_address() {
        let host = HostKernel::shared();
        let link = ROOT_VMAR_BASE + 0x40_0000;
        let bytes = ElfBuilder::executable(link as u64)
            .segment(link as u64, b"abc", 0x10, MapFlags::PERM_READ)
            .build();
        let (_proc, vmar) = root(&host);
        let loaded = ElfLoader::new()
            .start(&image(&host, &bytes))
            .unwrap()
            .finish(&vmar)
            .unwrap();
        assert_eq!(loaded.base, link);
        assert_eq!(loaded.entry, link);
    }

    #[test]
    fn interpreter_and_stack_hint_are_reported() {
        let host = HostKernel::shared();
        let bytes = ElfBuilder::dynamic(0)
            .segment(0, b"x", 1, MapFlags::PERM_READ)
            .interp("ld.so.1")
            .stack_size(0x8000)
            .build();
        let load = ElfLoader::new().start(&image(&host, &bytes)).unwrap();
        assert_eq!(load.interp().unwrap().as_deref(), Some("ld.so.1"));
        assert_eq!(load.stack_size(), Some(0x8000));
    }

    #[test]
    fn unterminated_interpreter_is_invalid() {
        let host = HostKernel::shared();
        let bytes = ElfBuilder::dynamic(0)
            .segment(0, b"x", 1, MapFlags::PERM_READ)
            .raw_interp(b"ld.so.1")
            .build();
        let load = ElfLoader::new().start(&image(&host, &bytes)).unwrap();
        assert_eq!(load.interp(), Err(Status::InvalidArgs));
    }

    #[test]
    fn empty_load_segment_is_skipped() {
        let host = HostKernel::shared();
        let bytes = ElfBuilder::dynamic(0x1000)
            .segment(0x1000, b"\xc3", 0x1000, MapFlags::PERM_READ | MapFlags::PERM_EXECUTE)
            .segment(0x9000, b"", 0, MapFlags::PERM_READ)
            .build();
        let (proc, vmar) = root(&host);
        let loaded = ElfLoader::new()
            .start(&image(&host, &bytes))
            .unwrap()
            .finish(&vmar)
            .unwrap();
        assert_eq!(loaded.entry, loaded.base);
        let mappings = host.mappings(proc.raw());
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].len, 0x1000);
    }

    #[test]
    fn program_headers_outside_the_image_are_rejected() {
        let host = HostKernel::shared();
        let good = ElfBuilder::dynamic(0)
            .segment(0, b"x", 1, MapFlags::PERM_READ)
            .build();

        let mut bytes = good.clone();
        let phoff = (bytes.len() - 10) as u64;
        bytes[32..40].copy_from_slice(&phoff.to_le_bytes());
        assert_eq!(
            ElfLoader::new().start(&image(&host, &bytes)).err(),
            Some(Status::InvalidArgs)
        );

        let mut bytes = good.clone();
        bytes[54..56].copy_from_slice(&8u16.to_le_bytes());
        assert_eq!(
            ElfLoader::new().start(&image(&host, &bytes)).err(),
            Some(Status::InvalidArgs)
        );

        let mut bytes = good;
        bytes[56..58].copy_from_slice(&u16::MAX.to_le_bytes());
        assert_eq!(
            ElfLoader::new().start(&image(&host, &bytes)).err(),
            Some(Status::InvalidArgs)
        );
    }

    #[test]
    fn non_elf_and_32_bit_images_are_rejected() {
        let host = HostKernel::shared();
        assert_eq!(
            ElfLoader::new().start(&image(&host, b"#!/bin/sh\n")).err(),
            Some(Status::InvalidArgs)
        );
        let mut bytes = ElfBuilder::dynamic(0)
            .segment(0, b"x", 1, MapFlags::PERM_READ)
            .build();
        bytes[4] = 1;
        assert_eq!(
            ElfLoader::new().start(&image(&host, &bytes)).err(),
            Some(Status::NotSupported)
        );
    }
}
