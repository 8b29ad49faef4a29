// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Image-loader interface and its ELF implementation.

pub mod builder;
pub mod elf;

use crate::kernel::Handle;
use crate::status::Status;

pub use builder::ElfBuilder;
pub use elf::ElfLoader;

/// Where an image landed in the target address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadedImage {
    pub base: usize,
    pub entry: usize,
}

/// Parses executable images held in memory objects.
pub trait ImageLoader: Send + Sync {
    /// Begin loading `image`. The returned state is destroyed on drop.
    fn start(&self, image: &Handle) -> Result<Box<dyn ImageLoad>, Status>;
}

/// A parsed image awaiting placement.
pub trait ImageLoad {
    /// Dynamic linker requested by the image, if any.
    fn interp(&self) -> Result<Option<String>, Status>;

    /// Stack size requested by the image, if it asks for one.
    fn stack_size(&self) -> Option<usize>;

    /// Map the image into `root_vmar`.
    fn finish(&mut self, root_vmar: &Handle) -> Result<LoadedImage, Status>;
}
