// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Kernel-object interface consumed by the launcher.
//!
//! Every call takes raw handle values; ownership of those values is
//! tracked by [`Handle`]. Operations that transfer handles (`channel_write`,
//! `channel_call`, `process_start`) consume them only when they succeed.

mod handle;
pub mod host;

use bitflags::bitflags;

use crate::status::Status;

pub use handle::Handle;

/// Raw kernel handle value. Zero is never a live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RawHandle(pub u32);

impl RawHandle {
    /// The null handle.
    pub const INVALID: RawHandle = RawHandle(0);

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

bitflags! {
    /// Rights carried by a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        const DUPLICATE = 1 << 0;
        const TRANSFER = 1 << 1;
        const READ = 1 << 2;
        const WRITE = 1 << 3;
        const EXECUTE = 1 << 4;
        const MAP = 1 << 5;
        /// Duplicate with the rights of the source handle.
        const SAME_RIGHTS = 1 << 31;
    }
}

impl Rights {
    /// Rights granted to a freshly created object.
    pub const DEFAULT: Rights = Rights::DUPLICATE
        .union(Rights::TRANSFER)
        .union(Rights::READ)
        .union(Rights::WRITE)
        .union(Rights::EXECUTE)
        .union(Rights::MAP);
}

bitflags! {
    /// Protection applied to a mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        const PERM_READ = 1 << 0;
        const PERM_WRITE = 1 << 1;
        const PERM_EXECUTE = 1 << 2;
    }
}

/// Bytes and handles read from a channel.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChannelMessage {
    pub bytes: Vec<u8>,
    pub handles: Vec<RawHandle>,
}

/// Kernel-object operations needed to build and start a process.
pub trait Kernel: Send + Sync {
    fn handle_close(&self, handle: RawHandle) -> Result<(), Status>;

    fn handle_duplicate(&self, handle: RawHandle, rights: Rights) -> Result<RawHandle, Status>;

    /// Create a process under `job`, returning the process and its root
    /// address-space region.
    fn process_create(&self, job: RawHandle, name: &str) -> Result<(RawHandle, RawHandle), Status>;

    /// Start `thread` as the first thread of `process`. On success the
    /// kernel takes `arg1` and moves it into the new process.
    fn process_start(
        &self,
        process: RawHandle,
        thread: RawHandle,
        entry: usize,
        stack: usize,
        arg1: RawHandle,
        arg2: usize,
    ) -> Result<(), Status>;

    fn thread_create(&self, process: RawHandle, name: &str) -> Result<RawHandle, Status>;

    /// Start a thread of an already running process.
    fn thread_start(
        &self,
        thread: RawHandle,
        entry: usize,
        stack: usize,
        arg1: usize,
        arg2: usize,
    ) -> Result<(), Status>;

    fn channel_create(&self) -> Result<(RawHandle, RawHandle), Status>;

    fn channel_write(
        &self,
        channel: RawHandle,
        bytes: &[u8],
        handles: &[RawHandle],
    ) -> Result<(), Status>;

    fn channel_read(&self, channel: RawHandle) -> Result<ChannelMessage, Status>;

    /// Write a request and block until the peer replies. Replies larger than
    /// `max_bytes` or carrying more than `max_handles` fail with
    /// `BufferTooSmall`.
    fn channel_call(
        &self,
        channel: RawHandle,
        bytes: &[u8],
        handles: &[RawHandle],
        max_bytes: usize,
        max_handles: usize,
    ) -> Result<ChannelMessage, Status>;

    fn vmo_create(&self, size: usize) -> Result<RawHandle, Status>;

    fn vmo_size(&self, vmo: RawHandle) -> Result<usize, Status>;

    fn vmo_read(&self, vmo: RawHandle, offset: usize, buf: &mut [u8]) -> Result<(), Status>;

    fn vmo_write(&self, vmo: RawHandle, offset: usize, data: &[u8]) -> Result<(), Status>;

    /// Reserve a sub-region of `parent`. `offset` pins the region relative
    /// to the parent base; `None` lets the kernel choose. Returns the new
    /// region and its base address.
    fn vmar_allocate(
        &self,
        parent: RawHandle,
        offset: Option<usize>,
        len: usize,
    ) -> Result<(RawHandle, usize), Status>;

    /// Base address of an address-space region.
    fn vmar_base(&self, vmar: RawHandle) -> Result<usize, Status>;

    /// Map `len` bytes of `vmo` into `vmar`, returning the mapped address.
    fn vmar_map(
        &self,
        vmar: RawHandle,
        offset: Option<usize>,
        vmo: RawHandle,
        vmo_offset: usize,
        len: usize,
        flags: MapFlags,
    ) -> Result<usize, Status>;
}
