// CLASSIFICATION: COMMUNITY
// Filename: handles.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Outgoing handle table.

use cohesix_procargs::HandleInfo;

use crate::kernel::{Handle, RawHandle};
use crate::status::Status;

const INITIAL_CAPACITY: usize = 8;

/// Handles to be transferred to the new process, each paired with the tag
/// that tells the child what it is. Entries are always valid.
#[derive(Debug, Default)]
pub struct HandleTable {
    handles: Vec<Handle>,
    info: Vec<HandleInfo>,
}

impl HandleTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.handles.capacity().min(self.info.capacity())
    }

    /// Grow so that `extra` more entries fit. Capacity starts at 8 and
    /// doubles; existing entries survive a failed allocation.
    fn reserve(&mut self, extra: usize) -> Result<(), Status> {
        let needed = self.len().checked_add(extra).ok_or(Status::OutOfMemory)?;
        let mut capacity = self.capacity();
        if needed <= capacity {
            return Ok(());
        }
        while capacity < needed {
            capacity = if capacity == 0 {
                INITIAL_CAPACITY
            } else {
                capacity.checked_mul(2).ok_or(Status::OutOfMemory)?
            };
        }
        let grow = capacity - self.len();
        self.handles
            .try_reserve_exact(grow)
            .map_err(|_| Status::OutOfMemory)?;
        self.info
            .try_reserve_exact(grow)
            .map_err(|_| Status::OutOfMemory)?;
        Ok(())
    }

    /// Take ownership of `handle`. An invalid handle is rejected with
    /// `InvalidHandle`; on any failure `handle` is dropped.
    pub fn push(&mut self, handle: Handle, info: HandleInfo) -> Result<(), Status> {
        if !handle.is_valid() {
            return Err(Status::InvalidHandle);
        }
        self.reserve(1)?;
        self.handles.push(handle);
        self.info.push(info);
        Ok(())
    }

    /// Take ownership of a batch. Either every entry is added or none is,
    /// in which case the whole batch is dropped.
    pub fn extend(&mut self, batch: Vec<(Handle, HandleInfo)>) -> Result<(), Status> {
        if batch.iter().any(|(handle, _)| !handle.is_valid()) {
            return Err(Status::InvalidHandle);
        }
        self.reserve(batch.len())?;
        for (handle, info) in batch {
            self.handles.push(handle);
            self.info.push(info);
        }
        Ok(())
    }

    #[must_use]
    pub fn info(&self) -> &[HandleInfo] {
        &self.info
    }

    #[must_use]
    pub fn raw_handles(&self) -> Vec<RawHandle> {
        self.handles.iter().map(Handle::raw).collect()
    }

    /// Forget every entry without closing it; the handles now belong to
    /// whoever received them.
    pub fn release_all(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.into_raw();
        }
        self.info.clear();
    }
}
