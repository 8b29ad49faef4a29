// CLASSIFICATION: COMMUNITY
// Filename: handle.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

use std::fmt;
use std::sync::Arc;

use super::{Kernel, RawHandle, Rights};
use crate::status::Status;

/// Owned kernel handle. Dropping it closes the handle exactly once;
/// [`Handle::into_raw`] gives up ownership when the value is transferred.
pub struct Handle {
    raw: RawHandle,
    kernel: Option<Arc<dyn Kernel>>,
}

impl Handle {
    /// Take ownership of `raw`, closing it through `kernel` on drop.
    pub fn from_raw(kernel: Arc<dyn Kernel>, raw: RawHandle) -> Self {
        if raw.is_valid() {
            Self {
                raw,
                kernel: Some(kernel),
            }
        } else {
            Self::invalid()
        }
    }

    /// Placeholder that owns nothing.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            raw: RawHandle::INVALID,
            kernel: None,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.raw.is_valid()
    }

    /// Raw value, still owned by `self`.
    #[must_use]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Release ownership without closing.
    #[must_use = "the released handle leaks unless it is transferred"]
    pub fn into_raw(mut self) -> RawHandle {
        self.kernel = None;
        std::mem::replace(&mut self.raw, RawHandle::INVALID)
    }

    pub fn kernel(&self) -> Option<&Arc<dyn Kernel>> {
        self.kernel.as_ref()
    }

    pub fn duplicate(&self, rights: Rights) -> Result<Handle, Status> {
        let kernel = self.kernel.as_ref().ok_or(Status::InvalidHandle)?;
        let dup = kernel.handle_duplicate(self.raw, rights)?;
        Ok(Handle::from_raw(Arc::clone(kernel), dup))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(kernel) = self.kernel.take() {
            if self.raw.is_valid() {
                let _ = kernel.handle_close(self.raw);
            }
        }
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.raw.0)
    }
}
