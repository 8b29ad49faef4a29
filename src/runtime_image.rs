// CLASSIFICATION: COMMUNITY
// Filename: runtime_image.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Process-wide default for the system runtime image.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cohesix_procargs::{HandleInfo, HandleType};
use log::debug;
use once_cell::sync::Lazy;

use crate::kernel::{Handle, Rights};
use crate::status::Status;

/// Tag under which the runtime image arrives among startup handles.
pub const RUNTIME_IMAGE_INFO: HandleInfo = HandleInfo::new(HandleType::RuntimeImage, 0);

/// Handles this process received when it was started.
pub trait StartupHandles: Send + Sync {
    /// Remove and return the handle tagged `info`.
    fn take(&self, info: HandleInfo) -> Option<Handle>;
}

/// Startup handles kept in a map.
#[derive(Default)]
pub struct StartupHandleTable {
    handles: Mutex<HashMap<HandleInfo, Handle>>,
}

impl StartupHandleTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, info: HandleInfo, handle: Handle) -> Option<Handle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info, handle)
    }
}

impl StartupHandles for StartupHandleTable {
    fn take(&self, info: HandleInfo) -> Option<Handle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&info)
    }
}

/// Cached runtime image, resolved on first use from the registered
/// startup handles and kept until [`RuntimeImageCache::reset`].
#[derive(Default)]
pub struct RuntimeImageCache {
    image: Mutex<Option<Handle>>,
    source: Mutex<Option<Arc<dyn StartupHandles>>>,
}

static CACHE: Lazy<RuntimeImageCache> = Lazy::new(RuntimeImageCache::default);

/// The cache shared by every launch context in this process.
pub fn global() -> &'static RuntimeImageCache {
    &CACHE
}

/// Fresh duplicate of the process-wide default.
pub fn get() -> Result<Handle, Status> {
    global().duplicate()
}

/// Install a new process-wide default, returning the previous one.
pub fn set(image: Option<Handle>) -> Option<Handle> {
    global().set(image)
}

/// Drop the process-wide default.
pub fn reset() {
    global().reset();
}

impl RuntimeImageCache {
    fn lock(&self) -> MutexGuard<'_, Option<Handle>> {
        self.image.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Where the default is looked up when nothing has been set.
    pub fn register_source(&self, source: Arc<dyn StartupHandles>) {
        *self.source.lock().unwrap_or_else(PoisonError::into_inner) = Some(source);
    }

    pub fn set(&self, image: Option<Handle>) -> Option<Handle> {
        std::mem::replace(&mut *self.lock(), image)
    }

    /// Tear down the cached image and forget the lookup source.
    pub fn reset(&self) {
        let old = self.lock().take();
        *self.source.lock().unwrap_or_else(PoisonError::into_inner) = None;
        drop(old);
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `f` on the cached image while holding the cache lock.
    pub fn with_image<R>(&self, f: impl FnOnce(&Handle) -> R) -> Result<R, Status> {
        let mut guard = self.lock();
        if guard.is_none() {
            let source = self
                .source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(image) = source.and_then(|source| source.take(RUNTIME_IMAGE_INFO)) {
                debug!("[launchpad] resolved runtime image from startup handles");
                *guard = Some(image);
            }
        }
        let image = guard.as_ref().ok_or(Status::InvalidHandle)?;
        Ok(f(image))
    }

    pub fn duplicate(&self) -> Result<Handle, Status> {
        self.with_image(|image| image.duplicate(Rights::SAME_RIGHTS))?
    }
}
