// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Launch context: builds a process, loads its image and starts it.
//!
//! A [`Launchpad`] latches the first failure. Once failed, every mutating
//! call returns that same status without side effects, and any handle
//! passed in is closed. Dropping the context closes every handle it still
//! owns. A context is driven by one owner; it is not meant to be shared
//! between threads while being configured.

mod load;
mod start;

use std::sync::Arc;

use cohesix_procargs::{HandleInfo, HandleType};
use log::{debug, warn};

use crate::config::LaunchConfig;
use crate::handles::HandleTable;
use crate::image::{ElfLoader, ImageLoader};
use crate::kernel::{Handle, Kernel, RawHandle, Rights};
use crate::loader_svc::LoaderServiceConnect;
use crate::runtime_image::{self, RuntimeImageCache};
use crate::stack::round_stack_size;
use crate::status::{LaunchFailure, Status};
use crate::strings::StringBlob;

/// Progress of a launch. Only ever moves forward; `Error` absorbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LaunchState {
    Empty,
    Configured,
    ImageLoaded,
    StackAllocated,
    MessageSent,
    Started,
    Error,
}

/// Collaborators shared by launch contexts.
#[derive(Clone)]
pub struct LaunchEnv {
    kernel: Arc<dyn Kernel>,
    images: Arc<dyn ImageLoader>,
    loader_service: Option<Arc<dyn LoaderServiceConnect>>,
    runtime: &'static RuntimeImageCache,
    config: LaunchConfig,
}

impl LaunchEnv {
    /// Environment using the ELF loader, the process-wide runtime image
    /// cache, default configuration and no loader service.
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        Self {
            kernel,
            images: Arc::new(ElfLoader::new()),
            loader_service: None,
            runtime: runtime_image::global(),
            config: LaunchConfig::default(),
        }
    }

    #[must_use]
    pub fn with_image_loader(mut self, images: Arc<dyn ImageLoader>) -> Self {
        self.images = images;
        self
    }

    #[must_use]
    pub fn with_loader_service(mut self, connector: Arc<dyn LoaderServiceConnect>) -> Self {
        self.loader_service = Some(connector);
        self
    }

    #[must_use]
    pub fn with_runtime_cache(mut self, cache: &'static RuntimeImageCache) -> Self {
        self.runtime = cache;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: LaunchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }
}

/// Handles with their own bootstrap encoding, kept outside the table.
#[derive(Debug, Default)]
struct SpecialHandles {
    loader_svc: Option<Handle>,
    exec_vmo: Option<Handle>,
}

pub struct Launchpad {
    env: LaunchEnv,
    process: Handle,
    root_vmar: Handle,
    args: StringBlob,
    environ: StringBlob,
    handles: HandleTable,
    special: SpecialHandles,
    entry: usize,
    base: usize,
    runtime_base: usize,
    stack_size: usize,
    loader_message: bool,
    state: LaunchState,
    failure: Option<LaunchFailure>,
}

impl Launchpad {
    fn bare(env: LaunchEnv) -> Self {
        let stack_size = round_stack_size(env.config.stack_size);
        Self {
            env,
            process: Handle::invalid(),
            root_vmar: Handle::invalid(),
            args: StringBlob::default(),
            environ: StringBlob::default(),
            handles: HandleTable::new(),
            special: SpecialHandles::default(),
            entry: 0,
            base: 0,
            runtime_base: 0,
            stack_size,
            loader_message: false,
            state: LaunchState::Empty,
            failure: None,
        }
    }

    /// Bind a context to an existing process and its root region. Invalid
    /// handles leave the context failed with `InvalidHandle`.
    pub fn create_with_process(env: LaunchEnv, process: Handle, root_vmar: Handle) -> Self {
        let mut lp = Self::bare(env);
        if !process.is_valid() || !root_vmar.is_valid() {
            lp.fail(Status::InvalidHandle, "added invalid handle");
            return lp;
        }
        lp.process = process;
        lp.root_vmar = root_vmar;
        lp
    }

    /// Create a process under `creation_job`. A valid `transferred_job` is
    /// passed to the child tagged `Job`. Failure still yields a context,
    /// already failed, so callers can drive it uniformly.
    pub fn create_with_jobs(
        env: LaunchEnv,
        creation_job: &Handle,
        transferred_job: Handle,
        name: &str,
    ) -> Self {
        let kernel = Arc::clone(&env.kernel);
        let mut lp = match kernel.process_create(creation_job.raw(), name) {
            Ok((process, vmar)) => Self::create_with_process(
                env,
                Handle::from_raw(Arc::clone(&kernel), process),
                Handle::from_raw(Arc::clone(&kernel), vmar),
            ),
            Err(status) => {
                let mut lp = Self::bare(env);
                lp.fail(status, "create: process_create() failed");
                lp
            }
        };
        if transferred_job.is_valid() {
            let _ = lp.add_handle(transferred_job, HandleInfo::new(HandleType::Job, 0));
        }
        debug!("[launchpad] created context for {name}");
        lp
    }

    /// Create a process under `job`, handing the child a duplicate of it.
    pub fn create(env: LaunchEnv, job: &Handle, name: &str) -> Self {
        let transferred = job.duplicate(Rights::SAME_RIGHTS).unwrap_or_default();
        Self::create_with_jobs(env, job, transferred, name)
    }

    /// Release everything the context still owns.
    pub fn destroy(self) {}

    fn check(&self) -> Result<(), Status> {
        match self.failure {
            Some(failure) => Err(failure.status),
            None => Ok(()),
        }
    }

    /// Latch `status` unless a failure is already recorded; returns the
    /// latched status.
    fn fail(&mut self, status: Status, context: &'static str) -> Status {
        match self.failure {
            Some(first) => first.status,
            None => {
                warn!("[launchpad] {context}: {status}");
                self.failure = Some(LaunchFailure { status, context });
                self.state = LaunchState::Error;
                status
            }
        }
    }

    fn advance(&mut self, to: LaunchState) {
        if self.state != LaunchState::Error && to > self.state {
            self.state = to;
        }
    }

    pub fn status(&self) -> Result<(), Status> {
        self.check()
    }

    pub fn failure(&self) -> Option<LaunchFailure> {
        self.failure
    }

    pub fn error_message(&self) -> &'static str {
        self.failure.map_or("no error", |failure| failure.context)
    }

    /// Fail the context on behalf of the caller. Statuses that do not denote
    /// an error are recorded as `Internal`.
    pub fn abort(&mut self, status: Status, context: &'static str) {
        let status = if status.into_raw() < 0 {
            status
        } else {
            Status::Internal
        };
        self.fail(status, context);
    }

    #[must_use]
    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Process handle; invalid once it has been sent to the child.
    pub fn process_handle(&self) -> &Handle {
        &self.process
    }

    /// Root region handle; invalid once it has been sent to the child.
    pub fn root_vmar_handle(&self) -> &Handle {
        &self.root_vmar
    }

    pub fn args(&self) -> &StringBlob {
        &self.args
    }

    pub fn environ(&self) -> &StringBlob {
        &self.environ
    }

    /// Handles the generic bootstrap message would carry.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        usize::from(self.process.is_valid())
            + usize::from(self.root_vmar.is_valid())
            + self.handles.len()
    }

    pub fn loader_service(&self) -> Option<&Handle> {
        self.special.loader_svc.as_ref()
    }

    /// Main executable kept for the dynamic linker.
    pub fn exec_vmo(&self) -> Option<&Handle> {
        self.special.exec_vmo.as_ref()
    }

    pub fn entry_address(&self) -> Result<usize, Status> {
        match self.entry {
            0 => Err(Status::BadState),
            entry => Ok(entry),
        }
    }

    pub fn base_address(&self) -> Result<usize, Status> {
        match self.base {
            0 => Err(Status::BadState),
            base => Ok(base),
        }
    }

    /// Load address of the runtime image; zero until one is loaded.
    #[must_use]
    pub fn runtime_base(&self) -> usize {
        self.runtime_base
    }

    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Replace the argument list.
    pub fn set_args<I, S>(&mut self, args: I) -> Result<(), Status>
    where
        I: IntoIterator<Item = S> + Clone,
        S: AsRef<[u8]>,
    {
        self.check()?;
        match StringBlob::build(args) {
            Ok(blob) => {
                self.args = blob;
                self.advance(LaunchState::Configured);
                Ok(())
            }
            Err(status) => Err(self.fail(status, blob_context("arguments", status))),
        }
    }

    /// Replace the environment. An empty list means no variables.
    pub fn set_environ<I, S>(&mut self, environ: I) -> Result<(), Status>
    where
        I: IntoIterator<Item = S> + Clone,
        S: AsRef<[u8]>,
    {
        self.check()?;
        match StringBlob::build(environ) {
            Ok(blob) => {
                self.environ = blob;
                self.advance(LaunchState::Configured);
                Ok(())
            }
            Err(status) => Err(self.fail(status, blob_context("environ", status))),
        }
    }

    /// Queue `handle` for the child. It is closed if it cannot be queued.
    pub fn add_handle(&mut self, handle: Handle, info: HandleInfo) -> Result<(), Status> {
        if !handle.is_valid() {
            return Err(self.fail(Status::InvalidHandle, "added invalid handle"));
        }
        self.check()?;
        match self.handles.push(handle, info) {
            Ok(()) => {
                self.advance(LaunchState::Configured);
                Ok(())
            }
            Err(status) => Err(self.fail(status, table_context(status))),
        }
    }

    /// Queue a batch of handles. Either all are queued or the whole batch
    /// is closed.
    pub fn add_handles(&mut self, batch: Vec<(Handle, HandleInfo)>) -> Result<(), Status> {
        self.check()?;
        match self.handles.extend(batch) {
            Ok(()) => {
                self.advance(LaunchState::Configured);
                Ok(())
            }
            Err(status) => Err(self.fail(status, table_context(status))),
        }
    }

    /// Set the initial-thread stack size, returning the previous value.
    /// Sizes are rounded up to a page; zero means no stack. Ignored once
    /// failed. The most recent call or image hint wins.
    pub fn set_stack_size(&mut self, size: usize) -> usize {
        let old = self.stack_size;
        if self.failure.is_none() {
            self.stack_size = round_stack_size(size);
        }
        old
    }

    /// Choose whether a dynamic-linker message is sent first, returning the
    /// previous choice. Ignored once failed.
    pub fn send_loader_message(&mut self, send: bool) -> bool {
        let old = self.loader_message;
        if self.failure.is_none() {
            self.loader_message = send;
        }
        old
    }

    /// Use `service` as the loader-service channel, returning the one it
    /// replaces. Once failed, `service` is closed.
    pub fn use_loader_service(&mut self, service: Handle) -> Result<Option<Handle>, Status> {
        self.check()?;
        let service = service.is_valid().then_some(service);
        Ok(std::mem::replace(&mut self.special.loader_svc, service))
    }

    /// Raw handles and tags of everything the generic message carries,
    /// process and root region first.
    fn outgoing(&self) -> (Vec<RawHandle>, Vec<HandleInfo>) {
        let mut raws = Vec::with_capacity(self.handle_count());
        let mut info = Vec::with_capacity(self.handle_count());
        if self.process.is_valid() {
            raws.push(self.process.raw());
            info.push(HandleType::ProcessSelf.into());
        }
        if self.root_vmar.is_valid() {
            raws.push(self.root_vmar.raw());
            info.push(HandleType::RootVmar.into());
        }
        raws.extend(self.handles.raw_handles());
        info.extend_from_slice(self.handles.info());
        (raws, info)
    }

    /// Forget everything just transferred by a successful write.
    fn release_outgoing(&mut self) {
        let _ = std::mem::take(&mut self.process).into_raw();
        let _ = std::mem::take(&mut self.root_vmar).into_raw();
        self.handles.release_all();
    }
}

fn blob_context(which: &'static str, status: Status) -> &'static str {
    match (which, status) {
        ("arguments", Status::OutOfMemory) => "arguments: out of memory",
        ("arguments", Status::InvalidArgs) => "arguments: embedded NUL",
        ("arguments", _) => "arguments: list changed while copying",
        (_, Status::OutOfMemory) => "environ: out of memory",
        (_, Status::InvalidArgs) => "environ: embedded NUL",
        _ => "environ: list changed while copying",
    }
}

fn table_context(status: Status) -> &'static str {
    match status {
        Status::InvalidHandle => "added invalid handle",
        _ => "out of memory for handle table",
    }
}
