// CLASSIFICATION: COMMUNITY
// Filename: start.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Stack setup, bootstrap messages and thread start.

use std::sync::Arc;

use cohesix_procargs::{encode_loader_message, encode_procargs, HandleInfo, HandleType};
use log::{debug, info};

use super::{LaunchState, Launchpad};
use crate::kernel::{Handle, MapFlags, Rights};
use crate::stack::{initial_stack_pointer, message_fits};
use crate::status::{LaunchFailure, Status};

impl Launchpad {
    /// Allocate the stack, create the initial thread and write the
    /// bootstrap messages to `to_child`. Returns the thread and its stack
    /// pointer; the thread is closed on any failure.
    fn prepare_start(&mut self, thread_name: &str, to_child: &Handle) -> Result<(Handle, usize), Status> {
        if self.entry == 0 {
            return Err(Status::BadState);
        }
        let kernel = Arc::clone(&self.env.kernel);

        let mut sp = 0;
        if self.stack_size > 0 {
            let stack = match kernel.vmo_create(self.stack_size) {
                Ok(raw) => Handle::from_raw(Arc::clone(&kernel), raw),
                Err(status) => return Err(self.fail(status, "cannot create stack vmo")),
            };
            let base = match kernel.vmar_map(
                self.root_vmar.raw(),
                None,
                stack.raw(),
                0,
                self.stack_size,
                MapFlags::PERM_READ | MapFlags::PERM_WRITE,
            ) {
                Ok(base) => base,
                Err(status) => return Err(self.fail(status, "cannot map stack vmo")),
            };
            sp = initial_stack_pointer(base, self.stack_size);
            debug!("[launchpad] stack base=0x{base:x} size=0x{:x} sp=0x{sp:x}", self.stack_size);
            if let Err(status) = self.add_handle(stack, HandleInfo::new(HandleType::StackVmo, 0)) {
                return Err(self.fail(status, "cannot map stack vmo"));
            }
            self.advance(LaunchState::StackAllocated);
        }

        let thread = match kernel.thread_create(self.process.raw(), thread_name) {
            Ok(raw) => Handle::from_raw(Arc::clone(&kernel), raw),
            Err(status) => return Err(self.fail(status, "cannot create initial thread")),
        };
        let copy = match thread.duplicate(Rights::SAME_RIGHTS) {
            Ok(copy) => copy,
            Err(status) => return Err(self.fail(status, "cannot duplicate thread handle")),
        };
        self.add_handle(copy, HandleInfo::new(HandleType::ThreadSelf, 0))?;

        if self.loader_message {
            if let Err(status) = self.write_loader_message(&thread, to_child) {
                return Err(self.fail(status, "failed to send loader message"));
            }
        }

        let (raws, info) = self.outgoing();
        let message = match encode_procargs(&info, self.args.strings(), self.environ.strings()) {
            Ok(message) => message,
            Err(err) => return Err(self.fail(err.into(), "procargs message is too large")),
        };
        if !message_fits(message.len(), self.stack_size) {
            return Err(self.fail(Status::BufferTooSmall, "procargs message is too large"));
        }
        if let Err(status) = kernel.channel_write(to_child.raw(), &message, &raws) {
            return Err(self.fail(status, "failed to write procargs message"));
        }
        debug!(
            "[launchpad] procargs sent: {} bytes, {} handles",
            message.len(),
            raws.len()
        );
        self.release_outgoing();
        self.advance(LaunchState::MessageSent);
        Ok((thread, sp))
    }

    /// Send the dynamic-linker message. The special handles and fresh
    /// duplicates of the process, root region and thread go with it; on
    /// failure the duplicates are closed and the special handles kept.
    fn write_loader_message(&mut self, thread: &Handle, to_child: &Handle) -> Result<(), Status> {
        let kernel = to_child.kernel().ok_or(Status::InvalidHandle)?;
        let process = self.process.duplicate(Rights::SAME_RIGHTS)?;
        let root_vmar = self.root_vmar.duplicate(Rights::SAME_RIGHTS)?;
        let thread = thread.duplicate(Rights::SAME_RIGHTS)?;

        let mut raws = Vec::with_capacity(5);
        let mut info = Vec::with_capacity(5);
        let special = [
            (self.special.loader_svc.as_ref(), HandleType::LoaderService),
            (self.special.exec_vmo.as_ref(), HandleType::ExecutableVmo),
            (Some(&process), HandleType::ProcessSelf),
            (Some(&root_vmar), HandleType::RootVmar),
            (Some(&thread), HandleType::ThreadSelf),
        ];
        for (handle, ty) in special {
            if let Some(handle) = handle {
                raws.push(handle.raw());
                info.push(HandleInfo::from(ty));
            }
        }
        let message = encode_loader_message(&info, self.args.strings(), self.environ.strings())?;
        kernel.channel_write(to_child.raw(), &message, &raws)?;
        debug!(
            "[launchpad] loader message sent: {} bytes, {} handles",
            message.len(),
            raws.len()
        );

        let _ = process.into_raw();
        let _ = root_vmar.into_raw();
        let _ = thread.into_raw();
        if let Some(handle) = self.special.loader_svc.take() {
            let _ = handle.into_raw();
        }
        if let Some(handle) = self.special.exec_vmo.take() {
            let _ = handle.into_raw();
        }
        self.loader_message = false;
        Ok(())
    }

    /// Start the process. Returns a handle to it; the context keeps nothing
    /// that was transferred to the child.
    pub fn start(&mut self) -> Result<Handle, Status> {
        self.check()?;
        let kernel = Arc::clone(&self.env.kernel);
        let process = match self.process.duplicate(Rights::SAME_RIGHTS) {
            Ok(process) => process,
            Err(status) => return Err(self.fail(status, "start: cannot duplicate process handle")),
        };
        let (to_child, child_bootstrap) = match kernel.channel_create() {
            Ok((ours, theirs)) => (
                Handle::from_raw(Arc::clone(&kernel), ours),
                Handle::from_raw(Arc::clone(&kernel), theirs),
            ),
            Err(status) => return Err(self.fail(status, "start: cannot create channel")),
        };

        let thread_name = self.env.config.thread_name.clone();
        let prepared = self.prepare_start(&thread_name, &to_child);
        drop(to_child);
        let (thread, sp) = match prepared {
            Ok(prepared) => prepared,
            Err(status) => return Err(self.fail(status, "start: prepare_start() failed")),
        };

        if let Err(status) = kernel.process_start(
            process.raw(),
            thread.raw(),
            self.entry,
            sp,
            child_bootstrap.raw(),
            self.runtime_base,
        ) {
            return Err(self.fail(status, "start: process_start() failed"));
        }
        let _ = child_bootstrap.into_raw();
        drop(thread);
        self.advance(LaunchState::Started);
        info!("[launchpad] started entry=0x{:x} sp=0x{sp:x}", self.entry);
        Ok(process)
    }

    /// Start a new thread in a process that is already running. The caller
    /// supplies the channel and where the child will find its end of it.
    pub fn start_injected(
        &mut self,
        thread_name: &str,
        to_child: &Handle,
        bootstrap_in_child: usize,
    ) -> Result<(), Status> {
        self.check()?;
        let (thread, sp) = match self.prepare_start(thread_name, to_child) {
            Ok(prepared) => prepared,
            Err(status) => return Err(self.fail(status, "start_injected: prepare_start() failed")),
        };
        let kernel = Arc::clone(&self.env.kernel);
        if let Err(status) = kernel.thread_start(
            thread.raw(),
            self.entry,
            sp,
            bootstrap_in_child,
            self.runtime_base,
        ) {
            return Err(self.fail(status, "start_injected: thread_start() failed"));
        }
        self.advance(LaunchState::Started);
        info!("[launchpad] injected thread {thread_name} entry=0x{:x}", self.entry);
        Ok(())
    }

    /// Start the process and tear the context down either way.
    pub fn go(mut self) -> Result<Handle, LaunchFailure> {
        match self.start() {
            Ok(process) => Ok(process),
            Err(status) => Err(self.failure.unwrap_or(LaunchFailure {
                status,
                context: "start failed",
            })),
        }
    }
}
