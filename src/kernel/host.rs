// CLASSIFICATION: COMMUNITY
// Filename: host.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! In-process kernel used by tests and the `cohlaunch` harness.
//!
//! Objects live in a single table behind a mutex. Handles are never
//! reused, so a stale value always resolves to `InvalidHandle`. Handles
//! queued in a channel, moved into a started process, or held by a spawned
//! service are not counted by [`HostKernel::live_handles`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cohesix_procargs::{decode_ldsvc_request, LdsvcHeader, LdsvcOp};
use log::{debug, info};

use super::{ChannelMessage, Handle, Kernel, MapFlags, RawHandle, Rights};
use crate::stack::{page_round_up, PAGE_SIZE};
use crate::status::Status;

/// Kernel object identifier.
pub type Koid = u64;

/// Base address of every root address-space region. Low enough for
/// fixed-address programs linked at the conventional 0x400000.
pub const ROOT_VMAR_BASE: usize = 0x0010_0000;
/// Size of every root address-space region.
pub const ROOT_VMAR_LEN: usize = (usize::MAX >> 17) & !(PAGE_SIZE - 1);
/// Largest channel message payload.
pub const MAX_MSG_BYTES: usize = 64 * 1024;
/// Largest number of handles in one channel message.
pub const MAX_MSG_HANDLES: usize = 64;
/// Largest memory object the host will back.
pub const MAX_VMO_SIZE: usize = 64 << 20;

/// Peer callback serving `channel_call` requests.
pub type Responder =
    Box<dyn FnMut(&HostKernel, ChannelMessage) -> Result<ChannelMessage, Status> + Send>;

/// Operations that can be made to fail with [`HostKernel::fail_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    Close,
    Duplicate,
    ProcessCreate,
    ProcessStart,
    ThreadCreate,
    ThreadStart,
    ChannelCreate,
    ChannelWrite,
    ChannelRead,
    ChannelCall,
    VmoCreate,
    VmoRead,
    VmoWrite,
    VmarAllocate,
    VmarMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Job,
    Process,
    Thread,
    Channel,
    Vmo,
    Vmar,
}

/// How the kernel was asked to start a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRecord {
    pub thread: Koid,
    pub entry: usize,
    pub stack: usize,
    /// Bootstrap handle as seen by the child.
    pub arg1: RawHandle,
    pub arg2: usize,
}

/// How the kernel was asked to start a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadStart {
    pub entry: usize,
    pub stack: usize,
    pub arg1: usize,
    pub arg2: usize,
}

/// A memory object mapped into a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub addr: usize,
    pub len: usize,
    pub vmo: Koid,
    pub vmo_offset: usize,
    pub flags: MapFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Local,
    Transit,
    Service,
    Process(Koid),
}

struct HandleEntry {
    koid: Koid,
    rights: Rights,
    owner: Owner,
}

struct ProcessObject {
    name: String,
    mappings: Vec<Mapping>,
    started: Option<StartRecord>,
}

struct ThreadObject {
    process: Koid,
    name: String,
    started: Option<ThreadStart>,
}

struct ChannelObject {
    peer: Koid,
    peer_closed: bool,
    queue: VecDeque<ChannelMessage>,
}

struct VmarObject {
    process: Koid,
    base: usize,
    len: usize,
    cursor: usize,
    occupied: Vec<(usize, usize)>,
}

impl VmarObject {
    fn new(process: Koid, base: usize, len: usize) -> Self {
        Self {
            process,
            base,
            len,
            cursor: base,
            occupied: Vec::new(),
        }
    }

    fn place(&mut self, offset: Option<usize>, len: usize) -> Result<usize, Status> {
        let limit = self.base + self.len;
        let start = match offset {
            Some(off) => {
                if off % PAGE_SIZE != 0 {
                    return Err(Status::InvalidArgs);
                }
                let start = self.base.checked_add(off).ok_or(Status::OutOfRange)?;
                let end = start.checked_add(len).ok_or(Status::OutOfRange)?;
                if end > limit {
                    return Err(Status::OutOfRange);
                }
                if self
                    .occupied
                    .iter()
                    .any(|&(s, l)| start < s + l && s < end)
                {
                    return Err(Status::NoResources);
                }
                start
            }
            None => {
                let start = self.cursor;
                if start.checked_add(len).map_or(true, |end| end > limit) {
                    return Err(Status::NoResources);
                }
                start
            }
        };
        self.occupied.push((start, len));
        self.cursor = self.cursor.max(start + len + PAGE_SIZE);
        Ok(start)
    }
}

enum Object {
    Job,
    Process(ProcessObject),
    Thread(ThreadObject),
    Channel(ChannelObject),
    Vmo(Vec<u8>),
    Vmar(VmarObject),
}

impl Object {
    fn kind(&self) -> ObjectType {
        match self {
            Object::Job => ObjectType::Job,
            Object::Process(_) => ObjectType::Process,
            Object::Thread(_) => ObjectType::Thread,
            Object::Channel(_) => ObjectType::Channel,
            Object::Vmo(_) => ObjectType::Vmo,
            Object::Vmar(_) => ObjectType::Vmar,
        }
    }
}

struct ObjectEntry {
    refs: usize,
    object: Object,
}

struct Fault {
    op: HostOp,
    skip: usize,
    status: Status,
}

#[derive(Default)]
struct HostState {
    next_handle: u32,
    next_koid: Koid,
    handles: HashMap<RawHandle, HandleEntry>,
    objects: HashMap<Koid, ObjectEntry>,
    faults: Vec<Fault>,
    bad_closes: usize,
}

macro_rules! typed_object {
    ($name:ident, $variant:ident, $ty:ty) => {
        fn $name(&mut self, koid: Koid) -> Result<&mut $ty, Status> {
            match self.objects.get_mut(&koid).map(|entry| &mut entry.object) {
                Some(Object::$variant(inner)) => Ok(inner),
                Some(_) => Err(Status::WrongType),
                None => Err(Status::InvalidHandle),
            }
        }
    };
}

impl HostState {
    fn trip(&mut self, op: HostOp) -> Result<(), Status> {
        if let Some(idx) = self.faults.iter().position(|fault| fault.op == op) {
            if self.faults[idx].skip == 0 {
                let fault = self.faults.remove(idx);
                debug!("[host] injected {:?} failure: {}", op, fault.status);
                return Err(fault.status);
            }
            self.faults[idx].skip -= 1;
        }
        Ok(())
    }

    fn insert_object(&mut self, object: Object) -> Koid {
        self.next_koid += 1;
        let koid = 1000 + self.next_koid;
        self.objects.insert(koid, ObjectEntry { refs: 0, object });
        koid
    }

    fn new_handle(&mut self, koid: Koid, rights: Rights, owner: Owner) -> RawHandle {
        self.next_handle += 1;
        let raw = RawHandle(self.next_handle);
        if let Some(entry) = self.objects.get_mut(&koid) {
            entry.refs += 1;
        }
        self.handles.insert(raw, HandleEntry { koid, rights, owner });
        raw
    }

    fn local(&self, raw: RawHandle) -> Result<&HandleEntry, Status> {
        match self.handles.get(&raw) {
            Some(entry) if entry.owner == Owner::Local => Ok(entry),
            _ => Err(Status::InvalidHandle),
        }
    }

    fn koid_of(&self, raw: RawHandle) -> Result<Koid, Status> {
        self.local(raw).map(|entry| entry.koid)
    }

    typed_object!(process_mut, Process, ProcessObject);
    typed_object!(thread_mut, Thread, ThreadObject);
    typed_object!(channel_mut, Channel, ChannelObject);
    typed_object!(vmo_mut, Vmo, Vec<u8>);
    typed_object!(vmar_mut, Vmar, VmarObject);

    fn channel_pair(&mut self) -> (Koid, Koid) {
        let a = self.insert_object(Object::Channel(ChannelObject {
            peer: 0,
            peer_closed: false,
            queue: VecDeque::new(),
        }));
        let b = self.insert_object(Object::Channel(ChannelObject {
            peer: a,
            peer_closed: false,
            queue: VecDeque::new(),
        }));
        if let Ok(first) = self.channel_mut(a) {
            first.peer = b;
        }
        (a, b)
    }

    fn open_peer(&mut self, channel: RawHandle) -> Result<Koid, Status> {
        let koid = self.koid_of(channel)?;
        let endpoint = self.channel_mut(koid)?;
        if endpoint.peer_closed {
            return Err(Status::PeerClosed);
        }
        Ok(endpoint.peer)
    }

    fn check_transfer(
        &self,
        channel: RawHandle,
        bytes: &[u8],
        handles: &[RawHandle],
    ) -> Result<(), Status> {
        if bytes.len() > MAX_MSG_BYTES || handles.len() > MAX_MSG_HANDLES {
            return Err(Status::OutOfRange);
        }
        for (idx, raw) in handles.iter().enumerate() {
            if *raw == channel {
                return Err(Status::NotSupported);
            }
            if handles[..idx].contains(raw) {
                return Err(Status::InvalidArgs);
            }
            if !self.local(*raw)?.rights.contains(Rights::TRANSFER) {
                return Err(Status::AccessDenied);
            }
        }
        Ok(())
    }

    fn set_owner(&mut self, handles: &[RawHandle], owner: Owner) {
        for raw in handles {
            if let Some(entry) = self.handles.get_mut(raw) {
                entry.owner = owner;
            }
        }
    }

    /// Drop handles, closing channel endpoints whose last handle went away
    /// and everything still queued on them.
    fn release(&mut self, raw: RawHandle) {
        let mut pending = vec![raw];
        while let Some(raw) = pending.pop() {
            let Some(entry) = self.handles.remove(&raw) else {
                continue;
            };
            let Some(object) = self.objects.get_mut(&entry.koid) else {
                continue;
            };
            object.refs = object.refs.saturating_sub(1);
            if object.refs != 0 {
                continue;
            }
            let peer = match &mut object.object {
                Object::Channel(endpoint) => {
                    for message in endpoint.queue.drain(..) {
                        pending.extend(message.handles);
                    }
                    Some(endpoint.peer)
                }
                _ => None,
            };
            if let Some(peer) = peer {
                if let Ok(endpoint) = self.channel_mut(peer) {
                    endpoint.peer_closed = true;
                }
            }
        }
    }
}

/// Deterministic kernel backed by process memory.
pub struct HostKernel {
    state: Mutex<HostState>,
    responders: Mutex<HashMap<Koid, Arc<Mutex<Responder>>>>,
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl HostKernel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            responders: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Wrap a raw handle owned by the caller.
    pub fn handle(self: &Arc<Self>, raw: RawHandle) -> Handle {
        let kernel: Arc<dyn Kernel> = Arc::clone(self) as Arc<dyn Kernel>;
        Handle::from_raw(kernel, raw)
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next call to `op` with `status`.
    pub fn fail_next(&self, op: HostOp, status: Status) {
        self.fail_at(op, 0, status);
    }

    /// Let `skip` calls to `op` succeed, then fail the following one.
    pub fn fail_at(&self, op: HostOp, skip: usize, status: Status) {
        self.lock().faults.push(Fault { op, skip, status });
    }

    pub fn create_job(&self) -> RawHandle {
        let mut state = self.lock();
        let koid = state.insert_object(Object::Job);
        state.new_handle(koid, Rights::DEFAULT, Owner::Local)
    }

    /// Create a memory object holding exactly `bytes`.
    pub fn vmo_with_contents(&self, bytes: &[u8]) -> Result<RawHandle, Status> {
        if bytes.len() > MAX_VMO_SIZE {
            return Err(Status::NoResources);
        }
        let mut state = self.lock();
        let koid = state.insert_object(Object::Vmo(bytes.to_vec()));
        Ok(state.new_handle(koid, Rights::DEFAULT, Owner::Local))
    }

    /// Handles currently owned by the caller.
    pub fn live_handles(&self) -> usize {
        self.lock()
            .handles
            .values()
            .filter(|entry| entry.owner == Owner::Local)
            .count()
    }

    /// Close calls that named a handle the caller did not own.
    pub fn bad_closes(&self) -> usize {
        self.lock().bad_closes
    }

    pub fn object_type(&self, raw: RawHandle) -> Option<ObjectType> {
        let state = self.lock();
        let koid = state.handles.get(&raw)?.koid;
        state.objects.get(&koid).map(|entry| entry.object.kind())
    }

    pub fn koid(&self, raw: RawHandle) -> Option<Koid> {
        self.lock().handles.get(&raw).map(|entry| entry.koid)
    }

    pub fn rights(&self, raw: RawHandle) -> Option<Rights> {
        self.lock().handles.get(&raw).map(|entry| entry.rights)
    }

    pub fn process_name(&self, process: RawHandle) -> Option<String> {
        let mut state = self.lock();
        let koid = state.koid_of(process).ok()?;
        state.process_mut(koid).ok().map(|proc| proc.name.clone())
    }

    pub fn thread_name(&self, thread: Koid) -> Option<String> {
        self.lock()
            .thread_mut(thread)
            .ok()
            .map(|thread| thread.name.clone())
    }

    pub fn process_started(&self, process: RawHandle) -> Option<StartRecord> {
        let mut state = self.lock();
        let koid = state.koid_of(process).ok()?;
        state.process_mut(koid).ok()?.started
    }

    pub fn thread_started(&self, thread: RawHandle) -> Option<ThreadStart> {
        let mut state = self.lock();
        let koid = state.koid_of(thread).ok()?;
        state.thread_mut(koid).ok()?.started
    }

    pub fn mappings(&self, process: RawHandle) -> Vec<Mapping> {
        let mut state = self.lock();
        let Ok(koid) = state.koid_of(process) else {
            return Vec::new();
        };
        state
            .process_mut(koid)
            .map(|proc| proc.mappings.clone())
            .unwrap_or_default()
    }

    /// Read `len` bytes of the address space of `process` starting at `addr`.
    pub fn read_mapped(
        &self,
        process: RawHandle,
        addr: usize,
        len: usize,
    ) -> Result<Vec<u8>, Status> {
        let mut state = self.lock();
        let koid = state.koid_of(process)?;
        let mappings = state.process_mut(koid)?.mappings.clone();
        let mut out = Vec::with_capacity(len);
        let mut cursor = addr;
        while out.len() < len {
            let mapping = mappings
                .iter()
                .find(|m| cursor >= m.addr && cursor < m.addr + m.len)
                .ok_or(Status::NotFound)?;
            let data = state.vmo_mut(mapping.vmo)?;
            let run = (mapping.addr + mapping.len - cursor).min(len - out.len());
            let start = mapping.vmo_offset + (cursor - mapping.addr);
            for idx in start..start + run {
                out.push(data.get(idx).copied().unwrap_or(0));
            }
            cursor += run;
        }
        Ok(out)
    }

    /// Drain the bootstrap channel of a started process. The handles in the
    /// returned messages belong to the child.
    pub fn take_bootstrap(&self, process: RawHandle) -> Result<Vec<ChannelMessage>, Status> {
        let mut state = self.lock();
        let koid = state.koid_of(process)?;
        let record = state.process_mut(koid)?.started.ok_or(Status::BadState)?;
        let endpoint = state
            .handles
            .get(&record.arg1)
            .map(|entry| entry.koid)
            .ok_or(Status::PeerClosed)?;
        let messages: Vec<ChannelMessage> = state.channel_mut(endpoint)?.queue.drain(..).collect();
        for message in &messages {
            state.set_owner(&message.handles, Owner::Process(koid));
        }
        Ok(messages)
    }

    /// Serve `channel_call` requests on a new channel with `responder`.
    /// Returns the client endpoint.
    pub fn spawn_service<F>(&self, responder: F) -> RawHandle
    where
        F: FnMut(&HostKernel, ChannelMessage) -> Result<ChannelMessage, Status> + Send + 'static,
    {
        let (client, server) = {
            let mut state = self.lock();
            let (client, server) = state.channel_pair();
            let raw = state.new_handle(client, Rights::DEFAULT, Owner::Local);
            state.new_handle(server, Rights::DEFAULT, Owner::Service);
            (raw, server)
        };
        let responder: Responder = Box::new(responder);
        self.responders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server, Arc::new(Mutex::new(responder)));
        client
    }

    /// Loader service answering `LoadObject` from `resolve`.
    pub fn spawn_loader_service<F>(&self, mut resolve: F) -> RawHandle
    where
        F: FnMut(&str) -> Option<Vec<u8>> + Send + 'static,
    {
        self.spawn_service(move |kernel, request| {
            for raw in &request.handles {
                let _ = kernel.handle_close(*raw);
            }
            let (header, payload) = decode_ldsvc_request(&request.bytes).map_err(Status::from)?;
            let reply = |status: i32, handles: Vec<RawHandle>| ChannelMessage {
                bytes: LdsvcHeader::status(header.txid, status).encode().to_vec(),
                handles,
            };
            let name = String::from_utf8_lossy(payload);
            match header.op() {
                Ok(LdsvcOp::LoadObject) | Ok(LdsvcOp::LoadScriptInterp) => match resolve(&name) {
                    Some(bytes) => {
                        let vmo = kernel.vmo_with_contents(&bytes)?;
                        debug!("[host] ldsvc served {name} ({} bytes)", bytes.len());
                        Ok(reply(0, vec![vmo]))
                    }
                    None => Ok(reply(Status::NotFound.into_raw(), Vec::new())),
                },
                Ok(LdsvcOp::DebugPrint) => {
                    info!("[ldsvc] {name}");
                    Ok(reply(0, Vec::new()))
                }
                Ok(LdsvcOp::Done) => Ok(reply(0, Vec::new())),
                _ => Ok(reply(Status::NotSupported.into_raw(), Vec::new())),
            }
        })
    }

    fn close_quietly(&self, handles: &[RawHandle]) {
        let mut state = self.lock();
        for raw in handles {
            state.release(*raw);
        }
    }
}

impl Kernel for HostKernel {
    fn handle_close(&self, handle: RawHandle) -> Result<(), Status> {
        let mut state = self.lock();
        state.trip(HostOp::Close)?;
        if state.local(handle).is_err() {
            state.bad_closes += 1;
            return Err(Status::InvalidHandle);
        }
        state.release(handle);
        Ok(())
    }

    fn handle_duplicate(&self, handle: RawHandle, rights: Rights) -> Result<RawHandle, Status> {
        let mut state = self.lock();
        state.trip(HostOp::Duplicate)?;
        let entry = state.local(handle)?;
        if !entry.rights.contains(Rights::DUPLICATE) {
            return Err(Status::AccessDenied);
        }
        let granted = if rights.contains(Rights::SAME_RIGHTS) {
            entry.rights
        } else if entry.rights.contains(rights) {
            rights
        } else {
            return Err(Status::InvalidArgs);
        };
        let koid = entry.koid;
        Ok(state.new_handle(koid, granted, Owner::Local))
    }

    fn process_create(&self, job: RawHandle, name: &str) -> Result<(RawHandle, RawHandle), Status> {
        let mut state = self.lock();
        state.trip(HostOp::ProcessCreate)?;
        let job_koid = state.koid_of(job)?;
        match state.objects.get(&job_koid).map(|entry| &entry.object) {
            Some(Object::Job) => {}
            _ => return Err(Status::WrongType),
        }
        let process = state.insert_object(Object::Process(ProcessObject {
            name: name.to_owned(),
            mappings: Vec::new(),
            started: None,
        }));
        let vmar = state.insert_object(Object::Vmar(VmarObject::new(
            process,
            ROOT_VMAR_BASE,
            ROOT_VMAR_LEN,
        )));
        let proc_handle = state.new_handle(process, Rights::DEFAULT, Owner::Local);
        let vmar_handle = state.new_handle(vmar, Rights::DEFAULT, Owner::Local);
        debug!("[host] created process {name} koid={process}");
        Ok((proc_handle, vmar_handle))
    }

    fn process_start(
        &self,
        process: RawHandle,
        thread: RawHandle,
        entry: usize,
        stack: usize,
        arg1: RawHandle,
        arg2: usize,
    ) -> Result<(), Status> {
        let mut state = self.lock();
        state.trip(HostOp::ProcessStart)?;
        let proc_koid = state.koid_of(process)?;
        let thread_koid = state.koid_of(thread)?;
        if state.process_mut(proc_koid)?.started.is_some() {
            return Err(Status::BadState);
        }
        {
            let first = state.thread_mut(thread_koid)?;
            if first.process != proc_koid {
                return Err(Status::AccessDenied);
            }
            if first.started.is_some() {
                return Err(Status::BadState);
            }
        }
        if !state.local(arg1)?.rights.contains(Rights::TRANSFER) {
            return Err(Status::AccessDenied);
        }
        state.set_owner(&[arg1], Owner::Process(proc_koid));
        state.thread_mut(thread_koid)?.started = Some(ThreadStart {
            entry,
            stack,
            arg1: arg1.0 as usize,
            arg2,
        });
        state.process_mut(proc_koid)?.started = Some(StartRecord {
            thread: thread_koid,
            entry,
            stack,
            arg1,
            arg2,
        });
        info!("[host] process koid={proc_koid} started entry=0x{entry:x} sp=0x{stack:x}");
        Ok(())
    }

    fn thread_create(&self, process: RawHandle, name: &str) -> Result<RawHandle, Status> {
        let mut state = self.lock();
        state.trip(HostOp::ThreadCreate)?;
        let proc_koid = state.koid_of(process)?;
        state.process_mut(proc_koid)?;
        let thread = state.insert_object(Object::Thread(ThreadObject {
            process: proc_koid,
            name: name.to_owned(),
            started: None,
        }));
        Ok(state.new_handle(thread, Rights::DEFAULT, Owner::Local))
    }

    fn thread_start(
        &self,
        thread: RawHandle,
        entry: usize,
        stack: usize,
        arg1: usize,
        arg2: usize,
    ) -> Result<(), Status> {
        let mut state = self.lock();
        state.trip(HostOp::ThreadStart)?;
        let koid = state.koid_of(thread)?;
        let target = state.thread_mut(koid)?;
        if target.started.is_some() {
            return Err(Status::BadState);
        }
        target.started = Some(ThreadStart {
            entry,
            stack,
            arg1,
            arg2,
        });
        Ok(())
    }

    fn channel_create(&self) -> Result<(RawHandle, RawHandle), Status> {
        let mut state = self.lock();
        state.trip(HostOp::ChannelCreate)?;
        let (a, b) = state.channel_pair();
        let first = state.new_handle(a, Rights::DEFAULT, Owner::Local);
        let second = state.new_handle(b, Rights::DEFAULT, Owner::Local);
        Ok((first, second))
    }

    fn channel_write(
        &self,
        channel: RawHandle,
        bytes: &[u8],
        handles: &[RawHandle],
    ) -> Result<(), Status> {
        let mut state = self.lock();
        state.trip(HostOp::ChannelWrite)?;
        let peer = state.open_peer(channel)?;
        state.check_transfer(channel, bytes, handles)?;
        state.set_owner(handles, Owner::Transit);
        state.channel_mut(peer)?.queue.push_back(ChannelMessage {
            bytes: bytes.to_vec(),
            handles: handles.to_vec(),
        });
        Ok(())
    }

    fn channel_read(&self, channel: RawHandle) -> Result<ChannelMessage, Status> {
        let mut state = self.lock();
        state.trip(HostOp::ChannelRead)?;
        let koid = state.koid_of(channel)?;
        let endpoint = state.channel_mut(koid)?;
        let peer_closed = endpoint.peer_closed;
        match endpoint.queue.pop_front() {
            Some(message) => {
                state.set_owner(&message.handles, Owner::Local);
                Ok(message)
            }
            None if peer_closed => Err(Status::PeerClosed),
            None => Err(Status::ShouldWait),
        }
    }

    fn channel_call(
        &self,
        channel: RawHandle,
        bytes: &[u8],
        handles: &[RawHandle],
        max_bytes: usize,
        max_handles: usize,
    ) -> Result<ChannelMessage, Status> {
        let peer = {
            let mut state = self.lock();
            state.trip(HostOp::ChannelCall)?;
            let peer = state.open_peer(channel)?;
            state.check_transfer(channel, bytes, handles)?;
            peer
        };
        let responder = self
            .responders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer)
            .cloned()
            .ok_or(Status::TimedOut)?;
        let request = ChannelMessage {
            bytes: bytes.to_vec(),
            handles: handles.to_vec(),
        };
        let reply = {
            let mut guard = responder.lock().unwrap_or_else(PoisonError::into_inner);
            let respond: &mut Responder = &mut guard;
            respond(self, request)?
        };
        if reply.bytes.len() > max_bytes || reply.handles.len() > max_handles {
            self.close_quietly(&reply.handles);
            return Err(Status::BufferTooSmall);
        }
        Ok(reply)
    }

    fn vmo_create(&self, size: usize) -> Result<RawHandle, Status> {
        let mut state = self.lock();
        state.trip(HostOp::VmoCreate)?;
        if size > MAX_VMO_SIZE {
            return Err(Status::NoResources);
        }
        let koid = state.insert_object(Object::Vmo(vec![0; size]));
        Ok(state.new_handle(koid, Rights::DEFAULT, Owner::Local))
    }

    fn vmo_size(&self, vmo: RawHandle) -> Result<usize, Status> {
        let mut state = self.lock();
        let koid = state.koid_of(vmo)?;
        Ok(state.vmo_mut(koid)?.len())
    }

    fn vmo_read(&self, vmo: RawHandle, offset: usize, buf: &mut [u8]) -> Result<(), Status> {
        let mut state = self.lock();
        state.trip(HostOp::VmoRead)?;
        let koid = state.koid_of(vmo)?;
        let data = state.vmo_mut(koid)?;
        let end = offset.checked_add(buf.len()).ok_or(Status::OutOfRange)?;
        let src = data.get(offset..end).ok_or(Status::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn vmo_write(&self, vmo: RawHandle, offset: usize, bytes: &[u8]) -> Result<(), Status> {
        let mut state = self.lock();
        state.trip(HostOp::VmoWrite)?;
        let koid = state.koid_of(vmo)?;
        let data = state.vmo_mut(koid)?;
        let end = offset.checked_add(bytes.len()).ok_or(Status::OutOfRange)?;
        let dst = data.get_mut(offset..end).ok_or(Status::OutOfRange)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn vmar_allocate(
        &self,
        parent: RawHandle,
        offset: Option<usize>,
        len: usize,
    ) -> Result<(RawHandle, usize), Status> {
        let mut state = self.lock();
        state.trip(HostOp::VmarAllocate)?;
        if len == 0 {
            return Err(Status::InvalidArgs);
        }
        let len = page_round_up(len).ok_or(Status::OutOfRange)?;
        let koid = state.koid_of(parent)?;
        let region = state.vmar_mut(koid)?;
        let base = region.place(offset, len)?;
        let process = region.process;
        let child = state.insert_object(Object::Vmar(VmarObject::new(process, base, len)));
        Ok((state.new_handle(child, Rights::DEFAULT, Owner::Local), base))
    }

    fn vmar_base(&self, vmar: RawHandle) -> Result<usize, Status> {
        let mut state = self.lock();
        let koid = state.koid_of(vmar)?;
        Ok(state.vmar_mut(koid)?.base)
    }

    fn vmar_map(
        &self,
        vmar: RawHandle,
        offset: Option<usize>,
        vmo: RawHandle,
        vmo_offset: usize,
        len: usize,
        flags: MapFlags,
    ) -> Result<usize, Status> {
        let mut state = self.lock();
        state.trip(HostOp::VmarMap)?;
        if len == 0 || vmo_offset % PAGE_SIZE != 0 {
            return Err(Status::InvalidArgs);
        }
        let len = page_round_up(len).ok_or(Status::OutOfRange)?;
        let vmo_koid = state.koid_of(vmo)?;
        let vmo_len = page_round_up(state.vmo_mut(vmo_koid)?.len()).ok_or(Status::OutOfRange)?;
        if vmo_offset.checked_add(len).map_or(true, |end| end > vmo_len) {
            return Err(Status::OutOfRange);
        }
        let vmar_koid = state.koid_of(vmar)?;
        let region = state.vmar_mut(vmar_koid)?;
        let addr = region.place(offset, len)?;
        let process = region.process;
        state.process_mut(process)?.mappings.push(Mapping {
            addr,
            len,
            vmo: vmo_koid,
            vmo_offset,
            flags,
        });
        Ok(addr)
    }
}
