// CLASSIFICATION: COMMUNITY
// Filename: loader_svc.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Synchronous client for the loader service.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cohesix_procargs::{encode_ldsvc_request, LdsvcHeader, LdsvcOp, LDSVC_HEADER_LEN};
use log::{debug, warn};

use crate::kernel::{Handle, Rights};
use crate::status::Status;

/// Reply handle capacity. Anything over one is rejected after the read so
/// the extra handles are closed rather than left queued.
const REPLY_HANDLES: usize = 4;

static NEXT_TXID: AtomicU32 = AtomicU32::new(0);

/// Process-wide transaction id. Only uniqueness matters.
pub fn next_txid() -> u32 {
    NEXT_TXID.fetch_add(1, Ordering::Relaxed)
}

/// Source of loader-service channels.
pub trait LoaderServiceConnect: Send + Sync {
    fn connect(&self) -> Result<Handle, Status>;
}

/// Hands out duplicates of one well-known endpoint.
pub struct SharedEndpoint {
    endpoint: Handle,
}

impl SharedEndpoint {
    pub fn new(endpoint: Handle) -> Arc<Self> {
        Arc::new(Self { endpoint })
    }
}

impl LoaderServiceConnect for SharedEndpoint {
    fn connect(&self) -> Result<Handle, Status> {
        self.endpoint.duplicate(Rights::SAME_RIGHTS)
    }
}

/// Request/reply client over an established channel. Calls block until
/// the service answers.
pub struct LoaderServiceClient<'a> {
    channel: &'a Handle,
    msg_max: usize,
}

impl<'a> LoaderServiceClient<'a> {
    pub fn new(channel: &'a Handle, msg_max: usize) -> Self {
        Self { channel, msg_max }
    }

    /// Issue one request. Returns the handle carried by a successful reply,
    /// or the status the service reported. Malformed replies are `BadState`.
    pub fn call(&self, op: LdsvcOp, payload: &[u8]) -> Result<Option<Handle>, Status> {
        let kernel = self.channel.kernel().ok_or(Status::InvalidHandle)?;
        let txid = next_txid();
        let request = encode_ldsvc_request(txid, op, payload, self.msg_max)?;
        debug!("[ldsvc] txid={txid} op={op:?} payload={} bytes", payload.len());

        let reply = match kernel.channel_call(
            self.channel.raw(),
            &request,
            &[],
            self.msg_max,
            REPLY_HANDLES,
        ) {
            Ok(reply) => reply,
            Err(Status::BufferTooSmall) => {
                warn!("[ldsvc] txid={txid} reply overflowed the request buffer");
                return Err(Status::BadState);
            }
            Err(status) => return Err(status),
        };
        let mut handles: Vec<Handle> = reply
            .handles
            .into_iter()
            .map(|raw| Handle::from_raw(Arc::clone(kernel), raw))
            .collect();

        if reply.bytes.len() != LDSVC_HEADER_LEN {
            warn!("[ldsvc] txid={txid} reply is {} bytes", reply.bytes.len());
            return Err(Status::BadState);
        }
        let header = LdsvcHeader::decode(&reply.bytes).map_err(|_| Status::BadState)?;
        if header.opcode != LdsvcOp::Status as u32 {
            warn!("[ldsvc] txid={txid} reply opcode {}", header.opcode);
            return Err(Status::BadState);
        }
        if handles.len() > 1 {
            warn!("[ldsvc] txid={txid} reply carries {} handles", handles.len());
            return Err(Status::BadState);
        }
        let handle = handles.pop();
        if header.arg != 0 {
            if handle.is_some() || header.arg > 0 {
                warn!("[ldsvc] txid={txid} malformed failure reply arg={}", header.arg);
                return Err(Status::BadState);
            }
            return Err(Status::from_raw(header.arg).unwrap_or(Status::Internal));
        }
        Ok(handle)
    }

    /// Fetch the object named `name`, typically a dynamic linker image.
    pub fn load_object(&self, name: &str) -> Result<Handle, Status> {
        self.call(LdsvcOp::LoadObject, name.as_bytes())?
            .ok_or(Status::InvalidHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::host::HostKernel;
    use crate::kernel::ChannelMessage;
    use cohesix_procargs::LDSVC_MSG_MAX;

    #[test]
    fn txids_are_unique() {
        let a = next_txid();
        let b = next_txid();
        assert_ne!(a, b);
    }

    #[test]
    fn service_failure_is_propagated() {
        let host = HostKernel::shared();
        let channel = host.handle(host.spawn_loader_service(|_| None));
        let client = LoaderServiceClient::new(&channel, LDSVC_MSG_MAX);
        assert_eq!(client.load_object("missing.so").err(), Some(Status::NotFound));
    }

    #[test]
    fn success_without_handle_is_invalid_handle() {
        let host = HostKernel::shared();
        let channel = host.handle(host.spawn_service(|_, request| {
            let header = LdsvcHeader::decode(&request.bytes).map_err(Status::from)?;
            Ok(ChannelMessage {
                bytes: LdsvcHeader::status(header.txid, 0).encode().to_vec(),
                handles: Vec::new(),
            })
        }));
        let client = LoaderServiceClient::new(&channel, LDSVC_MSG_MAX);
        assert_eq!(client.load_object("ld.so.1").err(), Some(Status::InvalidHandle));
        assert!(client.call(LdsvcOp::Done, b"").unwrap().is_none());
    }

    #[test]
    fn oversize_payload_fails_locally() {
        let host = HostKernel::shared();
        let channel = host.handle(host.spawn_loader_service(|_| None));
        let client = LoaderServiceClient::new(&channel, 64);
        let name = "x".repeat(64 - LDSVC_HEADER_LEN);
        assert_eq!(client.load_object(&name).err(), Some(Status::BufferTooSmall));
    }
}
