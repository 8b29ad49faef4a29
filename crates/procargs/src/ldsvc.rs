// Author: Lukas Bower
// Purpose: Loader-service request/reply header and request framing.

use alloc::vec::Vec;

use crate::ProcargsError;

/// Encoded size of [`LdsvcHeader`].
pub const LDSVC_HEADER_LEN: usize = 20;
/// Default upper bound on a loader-service message, header included.
pub const LDSVC_MSG_MAX: usize = 1024;

/// Loader-service operation codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdsvcOp {
    /// Reply carrying a status and at most one handle.
    Status = 0,
    /// Client is finished with the service.
    Done = 1,
    /// Fetch a named shared object.
    LoadObject = 2,
    /// Free-form diagnostic text.
    DebugPrint = 3,
    /// Fetch a script interpreter.
    LoadScriptInterp = 4,
}

impl TryFrom<u32> for LdsvcOp {
    type Error = ProcargsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Status,
            1 => Self::Done,
            2 => Self::LoadObject,
            3 => Self::DebugPrint,
            4 => Self::LoadScriptInterp,
            other => return Err(ProcargsError::UnknownOpcode(other)),
        })
    }
}

/// Fixed loader-service header. The reserved words are always zero on
/// encode and ignored on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdsvcHeader {
    /// Transaction identifier chosen by the client.
    pub txid: u32,
    /// Raw operation code; see [`LdsvcOp`].
    pub opcode: u32,
    /// Status on replies, zero on requests.
    pub arg: i32,
}

impl LdsvcHeader {
    /// Request header for `op`.
    #[must_use]
    pub const fn request(txid: u32, op: LdsvcOp) -> Self {
        Self {
            txid,
            opcode: op as u32,
            arg: 0,
        }
    }

    /// Status reply header.
    #[must_use]
    pub const fn status(txid: u32, arg: i32) -> Self {
        Self {
            txid,
            opcode: LdsvcOp::Status as u32,
            arg,
        }
    }

    /// Little-endian encoding.
    #[must_use]
    pub fn encode(&self) -> [u8; LDSVC_HEADER_LEN] {
        let mut out = [0u8; LDSVC_HEADER_LEN];
        out[0..4].copy_from_slice(&self.txid.to_le_bytes());
        out[4..8].copy_from_slice(&self.opcode.to_le_bytes());
        out[8..12].copy_from_slice(&self.arg.to_le_bytes());
        out
    }

    /// Decode the header from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProcargsError> {
        if bytes.len() < LDSVC_HEADER_LEN {
            return Err(ProcargsError::Truncated {
                needed: LDSVC_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let word = |start: usize| {
            [
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ]
        };
        Ok(Self {
            txid: u32::from_le_bytes(word(0)),
            opcode: u32::from_le_bytes(word(4)),
            arg: i32::from_le_bytes(word(8)),
        })
    }

    /// Decoded operation code.
    pub fn op(&self) -> Result<LdsvcOp, ProcargsError> {
        LdsvcOp::try_from(self.opcode)
    }
}

/// Frame a request: header, payload, trailing NUL. The whole message must
/// stay under `msg_max` bytes.
pub fn encode_ldsvc_request(
    txid: u32,
    op: LdsvcOp,
    payload: &[u8],
    msg_max: usize,
) -> Result<Vec<u8>, ProcargsError> {
    let max = msg_max.saturating_sub(LDSVC_HEADER_LEN);
    if payload.len() >= max {
        return Err(ProcargsError::PayloadTooLarge {
            len: payload.len(),
            max: max.saturating_sub(1),
        });
    }
    let mut out = Vec::with_capacity(LDSVC_HEADER_LEN + payload.len() + 1);
    out.extend_from_slice(&LdsvcHeader::request(txid, op).encode());
    out.extend_from_slice(payload);
    out.push(0);
    Ok(out)
}

/// Split a request into its header and payload, dropping the terminator.
pub fn decode_ldsvc_request(bytes: &[u8]) -> Result<(LdsvcHeader, &[u8]), ProcargsError> {
    let header = LdsvcHeader::decode(bytes)?;
    let body = &bytes[LDSVC_HEADER_LEN..];
    let payload = match body.iter().position(|&b| b == 0) {
        Some(end) => &body[..end],
        None => return Err(ProcargsError::Unterminated),
    };
    Ok((header, payload))
}
