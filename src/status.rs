// CLASSIFICATION: COMMUNITY
// Filename: status.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Kernel-style status codes and the diagnostic failure record.

use cohesix_procargs::ProcargsError;
use thiserror::Error;

/// Error status shared by the kernel interface, the image loader and the
/// launch context. Raw values follow the negative-integer kernel encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    #[error("internal error")]
    Internal,
    #[error("operation not supported")]
    NotSupported,
    #[error("out of resources")]
    NoResources,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("invalid handle")]
    InvalidHandle,
    #[error("wrong object type")]
    WrongType,
    #[error("out of range")]
    OutOfRange,
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("bad state")]
    BadState,
    #[error("timed out")]
    TimedOut,
    #[error("operation would block")]
    ShouldWait,
    #[error("peer closed")]
    PeerClosed,
    #[error("not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("i/o error")]
    Io,
    #[error("inconsistent state")]
    Inconsistent,
    /// Collaborator status with no named variant, kept verbatim.
    #[error("status {0}")]
    Other(i32),
}

impl Status {
    /// Wire encoding of this status.
    #[must_use]
    pub const fn into_raw(self) -> i32 {
        match self {
            Status::Internal => -1,
            Status::NotSupported => -2,
            Status::NoResources => -3,
            Status::OutOfMemory => -4,
            Status::InvalidArgs => -10,
            Status::InvalidHandle => -11,
            Status::WrongType => -12,
            Status::OutOfRange => -14,
            Status::BufferTooSmall => -15,
            Status::BadState => -20,
            Status::TimedOut => -21,
            Status::ShouldWait => -22,
            Status::PeerClosed => -24,
            Status::NotFound => -25,
            Status::AccessDenied => -30,
            Status::Io => -40,
            Status::Inconsistent => -42,
            Status::Other(raw) => raw,
        }
    }

    /// Decode a raw status. `0` is success and yields `None`.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Status> {
        Some(match raw {
            0 => return None,
            -1 => Status::Internal,
            -2 => Status::NotSupported,
            -3 => Status::NoResources,
            -4 => Status::OutOfMemory,
            -10 => Status::InvalidArgs,
            -11 => Status::InvalidHandle,
            -12 => Status::WrongType,
            -14 => Status::OutOfRange,
            -15 => Status::BufferTooSmall,
            -20 => Status::BadState,
            -21 => Status::TimedOut,
            -22 => Status::ShouldWait,
            -24 => Status::PeerClosed,
            -25 => Status::NotFound,
            -30 => Status::AccessDenied,
            -40 => Status::Io,
            -42 => Status::Inconsistent,
            other => Status::Other(other),
        })
    }
}

impl From<ProcargsError> for Status {
    fn from(err: ProcargsError) -> Self {
        match err {
            ProcargsError::TooLarge(_)
            | ProcargsError::TooManyHandles { .. }
            | ProcargsError::PayloadTooLarge { .. } => Status::BufferTooSmall,
            ProcargsError::UnknownOpcode(_) => Status::NotSupported,
            ProcargsError::Truncated { .. }
            | ProcargsError::BadProtocol(_)
            | ProcargsError::BadVersion(_)
            | ProcargsError::OutOfRange { .. }
            | ProcargsError::Unterminated => Status::InvalidArgs,
        }
    }
}

/// First failure latched by a launch context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{context}: {status}")]
pub struct LaunchFailure {
    /// Status returned by the failing step.
    pub status: Status,
    /// Short description of the failing step.
    pub context: &'static str,
}
