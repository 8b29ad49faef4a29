// Author: Lukas Bower
// Purpose: Error type for bootstrap record and loader-service framing.

use thiserror::Error;

/// Errors raised while encoding or decoding bootstrap wire messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProcargsError {
    /// The buffer ended before a fixed-size structure was complete.
    #[error("truncated message: need {needed} bytes, have {actual}")]
    Truncated {
        /// Bytes required to decode the structure.
        needed: usize,
        /// Bytes actually available.
        actual: usize,
    },
    /// The record does not start with the process-arguments magic.
    #[error("bad protocol magic {0:#x}")]
    BadProtocol(u32),
    /// The record carries an unsupported version.
    #[error("unsupported procargs version {0:#x}")]
    BadVersion(u32),
    /// A section offset points outside the message.
    #[error("section offset {offset} out of range for {len}-byte message")]
    OutOfRange {
        /// Offending offset.
        offset: u32,
        /// Total message length.
        len: usize,
    },
    /// A string table entry runs off the end of the message.
    #[error("string table entry is missing its terminator")]
    Unterminated,
    /// Assembled message length does not fit the 32-bit offset fields.
    #[error("message of {0} bytes exceeds the addressable record size")]
    TooLarge(usize),
    /// More handle-info entries than fixed slots in the record.
    #[error("{count} handles exceed the {slots} reserved slots")]
    TooManyHandles {
        /// Entries supplied.
        count: usize,
        /// Slots available.
        slots: usize,
    },
    /// Loader-service request payload is over the per-message limit.
    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Payload length supplied.
        len: usize,
        /// Largest payload accepted.
        max: usize,
    },
    /// Loader-service header carries an opcode this crate does not know.
    #[error("unknown loader-service opcode {0}")]
    UnknownOpcode(u32),
}
