// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide the process bootstrap wire formats shared by launcher and child runtime.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![no_std]

//! Wire definitions for the two binary contracts a freshly launched
//! process depends on: the process-arguments bootstrap record read by its
//! initial thread, and the request/reply header spoken with the loader
//! service. All multi-byte fields are little-endian.

extern crate alloc;

#[cfg(test)]
extern crate std;

mod error;
mod handle_info;
mod ldsvc;
mod message;

pub use error::ProcargsError;
pub use handle_info::{HandleInfo, HandleType};
pub use ldsvc::{
    decode_ldsvc_request, encode_ldsvc_request, LdsvcHeader, LdsvcOp, LDSVC_HEADER_LEN,
    LDSVC_MSG_MAX,
};
pub use message::{
    encode_loader_message, encode_procargs, procargs_len, ProcArgs, ProcArgsHeader, Strings,
    LOADER_HANDLE_SLOTS, PROCARGS_HEADER_LEN, PROCARGS_PROTOCOL, PROCARGS_VERSION,
};
