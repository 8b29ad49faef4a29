// CLASSIFICATION: COMMUNITY
// Filename: stack.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Initial-thread stack geometry.

pub const PAGE_SIZE: usize = 4096;
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Largest page multiple representable in `usize`.
pub const MAX_STACK_SIZE: usize = usize::MAX & !(PAGE_SIZE - 1);

/// Round `len` up to a page multiple, `None` on overflow.
#[must_use]
pub const fn page_round_up(len: usize) -> Option<usize> {
    match len.checked_add(PAGE_SIZE - 1) {
        Some(padded) => Some(padded & !(PAGE_SIZE - 1)),
        None => None,
    }
}

/// Normalise a requested stack size: zero stays zero, anything else is
/// rounded up to a page, saturating at [`MAX_STACK_SIZE`].
#[must_use]
pub const fn round_stack_size(size: usize) -> usize {
    if size >= MAX_STACK_SIZE {
        return MAX_STACK_SIZE;
    }
    match page_round_up(size) {
        Some(rounded) => rounded,
        None => MAX_STACK_SIZE,
    }
}

/// Stack pointer handed to a thread whose stack spans `[base, base + size)`.
#[must_use]
pub const fn initial_stack_pointer(base: usize, size: usize) -> usize {
    let top = base.wrapping_add(size) & !15;
    if cfg!(target_arch = "x86_64") {
        // Entry behaves as if reached by a call: the return slot is pushed.
        top.wrapping_sub(8)
    } else {
        top
    }
}

/// Whether a bootstrap message of `len` bytes can be read onto the stack.
/// A message may use at most half of it. A `stack_size` of zero means the
/// launch allocates no stack (an injected thread brings its own); the check
/// is skipped and every `len` fits.
#[must_use]
pub const fn message_fits(len: usize, stack_size: usize) -> bool {
    stack_size == 0 || len <= stack_size / 2
}
