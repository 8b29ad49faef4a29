// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.1
// Date Modified: 2026-10-14
// Author: Lukas Bower

//! Process launch: build a process, load its image, hand it bootstrap
//! state and start it.

/// Status codes and launch diagnostics
pub mod status;

/// Kernel-object interface and the host implementation
pub mod kernel;

/// Handles queued for transfer to a child
pub mod handles;

/// Packed argument and environment lists
pub mod strings;

/// Stack sizing and placement
pub mod stack;

/// Launch configuration file
pub mod config;

/// Executable image loading
pub mod image;

/// Loader-service client
pub mod loader_svc;

/// Process-wide runtime image default
pub mod runtime_image;

/// Launch context
pub mod launchpad;

pub use config::LaunchConfig;
pub use kernel::{Handle, Kernel, RawHandle, Rights};
pub use launchpad::{LaunchEnv, LaunchState, Launchpad};
pub use status::{LaunchFailure, Status};

pub use cohesix_procargs as procargs;
