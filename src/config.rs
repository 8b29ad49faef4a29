// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Launch defaults loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use cohesix_procargs::{LDSVC_HEADER_LEN, LDSVC_MSG_MAX};
use serde::Deserialize;
use thiserror::Error;

use crate::stack::{round_stack_size, DEFAULT_STACK_SIZE};
use crate::status::Status;

/// Largest loader-service message a configuration may request.
pub const LOADER_MSG_LIMIT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid launch config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("loader_msg_max {0} outside [{min}, {max}]", min = LDSVC_HEADER_LEN + 2, max = LOADER_MSG_LIMIT)]
    LoaderMsgMax(usize),
}

impl From<&ConfigError> for Status {
    fn from(err: &ConfigError) -> Self {
        match err {
            ConfigError::Read { .. } => Status::Io,
            ConfigError::Parse(_) | ConfigError::LoaderMsgMax(_) => Status::InvalidArgs,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LaunchConfig {
    /// Initial-thread stack size in bytes; rounded up to a page.
    pub stack_size: usize,
    pub thread_name: String,
    /// Upper bound on one loader-service message, header included.
    pub loader_msg_max: usize,
    pub runtime_image: Option<PathBuf>,
    /// Directory the harness loader service resolves object names in.
    pub loader_service_root: Option<PathBuf>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            thread_name: "main".into(),
            loader_msg_max: LDSVC_MSG_MAX,
            runtime_image: None,
            loader_service_root: None,
        }
    }
}

impl LaunchConfig {
    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        let mut config: LaunchConfig = toml::from_str(data)?;
        config.validate()?;
        config.stack_size = round_stack_size(config.stack_size);
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loader_msg_max < LDSVC_HEADER_LEN + 2 || self.loader_msg_max > LOADER_MSG_LIMIT {
            return Err(ConfigError::LoaderMsgMax(self.loader_msg_max));
        }
        Ok(())
    }
}
