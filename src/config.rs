//! Execution configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{PipeError, Result};

/// Owner read/write, group read, other read.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Size of a single read from a capture pipe.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Largest accepted read size; the read buffer is allocated up front.
pub const MAX_READ_CHUNK: usize = 1 << 20;

/// Settings shared by every invocation staged from the same context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecConfig {
    /// Permission bits for files created by output redirection
    pub file_mode: u32,
    /// Bytes requested per read while capturing output
    pub read_chunk: usize,
    /// Strip one trailing newline from captured text, like `$(...)`
    pub trim_trailing_newline: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            file_mode: DEFAULT_FILE_MODE,
            read_chunk: DEFAULT_READ_CHUNK,
            trim_trailing_newline: true,
        }
    }
}

impl ExecConfig {
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes;
        self
    }

    pub fn trim_trailing_newline(mut self, trim: bool) -> Self {
        self.trim_trailing_newline = trim;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.file_mode > 0o7777 {
            return Err(PipeError::InvalidConfig(format!(
                "file_mode {:o} is not a permission mask",
                self.file_mode
            )));
        }

        if self.read_chunk == 0 {
            return Err(PipeError::InvalidConfig(
                "read_chunk must be greater than zero".to_string(),
            ));
        }

        if self.read_chunk > MAX_READ_CHUNK {
            return Err(PipeError::InvalidConfig(format!(
                "read_chunk {} exceeds the {} byte limit",
                self.read_chunk, MAX_READ_CHUNK
            )));
        }

        Ok(())
    }

    /// Parse and validate a JSON document. Missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ExecConfig = serde_json::from_str(json)
            .map_err(|e| PipeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}
