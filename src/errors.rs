//! Error types for process and pipeline operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::execution::fd::StdSlot;

/// Result type for procpipe operations
pub type Result<T> = std::result::Result<T, PipeError>;

/// Errors that can occur while staging, launching or composing processes
#[derive(Error, Debug)]
pub enum PipeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Syscall error: {0}")]
    Syscall(String),

    #[error("Can't launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: nix::Error,
    },

    #[error("Can't open {}: {source}", path.display())]
    Redirection {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{0} is already redirected")]
    AlreadyRedirected(StdSlot),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
