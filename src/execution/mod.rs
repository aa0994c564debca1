//! Execution layer: launching children and reaping them
//!
//! This module owns every `fork`, `exec` and `waitpid` in the crate.
//!
//! # Features
//!
//! - **Launching**: fork/exec with descriptors duplicated onto 0, 1 and 2
//! - **Capture pipes**: stdout routed to a pipe the parent reads
//! - **Reaping**: blocking `wait` and non-blocking `check_exited`, scoped to one pid
//! - **Redirection targets**: files opened with fixed permission bits, or raw descriptors
//!
//! # Examples
//!
//! ```no_run
//! use procpipe::Command;
//! use procpipe::execution::ProcessLauncher;
//!
//! let handle = ProcessLauncher::launch(&Command::new("true"), 0, 1, 2)?;
//! let done = ProcessLauncher::wait(handle)?;
//! assert!(done.success());
//! # Ok::<(), procpipe::PipeError>(())
//! ```

pub mod fd;
pub mod process;
pub use fd::{OpenMode, Slot, StdSlot, Target};
pub use process::{
    ExitCheck, ExitState, PipeSet, ProcessHandle, ProcessLauncher, TerminatedProcess,
};
