//! procpipe: shell-like process composition without a shell
//!
//! Run external programs with sequencing, pipes, conditional chaining,
//! redirection, backgrounding and output capture, expressed as Rust values.
//! Nothing is parsed: commands are argument vectors and control flow is an
//! explicit tree.
//!
//! # Modules
//!
//! - **command**: argument vectors
//! - **pending**: staged invocations, run exactly once (or on drop)
//! - **compose**: sequence, pipe, and, or, background on staged invocations
//! - **capture**: `$(...)`-style output capture
//! - **pipeline**: pipeline AST, builder and evaluator
//! - **jobs**: outstanding children and explicit reaping
//! - **execution**: fork/exec, descriptor wiring, wait
//! - **context**: configuration and jobs threaded through evaluation
//!
//! # Example
//!
//! ```no_run
//! use procpipe::{Command, ExecContext, Pipeline};
//!
//! let mut ctx = ExecContext::default();
//!
//! let sorted = Pipeline::from(Command::new("printf").arg("b\\na\\n"))
//!     .pipe(Command::new("sort"));
//! assert_eq!(ctx.capture(&sorted)?, "a\nb");
//!
//! let build = Pipeline::from(Command::new("make"))
//!     .redirect_stdout("build.log")
//!     .redirect_stderr(1)
//!     .and(Command::new("./app"));
//! let status = ctx.run(&build)?;
//! println!("build: {}", status);
//!
//! ctx.reap_all()?;
//! # Ok::<(), procpipe::PipeError>(())
//! ```

// Core modules
pub mod config;
pub mod errors;

// Layered modules
pub mod capture;
pub mod command;
pub mod compose;
pub mod execution;
pub mod jobs;
pub mod pending;

// Evaluation
pub mod context;
pub mod pipeline;

// Public API
pub use capture::{Captured, capture, capture_output, read_to_end};
pub use command::Command;
pub use config::ExecConfig;
pub use context::ExecContext;
pub use errors::{PipeError, Result};
pub use execution::{
    ExitCheck, ExitState, PipeSet, ProcessHandle, ProcessLauncher, StdSlot, Target,
    TerminatedProcess,
};
pub use jobs::Jobs;
pub use pending::PendingInvocation;
pub use pipeline::{Pipeline, Redirection};
