//! Argument lists for a single executable

use std::ffi::CString;
use std::fmt;
use std::os::fd::RawFd;

use crate::errors::{PipeError, Result};
use crate::execution::process::{ProcessHandle, ProcessLauncher, TerminatedProcess};
use crate::pending::PendingInvocation;

/// An ordered argument vector; the first element names the program.
///
/// A `Command` is a plain value. Nothing runs until it is staged into a
/// [`PendingInvocation`] and a terminal action is taken.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    argv: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
        }
    }

    /// Build a command from a complete argument vector
    pub fn from_argv<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() {
            return Err(PipeError::InvalidArgument(
                "command needs at least a program name".to_string(),
            ));
        }
        Ok(Self { argv })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments after the program name
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Append an argument, builder style
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Return a copy of this command with one more argument
    pub fn with_arg(&self, arg: impl Into<String>) -> Command {
        let mut extended = self.clone();
        extended.argv.push(arg.into());
        extended
    }

    /// Append an argument in place
    pub fn push_arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.argv.push(arg.into());
        self
    }

    /// Append several arguments in place
    pub fn append_args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Stage this command with the standard descriptors
    pub fn stage(&self) -> PendingInvocation {
        PendingInvocation::new(self.clone())
    }

    /// Stage and run to completion
    pub fn run(&self) -> Result<TerminatedProcess> {
        self.stage().run()
    }

    /// Run with explicit descriptors, e.g. `stderr = 1` to merge error output
    pub fn run_with(&self, stdin: RawFd, stdout: RawFd, stderr: RawFd) -> Result<TerminatedProcess> {
        ProcessLauncher::launch(self, stdin, stdout, stderr)?.wait()
    }

    /// Stage and launch without waiting
    pub fn detach(&self) -> Result<ProcessHandle> {
        self.stage().detach()
    }

    /// NUL-terminated copies of the arguments for `execvp`
    pub(crate) fn to_cstrings(&self) -> Result<Vec<CString>> {
        self.argv
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes()).map_err(|_| {
                    PipeError::InvalidArgument(format!("argument contains a NUL byte: {:?}", arg))
                })
            })
            .collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}
