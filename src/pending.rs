//! Staged invocations with exactly-once execution
//!
//! A [`PendingInvocation`] binds a [`Command`] to concrete descriptors. It is
//! consumed by exactly one terminal action: [`run`](PendingInvocation::run),
//! [`detach`](PendingInvocation::detach),
//! [`detach_capturing`](PendingInvocation::detach_capturing) or
//! [`cancel`](PendingInvocation::cancel). Each takes `self`, so a second
//! action does not compile. An invocation dropped without any action runs
//! as if `run` had been called, on every exit path.

use std::os::fd::RawFd;

use log::{debug, error};

use crate::command::Command;
use crate::config::ExecConfig;
use crate::errors::{PipeError, Result};
use crate::execution::fd::{OpenMode, Slot, StdSlot, Target};
use crate::execution::process::{ProcessHandle, ProcessLauncher, TerminatedProcess};

#[derive(Debug)]
struct Staged {
    command: Command,
    stdin: Slot,
    stdout: Slot,
    stderr: Slot,
}

impl Staged {
    fn slot(&self, slot: StdSlot) -> &Slot {
        match slot {
            StdSlot::Stdin => &self.stdin,
            StdSlot::Stdout => &self.stdout,
            StdSlot::Stderr => &self.stderr,
        }
    }

    fn slot_mut(&mut self, slot: StdSlot) -> &mut Slot {
        match slot {
            StdSlot::Stdin => &mut self.stdin,
            StdSlot::Stdout => &mut self.stdout,
            StdSlot::Stderr => &mut self.stderr,
        }
    }

    // Owned descriptors are dropped when `self` goes out of scope, which is
    // right after the fork: the child has its own copies by then.
    fn launch(self) -> Result<ProcessHandle> {
        ProcessLauncher::launch(
            &self.command,
            self.stdin.raw(StdSlot::Stdin),
            self.stdout.raw(StdSlot::Stdout),
            self.stderr.raw(StdSlot::Stderr),
        )
    }

    fn launch_capturing(self) -> Result<ProcessHandle> {
        ProcessLauncher::launch_capturing(
            &self.command,
            self.stdin.raw(StdSlot::Stdin),
            self.stderr.raw(StdSlot::Stderr),
        )
    }

    fn run(self) -> Result<TerminatedProcess> {
        self.launch()?.wait()
    }
}

/// A command bound to descriptors, waiting for its terminal action
#[derive(Debug)]
pub struct PendingInvocation {
    stage: Option<Staged>,
    config: ExecConfig,
}

impl PendingInvocation {
    /// Stage `command` on the standard descriptors with the default config
    pub fn new(command: Command) -> Self {
        Self::with_config(command, ExecConfig::default())
    }

    /// Stage `command` on the standard descriptors
    pub fn with_config(command: Command, config: ExecConfig) -> Self {
        Self::with_stdin(command, config, Slot::Inherit)
    }

    pub(crate) fn with_stdin(command: Command, config: ExecConfig, stdin: Slot) -> Self {
        Self {
            stage: Some(Staged {
                command,
                stdin,
                stdout: Slot::Inherit,
                stderr: Slot::Inherit,
            }),
            config,
        }
    }

    fn staged(&self) -> &Staged {
        self.stage
            .as_ref()
            .expect("pending invocation used after its terminal action")
    }

    fn staged_mut(&mut self) -> &mut Staged {
        self.stage
            .as_mut()
            .expect("pending invocation used after its terminal action")
    }

    fn take(&mut self) -> Staged {
        self.stage
            .take()
            .expect("pending invocation consumed twice")
    }

    pub fn command(&self) -> &Command {
        &self.staged().command
    }

    pub fn config(&self) -> ExecConfig {
        self.config
    }

    /// Descriptor currently bound to `slot`
    pub fn fd(&self, slot: StdSlot) -> RawFd {
        self.staged().slot(slot).raw(slot)
    }

    /// `true` while `slot` has not been redirected
    pub fn is_default(&self, slot: StdSlot) -> bool {
        self.staged().slot(slot).is_default(slot)
    }

    /// `> target`: write stdout, creating and truncating a file target
    pub fn redirect_stdout(self, target: impl Into<Target>) -> Result<Self> {
        self.redirect(StdSlot::Stdout, target.into(), OpenMode::Truncate)
    }

    /// `>> target`: append stdout
    pub fn append_stdout(self, target: impl Into<Target>) -> Result<Self> {
        self.redirect(StdSlot::Stdout, target.into(), OpenMode::Append)
    }

    /// `2> target`: write stderr, creating and truncating a file target
    pub fn redirect_stderr(self, target: impl Into<Target>) -> Result<Self> {
        self.redirect(StdSlot::Stderr, target.into(), OpenMode::Truncate)
    }

    /// `2>> target`: append stderr
    pub fn append_stderr(self, target: impl Into<Target>) -> Result<Self> {
        self.redirect(StdSlot::Stderr, target.into(), OpenMode::Append)
    }

    /// `< target`: read stdin
    pub fn redirect_stdin(self, target: impl Into<Target>) -> Result<Self> {
        self.redirect(StdSlot::Stdin, target.into(), OpenMode::Read)
    }

    /// Rebind one slot. A slot can be redirected once; the slot is checked
    /// before any file is opened. On error the invocation is cancelled so
    /// nothing launches with half-applied redirections.
    pub fn redirect(mut self, slot: StdSlot, target: Target, mode: OpenMode) -> Result<Self> {
        if !self.is_default(slot) {
            self.cancel();
            return Err(PipeError::AlreadyRedirected(slot));
        }

        match Slot::open(target, mode, self.config.file_mode) {
            Ok(opened) => {
                *self.staged_mut().slot_mut(slot) = opened;
                Ok(self)
            }
            Err(e) => {
                self.cancel();
                Err(e)
            }
        }
    }

    /// Launch and wait for completion
    pub fn run(mut self) -> Result<TerminatedProcess> {
        self.take().run()
    }

    /// Launch without waiting; the caller must reap the returned handle
    pub fn detach(mut self) -> Result<ProcessHandle> {
        self.take().launch()
    }

    /// Launch with stdout on a fresh pipe; stdout must not be redirected
    pub fn detach_capturing(mut self) -> Result<ProcessHandle> {
        if !self.is_default(StdSlot::Stdout) {
            self.cancel();
            return Err(PipeError::AlreadyRedirected(StdSlot::Stdout));
        }
        self.take().launch_capturing()
    }

    /// Consume without launching anything
    pub fn cancel(mut self) {
        let staged = self.take();
        debug!("cancelled `{}`", staged.command);
    }
}

impl Drop for PendingInvocation {
    fn drop(&mut self) {
        if let Some(staged) = self.stage.take() {
            let command = staged.command.clone();
            debug!("running `{}` on drop", command);
            if let Err(e) = staged.run() {
                error!("deferred run of `{}` failed: {}", command, e);
            }
        }
    }
}
