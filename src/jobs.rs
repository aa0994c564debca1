//! Outstanding children left running by pipes and background launches
//!
//! Reaping is never automatic. Whoever pipes or backgrounds a process owns
//! its handle through a [`Jobs`] table and must sweep it, typically with
//! [`Jobs::reap_all`] before exiting.

use std::mem;

use log::{debug, warn};
use nix::unistd::Pid;

use crate::errors::Result;
use crate::execution::process::{ExitCheck, ProcessHandle, TerminatedProcess};

/// Handles of launched, not yet reaped children in launch order
#[derive(Debug, Default)]
pub struct Jobs {
    handles: Vec<ProcessHandle>,
}

impl Jobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: ProcessHandle) {
        debug!("tracking pid {}", handle.pid());
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.handles.iter().map(ProcessHandle::pid).collect()
    }

    /// Reap every child that already exited; never blocks
    pub fn reap_finished(&mut self) -> Result<Vec<TerminatedProcess>> {
        let mut finished = Vec::new();
        let mut running = Vec::with_capacity(self.handles.len());
        let mut pending = mem::take(&mut self.handles).into_iter();

        while let Some(handle) = pending.next() {
            match handle.check_exited() {
                Ok(ExitCheck::Running(handle)) => running.push(handle),
                Ok(ExitCheck::Exited(done)) => finished.push(done),
                Err(e) => {
                    running.extend(pending);
                    self.handles = running;
                    return Err(e);
                }
            }
        }

        self.handles = running;
        Ok(finished)
    }

    /// Wait for every tracked child, in launch order
    pub fn reap_all(&mut self) -> Result<Vec<TerminatedProcess>> {
        let mut finished = Vec::with_capacity(self.handles.len());
        let mut pending = mem::take(&mut self.handles).into_iter();

        while let Some(handle) = pending.next() {
            match handle.wait() {
                Ok(done) => finished.push(done),
                Err(e) => {
                    self.handles = pending.collect();
                    return Err(e);
                }
            }
        }

        Ok(finished)
    }
}

impl Drop for Jobs {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            warn!("{} job(s) dropped without being reaped", self.handles.len());
        }
    }
}
