//! Explicit execution context

use crate::capture::Captured;
use crate::command::Command;
use crate::config::ExecConfig;
use crate::errors::Result;
use crate::execution::process::TerminatedProcess;
use crate::jobs::Jobs;
use crate::pending::PendingInvocation;
use crate::pipeline::Pipeline;

/// Configuration plus the table of children still to be reaped.
///
/// Passed by reference wherever pipelines are evaluated, in place of any
/// process-wide state.
#[derive(Debug, Default)]
pub struct ExecContext {
    config: ExecConfig,
    jobs: Jobs,
}

impl ExecContext {
    /// Create a context with a validated configuration
    pub fn new(config: ExecConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            jobs: Jobs::new(),
        })
    }

    pub fn config(&self) -> ExecConfig {
        self.config
    }

    pub fn jobs(&self) -> &Jobs {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut Jobs {
        &mut self.jobs
    }

    /// Stage `command` with this context's configuration
    pub fn stage(&self, command: &Command) -> PendingInvocation {
        PendingInvocation::with_config(command.clone(), self.config)
    }

    /// Evaluate `pipeline` to completion
    pub fn run(&mut self, pipeline: &Pipeline) -> Result<TerminatedProcess> {
        pipeline.run(self)
    }

    /// Capture the output of a command or pipe chain
    pub fn capture(&mut self, pipeline: &Pipeline) -> Result<String> {
        pipeline.capture(self)
    }

    pub fn capture_output(&mut self, pipeline: &Pipeline) -> Result<Captured> {
        pipeline.capture_output(self)
    }

    /// Reap background and upstream pipe children that already exited
    pub fn reap_finished(&mut self) -> Result<Vec<TerminatedProcess>> {
        self.jobs.reap_finished()
    }

    /// Wait for every outstanding child
    pub fn reap_all(&mut self) -> Result<Vec<TerminatedProcess>> {
        self.jobs.reap_all()
    }
}
