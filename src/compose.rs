//! Composition operators on staged invocations
//!
//! | shell    | method                                   | blocks on left |
//! |----------|------------------------------------------|----------------|
//! | `a ; b`  | [`PendingInvocation::then`]              | yes            |
//! | `a \| b` | [`PendingInvocation::pipe_into`]         | no             |
//! | `a && b` | [`PendingInvocation::and`]               | yes            |
//! | `a \|\| b` | [`PendingInvocation::or`]              | yes            |
//! | `a & b`  | [`PendingInvocation::background`]        | no             |
//!
//! Every operator consumes the left invocation. The right operand is staged
//! with the left one's [`ExecConfig`](crate::ExecConfig) and, for pipes, with
//! the pipe's read end as stdin. Handles left running by `pipe_into` and
//! `background` are pushed onto a [`Jobs`] table the caller must reap.

use log::debug;

use crate::command::Command;
use crate::config::ExecConfig;
use crate::errors::{PipeError, Result};
use crate::execution::fd::Slot;
use crate::execution::process::TerminatedProcess;
use crate::jobs::Jobs;
use crate::pending::PendingInvocation;

impl PendingInvocation {
    /// Run to completion, discard the result, stage `next`
    pub fn then(self, next: &Command) -> Result<PendingInvocation> {
        let config = self.config();
        self.run()?;
        Ok(PendingInvocation::with_config(next.clone(), config))
    }

    /// Launch with stdout piped into the returned invocation of `next`.
    ///
    /// The left process is not waited on; its handle goes to `jobs`.
    pub fn pipe_into(self, next: &Command, jobs: &mut Jobs) -> Result<PendingInvocation> {
        let config = self.config();
        let mut handle = self.detach_capturing()?;
        let read = handle
            .take_output()
            .ok_or_else(|| PipeError::Syscall("capture pipe missing".to_string()))?;
        debug!("piping pid {} into `{}`", handle.pid(), next);
        jobs.push(handle);

        Ok(PendingInvocation::with_stdin(
            next.clone(),
            config,
            Slot::Owned(read),
        ))
    }

    /// Run; run `next` only if this one succeeded
    pub fn and(self, next: &Command) -> Result<TerminatedProcess> {
        let config = self.config();
        self.run()?.and_then_stage(next, config)
    }

    /// Run; run `next` only if this one failed
    pub fn or(self, next: &Command) -> Result<TerminatedProcess> {
        let config = self.config();
        self.run()?.or_else_stage(next, config)
    }

    /// Launch without waiting (handle goes to `jobs`) and stage `next`
    pub fn background(self, next: &Command, jobs: &mut Jobs) -> Result<PendingInvocation> {
        let config = self.config();
        jobs.push(self.detach()?);
        Ok(PendingInvocation::with_config(next.clone(), config))
    }
}

impl TerminatedProcess {
    /// `result && next`
    pub fn and_then_run(self, next: &Command) -> Result<TerminatedProcess> {
        if self.success() {
            next.run()
        } else {
            Ok(self)
        }
    }

    /// `result || next`
    pub fn or_else_run(self, next: &Command) -> Result<TerminatedProcess> {
        if self.success() {
            Ok(self)
        } else {
            next.run()
        }
    }

    /// `result, next`: ignore the result and stage `next`
    pub fn then_stage(self, next: &Command) -> PendingInvocation {
        next.stage()
    }

    fn and_then_stage(self, next: &Command, config: ExecConfig) -> Result<TerminatedProcess> {
        if self.success() {
            PendingInvocation::with_config(next.clone(), config).run()
        } else {
            Ok(self)
        }
    }

    fn or_else_stage(self, next: &Command, config: ExecConfig) -> Result<TerminatedProcess> {
        if self.success() {
            Ok(self)
        } else {
            PendingInvocation::with_config(next.clone(), config).run()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture;
    use crate::test_support::fork_guard;
    use std::path::Path;

    fn touch(path: &Path) -> Command {
        Command::new("touch").arg(path.to_str().unwrap())
    }

    fn append_line(log: &Path, line: &str, delay: &str) -> Command {
        Command::new("sh")
            .arg("-c")
            .arg(format!("sleep {}; echo {} >> {}", delay, line, log.display()))
    }

    #[test]
    fn sequence_preserves_program_order() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.txt");

        let slow = append_line(&log, "A", "0.2");
        let fast = append_line(&log, "B", "0");
        slow.stage().then(&fast).unwrap().run().unwrap();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "A\nB\n");
    }

    #[test]
    fn false_and_never_launches_right() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");

        let result = Command::new("false").stage().and(&touch(&marker)).unwrap();

        assert!(!result.success());
        assert!(!marker.exists());
    }

    #[test]
    fn true_and_runs_right() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");

        let result = Command::new("true").stage().and(&touch(&marker)).unwrap();

        assert!(result.success());
        assert!(marker.exists());
    }

    #[test]
    fn true_or_never_launches_right() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");

        let result = Command::new("true").stage().or(&touch(&marker)).unwrap();

        assert!(result.success());
        assert!(!marker.exists());
    }

    #[test]
    fn false_or_runs_right() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");

        let result = Command::new("false").stage().or(&touch(&marker)).unwrap();

        assert!(result.success());
        assert!(marker.exists());
    }

    #[test]
    fn and_returns_left_exit_code_on_short_circuit() {
        let _guard = fork_guard();
        let result = Command::new("sh")
            .arg("-c")
            .arg("exit 6")
            .stage()
            .and(&Command::new("true"))
            .unwrap();
        assert_eq!(result.exit_code(), Some(6));
    }

    #[test]
    fn chained_results() {
        let _guard = fork_guard();
        let result = Command::new("true")
            .run()
            .unwrap()
            .and_then_run(&Command::new("false"))
            .unwrap()
            .or_else_run(&Command::new("true"))
            .unwrap();
        assert!(result.success());

        Command::new("false").run().unwrap().then_stage(&Command::new("true")).cancel();
    }

    #[test]
    fn pipe_sorts_output() {
        let _guard = fork_guard();
        let mut jobs = Jobs::new();

        let sorted = Command::new("printf")
            .arg("b\\na\\n")
            .stage()
            .pipe_into(&Command::new("sort"), &mut jobs)
            .unwrap();
        let text = capture(sorted).unwrap();

        assert_eq!(text, "a\nb");
        assert_eq!(jobs.len(), 1);
        assert!(jobs.reap_all().unwrap()[0].success());
    }

    #[test]
    fn three_stage_pipe() {
        let _guard = fork_guard();
        let mut jobs = Jobs::new();

        let tail = Command::new("printf")
            .arg("x\\ny\\nx\\n")
            .stage()
            .pipe_into(&Command::new("sort"), &mut jobs)
            .unwrap()
            .pipe_into(&Command::new("uniq"), &mut jobs)
            .unwrap();
        let text = capture(tail).unwrap();

        assert_eq!(text, "x\ny");
        assert_eq!(jobs.reap_all().unwrap().len(), 2);
    }

    #[test]
    fn pipe_does_not_deadlock_on_large_output() {
        let _guard = fork_guard();
        let mut jobs = Jobs::new();

        // Far more than a pipe buffer holds
        let counted = Command::new("sh")
            .arg("-c")
            .arg("i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done")
            .stage()
            .pipe_into(&Command::new("wc").arg("-l"), &mut jobs)
            .unwrap();

        assert_eq!(capture(counted).unwrap().trim(), "20000");
        jobs.reap_all().unwrap();
    }

    #[test]
    fn background_does_not_block() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let mut jobs = Jobs::new();
        let started = std::time::Instant::now();

        let next = Command::new("sleep")
            .arg("1")
            .stage()
            .background(&touch(&marker), &mut jobs)
            .unwrap();
        let done = next.run().unwrap();

        assert!(done.success());
        assert!(marker.exists());
        assert!(started.elapsed() < std::time::Duration::from_millis(900));
        let reaped = jobs.reap_all().unwrap();
        assert_eq!(reaped.len(), 1);
        assert!(reaped[0].success());
    }
}
