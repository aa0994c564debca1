//! Pipeline AST and its evaluator
//!
//! A [`Pipeline`] is a tree of commands joined by sequence, pipe, and, or
//! and background nodes, with redirections attached to single commands.
//! Nothing is borrowed from Rust's operator precedence: the tree is exactly
//! what the builder calls produced.
//!
//! # Building
//!
//! Builder methods are left-associative and apply in call order:
//!
//! ```text
//! a.pipe(b).and(c).then(d)   ==   Sequence(And(Pipe(a, b), c), d)
//! ```
//!
//! Grouping is explicit: pass a built pipeline as the argument,
//! e.g. `a.and(Pipeline::from(b).or(c))`. Redirection methods attach to
//! the most recently added command, so `a.pipe(b).redirect_stdout("out")`
//! redirects `b`, as `a | b > out` would in a shell.
//!
//! Redirections of one command take effect in slot order (stdin, stdout,
//! then stderr) whatever order they were added in. A descriptor target such
//! as `redirect_stderr(1)` therefore sees stdout after its own redirection,
//! and `Display` prints redirections in that same order.
//!
//! # Evaluation
//!
//! [`Pipeline::run`] validates the whole tree first, then walks it left to
//! right:
//!
//! - command: open its redirections, launch, wait
//! - sequence: run left, discard its status, run right
//! - and / or: run left; run right only if left succeeded / failed
//! - pipe: the chain is flattened; every stage but the last is launched
//!   with stdout on a pipe feeding the next stage, the last stage is run
//!   and waited for. Upstream stages are left in the context's jobs.
//! - background: launch the left command or pipe chain without waiting
//!   (its handles go to the context's jobs), then run right
//!
//! The status of a node is the status of the last command it waited for.

use std::collections::HashSet;
use std::fmt;

use log::debug;

use crate::capture::{Captured, capture_output};
use crate::command::Command;
use crate::context::ExecContext;
use crate::errors::{PipeError, Result};
use crate::execution::fd::{OpenMode, Slot, StdSlot, Target};
use crate::execution::process::TerminatedProcess;
use crate::pending::PendingInvocation;

/// One redirection attached to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub slot: StdSlot,
    pub target: Target,
    pub mode: OpenMode,
}

impl Redirection {
    pub fn stdout(target: impl Into<Target>) -> Self {
        Self::new(StdSlot::Stdout, target, OpenMode::Truncate)
    }

    pub fn append_stdout(target: impl Into<Target>) -> Self {
        Self::new(StdSlot::Stdout, target, OpenMode::Append)
    }

    pub fn stderr(target: impl Into<Target>) -> Self {
        Self::new(StdSlot::Stderr, target, OpenMode::Truncate)
    }

    pub fn append_stderr(target: impl Into<Target>) -> Self {
        Self::new(StdSlot::Stderr, target, OpenMode::Append)
    }

    pub fn stdin(target: impl Into<Target>) -> Self {
        Self::new(StdSlot::Stdin, target, OpenMode::Read)
    }

    fn new(slot: StdSlot, target: impl Into<Target>, mode: OpenMode) -> Self {
        Self {
            slot,
            target: target.into(),
            mode,
        }
    }
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match (self.slot, self.mode) {
            (StdSlot::Stdin, _) => "<",
            (StdSlot::Stdout, OpenMode::Append) => ">>",
            (StdSlot::Stdout, _) => ">",
            (StdSlot::Stderr, OpenMode::Append) => "2>>",
            (StdSlot::Stderr, _) => "2>",
        };
        match &self.target {
            Target::Path(path) => write!(f, "{} {}", op, path.display()),
            Target::Fd(fd) => write!(f, "{}&{}", op, fd),
        }
    }
}

/// A tree of commands and the operators joining them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pipeline {
    Command(Command),
    Redirect(Box<Pipeline>, Redirection),
    Sequence(Box<Pipeline>, Box<Pipeline>),
    Pipe(Box<Pipeline>, Box<Pipeline>),
    And(Box<Pipeline>, Box<Pipeline>),
    Or(Box<Pipeline>, Box<Pipeline>),
    Background(Box<Pipeline>, Box<Pipeline>),
}

impl From<Command> for Pipeline {
    fn from(command: Command) -> Self {
        Pipeline::Command(command)
    }
}

impl From<&Command> for Pipeline {
    fn from(command: &Command) -> Self {
        Pipeline::Command(command.clone())
    }
}

impl Pipeline {
    pub fn command(command: Command) -> Self {
        Pipeline::Command(command)
    }

    /// `self ; next`
    pub fn then(self, next: impl Into<Pipeline>) -> Self {
        Pipeline::Sequence(Box::new(self), Box::new(next.into()))
    }

    /// `self | next`
    pub fn pipe(self, next: impl Into<Pipeline>) -> Self {
        Pipeline::Pipe(Box::new(self), Box::new(next.into()))
    }

    /// `self && next`
    pub fn and(self, next: impl Into<Pipeline>) -> Self {
        Pipeline::And(Box::new(self), Box::new(next.into()))
    }

    /// `self || next`
    pub fn or(self, next: impl Into<Pipeline>) -> Self {
        Pipeline::Or(Box::new(self), Box::new(next.into()))
    }

    /// `self & next`
    pub fn background(self, next: impl Into<Pipeline>) -> Self {
        Pipeline::Background(Box::new(self), Box::new(next.into()))
    }

    /// `> target` on the most recently added command
    pub fn redirect_stdout(self, target: impl Into<Target>) -> Self {
        self.with_redirection(Redirection::stdout(target))
    }

    /// `>> target` on the most recently added command
    pub fn append_stdout(self, target: impl Into<Target>) -> Self {
        self.with_redirection(Redirection::append_stdout(target))
    }

    /// `2> target` on the most recently added command
    pub fn redirect_stderr(self, target: impl Into<Target>) -> Self {
        self.with_redirection(Redirection::stderr(target))
    }

    /// `2>> target` on the most recently added command
    pub fn append_stderr(self, target: impl Into<Target>) -> Self {
        self.with_redirection(Redirection::append_stderr(target))
    }

    /// `< target` on the most recently added command
    pub fn redirect_stdin(self, target: impl Into<Target>) -> Self {
        self.with_redirection(Redirection::stdin(target))
    }

    /// Attach `redirection` to the rightmost command of the tree
    pub fn with_redirection(self, redirection: Redirection) -> Self {
        match self {
            leaf @ (Pipeline::Command(_) | Pipeline::Redirect(..)) => {
                Pipeline::Redirect(Box::new(leaf), redirection)
            }
            Pipeline::Sequence(left, right) => {
                Pipeline::Sequence(left, Box::new(right.with_redirection(redirection)))
            }
            Pipeline::Pipe(left, right) => {
                Pipeline::Pipe(left, Box::new(right.with_redirection(redirection)))
            }
            Pipeline::And(left, right) => {
                Pipeline::And(left, Box::new(right.with_redirection(redirection)))
            }
            Pipeline::Or(left, right) => {
                Pipeline::Or(left, Box::new(right.with_redirection(redirection)))
            }
            Pipeline::Background(left, right) => {
                Pipeline::Background(left, Box::new(right.with_redirection(redirection)))
            }
        }
    }

    /// Check the tree without launching anything
    pub fn validate(&self) -> Result<()> {
        match self {
            Pipeline::Command(_) => Ok(()),
            Pipeline::Redirect(..) => self.leaf().map(|_| ()),
            Pipeline::Pipe(..) => {
                let stages = self.pipe_stages()?;
                let last = stages.len() - 1;
                for (i, stage) in stages.iter().enumerate() {
                    let leaf = stage.leaf()?;
                    if i < last && leaf.redirects(StdSlot::Stdout) {
                        return Err(PipeError::AlreadyRedirected(StdSlot::Stdout));
                    }
                    if i > 0 && leaf.redirects(StdSlot::Stdin) {
                        return Err(PipeError::AlreadyRedirected(StdSlot::Stdin));
                    }
                }
                Ok(())
            }
            Pipeline::Background(left, right) => {
                left.pipe_stages()?;
                left.validate()?;
                right.validate()
            }
            Pipeline::Sequence(left, right)
            | Pipeline::And(left, right)
            | Pipeline::Or(left, right) => {
                left.validate()?;
                right.validate()
            }
        }
    }

    /// Validate, then evaluate to completion
    pub fn run(&self, ctx: &mut ExecContext) -> Result<TerminatedProcess> {
        self.validate()?;
        debug!("running `{}`", self);
        self.eval(ctx)
    }

    /// Capture the output of a command or pipe chain, trimmed per the config
    pub fn capture(&self, ctx: &mut ExecContext) -> Result<String> {
        self.capture_output(ctx).map(|captured| captured.text)
    }

    /// Like [`capture`](Self::capture), also returning the final status
    pub fn capture_output(&self, ctx: &mut ExecContext) -> Result<Captured> {
        self.validate()?;
        let stages = self.pipe_stages().map_err(|_| {
            PipeError::InvalidPipeline("only a command or a pipe chain can be captured".to_string())
        })?;
        let (last, upstream) = split_chain(&stages)?;

        debug!("capturing `{}`", self);
        let stdin = launch_upstream(upstream, ctx)?;
        let invocation = last.leaf()?.stage(ctx, stdin)?;
        capture_output(invocation)
    }

    fn eval(&self, ctx: &mut ExecContext) -> Result<TerminatedProcess> {
        match self {
            Pipeline::Command(_) | Pipeline::Redirect(..) => {
                self.leaf()?.stage(ctx, Slot::Inherit)?.run()
            }
            Pipeline::Sequence(left, right) => {
                left.eval(ctx)?;
                right.eval(ctx)
            }
            Pipeline::And(left, right) => {
                let status = left.eval(ctx)?;
                if status.success() {
                    right.eval(ctx)
                } else {
                    Ok(status)
                }
            }
            Pipeline::Or(left, right) => {
                let status = left.eval(ctx)?;
                if status.success() {
                    Ok(status)
                } else {
                    right.eval(ctx)
                }
            }
            Pipeline::Pipe(..) => {
                let stages = self.pipe_stages()?;
                let (last, upstream) = split_chain(&stages)?;
                let stdin = launch_upstream(upstream, ctx)?;
                last.leaf()?.stage(ctx, stdin)?.run()
            }
            Pipeline::Background(left, right) => {
                let stages = left.pipe_stages()?;
                let (last, upstream) = split_chain(&stages)?;
                let stdin = launch_upstream(upstream, ctx)?;
                let handle = last.leaf()?.stage(ctx, stdin)?.detach()?;
                ctx.jobs_mut().push(handle);
                right.eval(ctx)
            }
        }
    }

    /// The command and its redirections, if this node is a single command
    fn leaf(&self) -> Result<Leaf<'_>> {
        match self {
            Pipeline::Command(command) => Ok(Leaf {
                command,
                redirections: Vec::new(),
            }),
            Pipeline::Redirect(inner, redirection) => {
                if !matches!(**inner, Pipeline::Command(_) | Pipeline::Redirect(..)) {
                    return Err(PipeError::InvalidPipeline(format!(
                        "`{}` applies to a single command, not `{}`",
                        redirection, inner
                    )));
                }
                let mut leaf = inner.leaf()?;
                if leaf.redirects(redirection.slot) {
                    return Err(PipeError::AlreadyRedirected(redirection.slot));
                }
                leaf.redirections.push(redirection);
                Ok(leaf)
            }
            other => Err(PipeError::InvalidPipeline(format!(
                "`{}` is not a single command",
                other
            ))),
        }
    }

    /// Flatten a pipe chain into its stages; a single command is a chain of one
    fn pipe_stages(&self) -> Result<Vec<&Pipeline>> {
        match self {
            Pipeline::Pipe(left, right) => {
                let mut stages = left.pipe_stages()?;
                stages.extend(right.pipe_stages()?);
                Ok(stages)
            }
            leaf @ (Pipeline::Command(_) | Pipeline::Redirect(..)) => {
                leaf.leaf()?;
                Ok(vec![leaf])
            }
            other => Err(PipeError::InvalidPipeline(format!(
                "pipe and background operands must be commands, got `{}`",
                other
            ))),
        }
    }
}

fn split_chain<'a>(stages: &'a [&'a Pipeline]) -> Result<(&'a Pipeline, &'a [&'a Pipeline])> {
    stages
        .split_last()
        .map(|(last, upstream)| (*last, upstream))
        .ok_or_else(|| PipeError::InvalidPipeline("empty pipe chain".to_string()))
}

/// Launch every upstream stage with stdout piped into the next one.
///
/// Returns the slot the final stage should read from.
fn launch_upstream(upstream: &[&Pipeline], ctx: &mut ExecContext) -> Result<Slot> {
    let mut stdin = Slot::Inherit;
    for stage in upstream {
        let mut handle = stage.leaf()?.stage(ctx, stdin)?.detach_capturing()?;
        let read = handle
            .take_output()
            .ok_or_else(|| PipeError::Syscall("capture pipe missing".to_string()))?;
        ctx.jobs_mut().push(handle);
        stdin = Slot::Owned(read);
    }
    Ok(stdin)
}

struct Leaf<'a> {
    command: &'a Command,
    redirections: Vec<&'a Redirection>,
}

impl Leaf<'_> {
    fn redirects(&self, slot: StdSlot) -> bool {
        self.redirections.iter().any(|r| r.slot == slot)
    }

    /// Stage the command and open its redirections, in order
    fn stage(&self, ctx: &ExecContext, stdin: Slot) -> Result<PendingInvocation> {
        let mut seen = HashSet::new();
        let mut invocation = PendingInvocation::with_stdin(self.command.clone(), ctx.config(), stdin);
        for redirection in &self.redirections {
            if !seen.insert(redirection.slot) {
                invocation.cancel();
                return Err(PipeError::AlreadyRedirected(redirection.slot));
            }
            invocation =
                invocation.redirect(redirection.slot, redirection.target.clone(), redirection.mode)?;
        }
        Ok(invocation)
    }
}

impl Pipeline {
    // The child installs descriptors in slot order, so a `2>&1` added before
    // `> file` still follows stdout into the file. Printing in slot order
    // keeps the notation true to what runs.
    fn fmt_redirected(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut node = self;
        let mut redirections = Vec::new();
        while let Pipeline::Redirect(inner, redirection) = node {
            redirections.push(redirection);
            node = inner;
        }
        redirections.reverse();
        redirections.sort_by_key(|r| r.slot.fd());

        write!(f, "{}", node)?;
        for redirection in redirections {
            write!(f, " {}", redirection)?;
        }
        Ok(())
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (left, op, right) = match self {
            Pipeline::Command(command) => return write!(f, "{}", command),
            Pipeline::Redirect(..) => return self.fmt_redirected(f),
            Pipeline::Sequence(left, right) => (left, ";", right),
            Pipeline::Pipe(left, right) => (left, "|", right),
            Pipeline::And(left, right) => (left, "&&", right),
            Pipeline::Or(left, right) => (left, "||", right),
            Pipeline::Background(left, right) => (left, "&", right),
        };

        write!(f, "{} {} ", left, op)?;
        match right.as_ref() {
            Pipeline::Command(_) | Pipeline::Redirect(..) => write!(f, "{}", right),
            compound => write!(f, "({})", compound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fork_guard;

    fn cmd(program: &str) -> Command {
        Command::new(program)
    }

    #[test]
    fn builder_is_left_associative() {
        let pipeline = Pipeline::from(cmd("a"))
            .pipe(cmd("b"))
            .and(cmd("c"))
            .then(cmd("d"));

        let expected = Pipeline::Sequence(
            Box::new(Pipeline::And(
                Box::new(Pipeline::Pipe(
                    Box::new(Pipeline::Command(cmd("a"))),
                    Box::new(Pipeline::Command(cmd("b"))),
                )),
                Box::new(Pipeline::Command(cmd("c"))),
            )),
            Box::new(Pipeline::Command(cmd("d"))),
        );
        assert_eq!(pipeline, expected);
        assert_eq!(pipeline.to_string(), "a | b && c ; d");
    }

    #[test]
    fn explicit_grouping_displays_parentheses() {
        let pipeline = Pipeline::from(cmd("a")).and(Pipeline::from(cmd("b")).or(cmd("c")));
        assert_eq!(pipeline.to_string(), "a && (b || c)");
    }

    #[test]
    fn redirection_attaches_to_last_command() {
        let pipeline = Pipeline::from(cmd("a")).pipe(cmd("b")).redirect_stdout("out.txt");

        match &pipeline {
            Pipeline::Pipe(left, right) => {
                assert_eq!(**left, Pipeline::Command(cmd("a")));
                assert_eq!(
                    **right,
                    Pipeline::Redirect(
                        Box::new(Pipeline::Command(cmd("b"))),
                        Redirection::stdout("out.txt")
                    )
                );
            }
            other => panic!("unexpected tree: {:?}", other),
        }
        assert_eq!(pipeline.to_string(), "a | b > out.txt");
    }

    #[test]
    fn display_fd_redirection() {
        let pipeline = Pipeline::from(cmd("make"))
            .redirect_stdout("build.log")
            .redirect_stderr(1);
        assert_eq!(pipeline.to_string(), "make > build.log 2>&1");
    }

    #[test]
    fn display_lists_redirections_in_slot_order() {
        let pipeline = Pipeline::from(cmd("make"))
            .redirect_stderr(1)
            .redirect_stdout("build.log")
            .redirect_stdin("Makefile");
        assert_eq!(pipeline.to_string(), "make < Makefile > build.log 2>&1");

        let pipeline = Pipeline::from(cmd("a"))
            .redirect_stdout(2)
            .redirect_stderr("err.log")
            .and(cmd("b"));
        assert_eq!(pipeline.to_string(), "a >&2 2> err.log && b");
    }

    #[test]
    fn stderr_fd_follows_later_stdout_redirect() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("both.log");
        let mut ctx = ExecContext::default();

        let pipeline = Pipeline::from(
            Command::new("sh").arg("-c").arg("echo out; echo err >&2"),
        )
        .redirect_stderr(1)
        .redirect_stdout(log.as_path());
        assert!(ctx.run(&pipeline).unwrap().success());

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "out\nerr\n");
        assert!(pipeline.to_string().ends_with("2>&1"));
    }

    #[test]
    fn duplicate_redirect_fails_validation() {
        let pipeline = Pipeline::from(cmd("echo"))
            .redirect_stdout("a.txt")
            .redirect_stdout("b.txt");
        assert!(matches!(
            pipeline.validate(),
            Err(PipeError::AlreadyRedirected(StdSlot::Stdout))
        ));
    }

    #[test]
    fn redirect_on_compound_node_is_invalid() {
        let pipeline = Pipeline::Redirect(
            Box::new(Pipeline::from(cmd("a")).and(cmd("b"))),
            Redirection::stdout("x"),
        );
        assert!(matches!(
            pipeline.validate(),
            Err(PipeError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn compound_pipe_operand_is_invalid() {
        let pipeline = Pipeline::from(cmd("a"))
            .and(cmd("b"))
            .pipe(cmd("c"));
        assert!(matches!(
            pipeline.validate(),
            Err(PipeError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn upstream_stdout_redirect_is_rejected() {
        let pipeline = Pipeline::from(cmd("a"))
            .redirect_stdout("x")
            .pipe(cmd("b"));
        assert!(matches!(
            pipeline.validate(),
            Err(PipeError::AlreadyRedirected(StdSlot::Stdout))
        ));
    }

    #[test]
    fn downstream_stdin_redirect_is_rejected() {
        let pipeline = Pipeline::from(cmd("a"))
            .pipe(cmd("b"))
            .redirect_stdin("x");
        assert!(matches!(
            pipeline.validate(),
            Err(PipeError::AlreadyRedirected(StdSlot::Stdin))
        ));
    }

    #[test]
    fn invalid_pipeline_launches_nothing() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let mut ctx = ExecContext::default();

        let pipeline = Pipeline::from(Command::new("touch").arg(marker.to_str().unwrap()))
            .then(cmd("echo"))
            .redirect_stderr(1)
            .redirect_stderr(1);

        assert!(matches!(
            ctx.run(&pipeline),
            Err(PipeError::AlreadyRedirected(StdSlot::Stderr))
        ));
        assert!(!marker.exists());
        assert!(ctx.jobs().is_empty());
    }

    #[test]
    fn capture_pipe_chain() {
        let _guard = fork_guard();
        let mut ctx = ExecContext::default();
        let pipeline = Pipeline::from(Command::new("printf").arg("b\\na\\n")).pipe(cmd("sort"));

        assert_eq!(ctx.capture(&pipeline).unwrap(), "a\nb");
        assert_eq!(ctx.reap_all().unwrap().len(), 1);
    }

    #[test]
    fn capture_rejects_compound_root() {
        let mut ctx = ExecContext::default();
        let pipeline = Pipeline::from(cmd("true")).and(cmd("true"));
        assert!(matches!(
            ctx.capture(&pipeline),
            Err(PipeError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn and_or_short_circuit() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let touch = Command::new("touch").arg(marker.to_str().unwrap());
        let mut ctx = ExecContext::default();

        let status = ctx
            .run(&Pipeline::from(cmd("false")).and(touch.clone()))
            .unwrap();
        assert!(!status.success());
        assert!(!marker.exists());

        let status = ctx.run(&Pipeline::from(cmd("true")).or(touch.clone())).unwrap();
        assert!(status.success());
        assert!(!marker.exists());

        let status = ctx.run(&Pipeline::from(cmd("false")).or(touch)).unwrap();
        assert!(status.success());
        assert!(marker.exists());
    }

    #[test]
    fn pipe_into_file() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sorted.txt");
        let mut ctx = ExecContext::default();

        let pipeline = Pipeline::from(Command::new("printf").arg("b\\na\\n"))
            .pipe(cmd("sort"))
            .redirect_stdout(out.as_path());
        assert!(ctx.run(&pipeline).unwrap().success());
        ctx.reap_all().unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "a\nb\n");
    }

    #[test]
    fn background_pipe_chain() {
        let _guard = fork_guard();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("bg.txt");
        let mut ctx = ExecContext::default();

        let pipeline = Pipeline::from(Command::new("echo").arg("bg"))
            .pipe(Pipeline::from(cmd("cat")).redirect_stdout(out.as_path()))
            .background(cmd("true"));
        assert!(ctx.run(&pipeline).unwrap().success());
        assert_eq!(ctx.jobs().len(), 2);

        let reaped = ctx.reap_all().unwrap();
        assert!(reaped.iter().all(TerminatedProcess::success));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "bg\n");
    }
}
