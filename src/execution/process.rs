//! Launching children with wired descriptors, and reaping them
//!
//! Everything the child needs (argument array, diagnostic prefix) is
//! prepared before `fork`, so the child only makes async-signal-safe calls
//! (`dup2`, `fcntl`, `execvp`, `write`, `_exit`) until its image is replaced.

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};

use crate::command::Command;
use crate::errors::{PipeError, Result};
use crate::execution::fd::{STDERR_FD, STDIN_FD, STDOUT_FD, pipe_cloexec};

/// Exit status a child reports when its image cannot be replaced
pub const EXEC_FAILURE_STATUS: i32 = 1;

/// A launched child that has not been reaped yet
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    stdin: RawFd,
    stdout: RawFd,
    stderr: RawFd,
    /// Parent's write end of a stdin pipe
    input: Option<File>,
    /// Parent's read end of a stdout pipe
    output: Option<File>,
    reaped: bool,
}

impl ProcessHandle {
    fn new(pid: Pid, stdin: RawFd, stdout: RawFd, stderr: RawFd) -> Self {
        Self {
            pid,
            stdin,
            stdout,
            stderr,
            input: None,
            output: None,
            reaped: false,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Descriptor the child reads as stdin (parent's pipe end if piped)
    pub fn stdin_fd(&self) -> RawFd {
        self.stdin
    }

    /// Descriptor the child writes as stdout (parent's read end if captured)
    pub fn stdout_fd(&self) -> RawFd {
        self.stdout
    }

    pub fn stderr_fd(&self) -> RawFd {
        self.stderr
    }

    /// Writable end of the child's stdin pipe, if one was created
    pub fn input(&mut self) -> Option<&mut File> {
        self.input.as_mut()
    }

    /// Take the stdin pipe; dropping it signals EOF to the child
    pub fn take_input(&mut self) -> Option<File> {
        self.input.take()
    }

    /// Readable end of the child's stdout pipe, if one was created
    pub fn output(&mut self) -> Option<&mut File> {
        self.output.as_mut()
    }

    /// Hand the stdout pipe to a new owner, e.g. the next pipeline stage
    pub fn take_output(&mut self) -> Option<OwnedFd> {
        self.output.take().map(OwnedFd::from)
    }

    /// Block until this child exits and reap it
    pub fn wait(mut self) -> Result<TerminatedProcess> {
        let state = wait_pid(self.pid, None)?
            .ok_or_else(|| PipeError::Syscall(format!("waitpid({}) returned early", self.pid)))?;
        self.reaped = true;
        Ok(self.terminated(state))
    }

    /// Reap this child if it already exited, without blocking
    pub fn check_exited(mut self) -> Result<ExitCheck> {
        match wait_pid(self.pid, Some(WaitPidFlag::WNOHANG))? {
            Some(state) => {
                self.reaped = true;
                Ok(ExitCheck::Exited(self.terminated(state)))
            }
            None => Ok(ExitCheck::Running(self)),
        }
    }

    fn terminated(&self, state: ExitState) -> TerminatedProcess {
        debug!("reaped pid {}: {}", self.pid, state);
        TerminatedProcess {
            pid: self.pid,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
            state,
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.reaped {
            warn!(
                "pid {} dropped without being reaped; it stays a zombie until this process exits",
                self.pid
            );
        }
    }
}

/// Result of a non-blocking exit check
#[derive(Debug)]
pub enum ExitCheck {
    Running(ProcessHandle),
    Exited(TerminatedProcess),
}

impl ExitCheck {
    pub fn is_running(&self) -> bool {
        matches!(self, ExitCheck::Running(_))
    }

    pub fn into_exited(self) -> Option<TerminatedProcess> {
        match self {
            ExitCheck::Exited(process) => Some(process),
            ExitCheck::Running(_) => None,
        }
    }
}

/// How a child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Normal termination with an 8-bit exit code
    Exited(u8),
    /// Killed by a signal; there is no exit code
    Signaled(Signal),
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "exited with {}", code),
            ExitState::Signaled(signal) => write!(f, "killed by {}", signal),
        }
    }
}

/// A reaped child and its exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminatedProcess {
    pid: Pid,
    stdin: RawFd,
    stdout: RawFd,
    stderr: RawFd,
    state: ExitState,
}

impl TerminatedProcess {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn stdin_fd(&self) -> RawFd {
        self.stdin
    }

    pub fn stdout_fd(&self) -> RawFd {
        self.stdout
    }

    pub fn stderr_fd(&self) -> RawFd {
        self.stderr
    }

    pub fn state(&self) -> ExitState {
        self.state
    }

    pub fn normal_exit(&self) -> bool {
        matches!(self.state, ExitState::Exited(_))
    }

    /// Exit code, only for a normal exit
    pub fn exit_code(&self) -> Option<u8> {
        match self.state {
            ExitState::Exited(code) => Some(code),
            ExitState::Signaled(_) => None,
        }
    }

    pub fn signal(&self) -> Option<Signal> {
        match self.state {
            ExitState::Signaled(signal) => Some(signal),
            ExitState::Exited(_) => None,
        }
    }

    /// Truthiness: normal exit with code 0
    pub fn success(&self) -> bool {
        self.state == ExitState::Exited(0)
    }
}

impl fmt::Display for TerminatedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} {}", self.pid, self.state)
    }
}

/// Which standard descriptors get a fresh pipe in [`ProcessLauncher::launch_piped`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeSet {
    pub stdin: bool,
    pub stdout: bool,
}

/// Process launcher
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Fork and exec `cmd` with the given descriptors on 0, 1 and 2.
    ///
    /// Returns as soon as the child exists. A child whose exec fails reports
    /// on its stderr and exits with [`EXEC_FAILURE_STATUS`].
    pub fn launch(
        cmd: &Command,
        stdin: RawFd,
        stdout: RawFd,
        stderr: RawFd,
    ) -> Result<ProcessHandle> {
        let exec = ExecArgs::new(cmd)?;
        let pid = Self::spawn(cmd, &exec, [stdin, stdout, stderr])?;
        Ok(ProcessHandle::new(pid, stdin, stdout, stderr))
    }

    /// Like [`launch`](Self::launch), with stdout connected to a new pipe.
    ///
    /// The handle's stdout is the pipe's read end; the write end is closed
    /// in the parent right after the fork so EOF follows the child's exit.
    pub fn launch_capturing(cmd: &Command, stdin: RawFd, stderr: RawFd) -> Result<ProcessHandle> {
        let exec = ExecArgs::new(cmd)?;
        let (read, write) = pipe_cloexec()?;

        let pid = Self::spawn(cmd, &exec, [stdin, write.as_raw_fd(), stderr])?;
        drop(write);

        let mut handle = ProcessHandle::new(pid, stdin, read.as_raw_fd(), stderr);
        handle.output = Some(File::from(read));
        Ok(handle)
    }

    /// Launch with fresh pipes on stdin and/or stdout; stderr is inherited
    pub fn launch_piped(cmd: &Command, pipes: PipeSet) -> Result<ProcessHandle> {
        let exec = ExecArgs::new(cmd)?;
        let stdin_pipe = if pipes.stdin { Some(pipe_cloexec()?) } else { None };
        let stdout_pipe = if pipes.stdout { Some(pipe_cloexec()?) } else { None };

        let child_in = stdin_pipe
            .as_ref()
            .map_or(STDIN_FD, |(read, _)| read.as_raw_fd());
        let child_out = stdout_pipe
            .as_ref()
            .map_or(STDOUT_FD, |(_, write)| write.as_raw_fd());

        let pid = Self::spawn(cmd, &exec, [child_in, child_out, STDERR_FD])?;

        let mut handle = ProcessHandle::new(pid, STDIN_FD, STDOUT_FD, STDERR_FD);
        if let Some((read, write)) = stdin_pipe {
            drop(read);
            handle.stdin = write.as_raw_fd();
            handle.input = Some(File::from(write));
        }
        if let Some((read, write)) = stdout_pipe {
            drop(write);
            handle.stdout = read.as_raw_fd();
            handle.output = Some(File::from(read));
        }
        Ok(handle)
    }

    /// Block until `handle` exits
    pub fn wait(handle: ProcessHandle) -> Result<TerminatedProcess> {
        handle.wait()
    }

    /// Poll `handle` without blocking
    pub fn check_exited(handle: ProcessHandle) -> Result<ExitCheck> {
        handle.check_exited()
    }

    /// Replace the current process image with `cmd`.
    ///
    /// Only returns if the exec failed.
    pub fn exec(cmd: &Command) -> PipeError {
        let exec = match ExecArgs::new(cmd) {
            Ok(exec) => exec,
            Err(e) => return e,
        };
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();

        // SAFETY: argv is a NUL-terminated array of valid C strings owned by `exec`
        unsafe {
            libc::execvp(exec.argv[0], exec.argv.as_ptr());
        }
        PipeError::Launch {
            program: cmd.program().to_string(),
            source: Errno::last(),
        }
    }

    fn spawn(cmd: &Command, exec: &ExecArgs, fds: [RawFd; 3]) -> Result<Pid> {
        // SAFETY: the child only calls async-signal-safe functions before exec or _exit
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!(
                    "launched `{}` as pid {} (fds {} {} {})",
                    cmd, child, fds[0], fds[1], fds[2]
                );
                Ok(child)
            }
            Ok(ForkResult::Child) => unsafe { exec.child_exec(fds) },
            Err(source) => Err(PipeError::Launch {
                program: cmd.program().to_string(),
                source,
            }),
        }
    }
}

/// Exec arguments and diagnostics, built before forking
struct ExecArgs {
    _strings: Vec<CString>,
    argv: Vec<*const libc::c_char>,
    diagnostic: Vec<u8>,
}

impl ExecArgs {
    fn new(cmd: &Command) -> Result<Self> {
        let strings = cmd.to_cstrings()?;
        let mut argv: Vec<*const libc::c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        argv.push(std::ptr::null());

        Ok(Self {
            _strings: strings,
            argv,
            diagnostic: format!("Can't execute: {}: ", cmd.program()).into_bytes(),
        })
    }

    /// Install descriptors and exec. Runs in the forked child only.
    unsafe fn child_exec(&self, fds: [RawFd; 3]) -> ! {
        for (slot, &fd) in fds.iter().enumerate() {
            let slot = slot as RawFd;
            if fd != slot {
                if libc::dup2(fd, slot) == -1 {
                    self.die();
                }
            } else {
                // Already in place; only make sure it survives exec
                let flags = libc::fcntl(slot, libc::F_GETFD);
                if flags != -1 && flags & libc::FD_CLOEXEC != 0 {
                    libc::fcntl(slot, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
                }
            }
        }

        libc::execvp(self.argv[0], self.argv.as_ptr());
        self.die()
    }

    unsafe fn die(&self) -> ! {
        let reason = Errno::last().desc().as_bytes();
        write_all_raw(STDERR_FD, &self.diagnostic);
        write_all_raw(STDERR_FD, reason);
        write_all_raw(STDERR_FD, b"\n");
        libc::_exit(EXEC_FAILURE_STATUS)
    }
}

unsafe fn write_all_raw(fd: RawFd, mut buf: &[u8]) {
    while !buf.is_empty() {
        let n = libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len());
        if n <= 0 {
            if n == -1 && Errno::last() == Errno::EINTR {
                continue;
            }
            return;
        }
        buf = &buf[n as usize..];
    }
}

/// Wait for one specific pid; `None` means still running (only with WNOHANG)
fn wait_pid(pid: Pid, flags: Option<WaitPidFlag>) -> Result<Option<ExitState>> {
    loop {
        match waitpid(pid, flags) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(Some(ExitState::Exited(code as u8))),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(Some(ExitState::Signaled(signal)));
            }
            Ok(WaitStatus::StillAlive) => return Ok(None),
            Ok(_) if flags.is_some() => return Ok(None),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(PipeError::Syscall(format!("waitpid({}) failed: {}", pid, e)));
            }
        }
    }
}
