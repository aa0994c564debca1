//! Output capture, the `$(...)` of procpipe

use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use log::debug;
use nix::errno::Errno;

use crate::config::{DEFAULT_READ_CHUNK, MAX_READ_CHUNK};
use crate::errors::{PipeError, Result};
use crate::execution::process::TerminatedProcess;
use crate::pending::PendingInvocation;

/// Captured text together with the exit status of the process that wrote it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub text: String,
    pub status: TerminatedProcess,
}

/// Run `invocation` with stdout on a private pipe and return what it wrote.
///
/// One trailing newline is removed, as shell command substitution does.
/// The child is reaped once its output reaches end of stream.
pub fn capture(invocation: PendingInvocation) -> Result<String> {
    capture_output(invocation).map(|captured| captured.text)
}

/// Like [`capture`], also returning the exit status
pub fn capture_output(invocation: PendingInvocation) -> Result<Captured> {
    let config = invocation.config();
    let mut handle = invocation.detach_capturing()?;
    let output = handle
        .take_output()
        .ok_or_else(|| PipeError::Syscall("capture pipe missing".to_string()))?;

    let bytes = read_chunks(output.as_fd(), config.read_chunk);
    drop(output);
    let status = handle.wait()?;

    let mut text = String::from_utf8_lossy(&bytes?).into_owned();
    if config.trim_trailing_newline {
        trim_trailing_newline(&mut text);
    }
    debug!("captured {} bytes from {}", text.len(), status);

    Ok(Captured { text, status })
}

/// Read a descriptor until end of stream, e.g. a handle's output pipe
pub fn read_to_end<Fd: AsFd>(fd: Fd) -> Result<String> {
    let bytes = read_chunks(fd.as_fd(), DEFAULT_READ_CHUNK)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// Short reads are normal for pipes; only a zero-length read means EOF.
// The chunk is clamped because configs built without `validate` reach here.
fn read_chunks(fd: BorrowedFd<'_>, chunk: usize) -> Result<Vec<u8>> {
    let mut collected = Vec::new();
    let mut buf = vec![0u8; chunk.clamp(1, MAX_READ_CHUNK)];

    loop {
        match nix::unistd::read(fd.as_raw_fd(), &mut buf) {
            Ok(0) => return Ok(collected),
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(PipeError::Syscall(format!(
                    "read from fd {} failed: {}",
                    fd.as_raw_fd(),
                    e
                )));
            }
        }
    }
}

fn trim_trailing_newline(text: &mut String) {
    if text.ends_with("\r\n") {
        text.truncate(text.len() - 2);
    } else if text.ends_with('\n') {
        text.truncate(text.len() - 1);
    }
}

impl PendingInvocation {
    /// See [`capture`]
    pub fn capture(self) -> Result<String> {
        capture(self)
    }
}
