//! Descriptor slots and redirection targets

use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{FcntlArg, FdFlag, OFlag};
use nix::sys::stat::Mode;

use crate::errors::{PipeError, Result};

pub const STDIN_FD: RawFd = 0;
pub const STDOUT_FD: RawFd = 1;
pub const STDERR_FD: RawFd = 2;

/// One of the three standard descriptor slots of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdSlot {
    Stdin,
    Stdout,
    Stderr,
}

impl StdSlot {
    /// Descriptor number the slot occupies in the child
    pub fn fd(self) -> RawFd {
        match self {
            StdSlot::Stdin => STDIN_FD,
            StdSlot::Stdout => STDOUT_FD,
            StdSlot::Stderr => STDERR_FD,
        }
    }
}

impl fmt::Display for StdSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StdSlot::Stdin => "stdin",
            StdSlot::Stdout => "stdout",
            StdSlot::Stderr => "stderr",
        };
        f.write_str(name)
    }
}

/// Where a redirection points: a filesystem path or a raw descriptor.
///
/// A raw descriptor is used as is. No file is created or truncated and
/// procpipe never closes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Path(PathBuf),
    Fd(RawFd),
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(PathBuf::from(path))
    }
}

impl From<String> for Target {
    fn from(path: String) -> Self {
        Target::Path(PathBuf::from(path))
    }
}

impl From<&Path> for Target {
    fn from(path: &Path) -> Self {
        Target::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for Target {
    fn from(path: PathBuf) -> Self {
        Target::Path(path)
    }
}

impl From<RawFd> for Target {
    fn from(fd: RawFd) -> Self {
        Target::Fd(fd)
    }
}

/// How a path target is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `>`: write, create, truncate
    Truncate,
    /// `>>`: write, create, append
    Append,
    /// `<`: read only
    Read,
}

impl OpenMode {
    fn flags(self) -> OFlag {
        let base = match self {
            OpenMode::Truncate => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            OpenMode::Append => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND,
            OpenMode::Read => OFlag::O_RDONLY,
        };
        base | OFlag::O_CLOEXEC
    }
}

/// The descriptor bound to one standard slot of a staged invocation
#[derive(Debug, Default)]
pub enum Slot {
    /// The parent's own standard descriptor
    #[default]
    Inherit,
    /// A descriptor owned by the caller
    Borrowed(RawFd),
    /// A file or pipe end opened by procpipe; closed once handed to a child
    Owned(OwnedFd),
}

impl Slot {
    /// Raw descriptor to install in the child for `slot`
    pub fn raw(&self, slot: StdSlot) -> RawFd {
        match self {
            Slot::Inherit => slot.fd(),
            Slot::Borrowed(fd) => *fd,
            Slot::Owned(fd) => fd.as_raw_fd(),
        }
    }

    /// True while the slot still resolves to its standard descriptor
    pub fn is_default(&self, slot: StdSlot) -> bool {
        self.raw(slot) == slot.fd()
    }

    /// Resolve a redirection target into a slot, opening paths with `perms`
    pub fn open(target: Target, mode: OpenMode, perms: u32) -> Result<Slot> {
        match target {
            Target::Fd(fd) => Ok(Slot::Borrowed(fd)),
            Target::Path(path) => open_path(&path, mode, perms).map(Slot::Owned),
        }
    }
}

/// Open `path` for a redirection with close-on-exec set
pub fn open_path(path: &Path, mode: OpenMode, perms: u32) -> Result<OwnedFd> {
    let perms = Mode::from_bits_truncate(perms as libc::mode_t);
    let fd = nix::fcntl::open(path, mode.flags(), perms).map_err(|source| {
        PipeError::Redirection {
            path: path.to_path_buf(),
            source,
        }
    })?;

    // SAFETY: open returned a fresh descriptor that nothing else owns
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Create a pipe whose ends are not inherited across exec.
///
/// Returns `(read, write)`.
pub fn pipe_cloexec() -> Result<(OwnedFd, OwnedFd)> {
    #[cfg(not(target_vendor = "apple"))]
    {
        nix::unistd::pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| PipeError::Syscall(format!("pipe failed: {}", e)))
    }

    #[cfg(target_vendor = "apple")]
    {
        let (read, write) = nix::unistd::pipe()
            .map_err(|e| PipeError::Syscall(format!("pipe failed: {}", e)))?;
        set_cloexec(read.as_raw_fd())?;
        set_cloexec(write.as_raw_fd())?;
        Ok((read, write))
    }
}

/// Mark a descriptor close-on-exec
pub fn set_cloexec(fd: RawFd) -> Result<()> {
    nix::fcntl::fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map(|_| ())
        .map_err(|e| PipeError::Syscall(format!("fcntl failed on fd {}: {}", fd, e)))
}
