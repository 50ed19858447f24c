//! Single-attempt file operations used by the worker loop.
//!
//! Every call returns an [`OpResult`]; the caller logs failures and moves on.
//! Nothing here retries, including on `EINTR`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use thiserror::Error;

/// Permission bits requested on create, before umask
pub const CREATE_MODE: u32 = 0o666;

/// Access intent of a working-set slot, fixed by its index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    /// Even indices write, odd indices read
    pub fn for_index(index: usize) -> Self {
        if index % 2 == 0 {
            AccessMode::Write
        } else {
            AccessMode::Read
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("READ"),
            AccessMode::Write => f.write_str("WRITE"),
        }
    }
}

/// Whether a lock call waits for a conflicting holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `F_OFD_SETLKW`
    Blocking,
    /// `F_OFD_SETLK`
    NonBlocking,
}

impl LockMode {
    /// Odd rounds wait, even rounds fail fast
    pub fn for_round(round: usize) -> Self {
        if round % 2 == 1 {
            LockMode::Blocking
        } else {
            LockMode::NonBlocking
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Blocking => f.write_str("wait"),
            LockMode::NonBlocking => f.write_str("nowait"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Exclusive,
    Unlock,
}

/// Whole-file OFD lock request (`SEEK_SET`, start 0, len 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    kind: LockKind,
    pub mode: LockMode,
}

impl LockRequest {
    pub fn exclusive(mode: LockMode) -> Self {
        Self {
            kind: LockKind::Exclusive,
            mode,
        }
    }

    /// Release request; never waits
    pub fn unlock() -> Self {
        Self {
            kind: LockKind::Unlock,
            mode: LockMode::NonBlocking,
        }
    }

    fn to_flock(self) -> libc::flock {
        // l_pid must be zero for OFD requests; zeroing also covers
        // arch-specific padding fields.
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        let l_type = match self.kind {
            LockKind::Exclusive => libc::F_WRLCK,
            LockKind::Unlock => libc::F_UNLCK,
        };
        fl.l_type = l_type as libc::c_short;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = 0;
        fl.l_len = 0; // whole file
        fl
    }

    /// Issue the request on `file`'s open file description
    pub fn apply(self, file: &File) -> Result<(), Errno> {
        let fl = self.to_flock();
        let arg = match self.mode {
            LockMode::Blocking => FcntlArg::F_OFD_SETLKW(&fl),
            LockMode::NonBlocking => FcntlArg::F_OFD_SETLK(&fl),
        };
        fcntl(file.as_raw_fd(), arg).map(drop)
    }
}

/// A failed per-file operation, with the OS error behind it
#[derive(Debug, Error)]
pub enum OpError {
    #[error("open {name} ({access}): {source}")]
    Open {
        name: String,
        access: AccessMode,
        #[source]
        source: io::Error,
    },
    #[error("fcntl lock {name} ({mode}): {source}")]
    Lock {
        name: String,
        mode: LockMode,
        #[source]
        source: Errno,
    },
    #[error("write {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("short write {name}: {written} of {expected} bytes")]
    ShortWrite {
        name: String,
        written: usize,
        expected: usize,
    },
    #[error("fcntl unlock {name}: {source}")]
    Unlock {
        name: String,
        #[source]
        source: Errno,
    },
    #[error("close {name}: {source}")]
    Close {
        name: String,
        #[source]
        source: Errno,
    },
}

impl OpError {
    /// Raw OS error number, when one was reported
    pub fn errno(&self) -> Option<i32> {
        match self {
            OpError::Open { source, .. } | OpError::Write { source, .. } => source.raw_os_error(),
            OpError::Lock { source, .. }
            | OpError::Unlock { source, .. }
            | OpError::Close { source, .. } => Some(*source as i32),
            OpError::ShortWrite { .. } => None,
        }
    }

    /// Working-set name of the slot the call was made on
    pub fn name(&self) -> &str {
        match self {
            OpError::Open { name, .. }
            | OpError::Lock { name, .. }
            | OpError::Write { name, .. }
            | OpError::ShortWrite { name, .. }
            | OpError::Unlock { name, .. }
            | OpError::Close { name, .. } => name,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            OpError::Open { .. } => "open",
            OpError::Lock { .. } => "lock",
            OpError::Write { .. } | OpError::ShortWrite { .. } => "write",
            OpError::Unlock { .. } => "unlock",
            OpError::Close { .. } => "close",
        }
    }
}

pub type OpResult<T> = std::result::Result<T, OpError>;

/// Open `root/name` with `O_CREAT` and the access flag for `access`.
///
/// Never truncates; write-intent opens keep existing contents.
pub fn open_slot(root: &Path, name: &str, access: AccessMode) -> OpResult<File> {
    let mut opts = OpenOptions::new();
    match access {
        AccessMode::Read => {
            opts.read(true).custom_flags(libc::O_CREAT);
        }
        AccessMode::Write => {
            opts.write(true).create(true);
        }
    }
    opts.mode(CREATE_MODE)
        .open(root.join(name))
        .map_err(|source| OpError::Open {
            name: name.to_string(),
            access,
            source,
        })
}

pub fn lock_slot(file: &File, name: &str, mode: LockMode) -> OpResult<()> {
    LockRequest::exclusive(mode)
        .apply(file)
        .map_err(|source| OpError::Lock {
            name: name.to_string(),
            mode,
            source,
        })
}

pub fn unlock_slot(file: &File, name: &str) -> OpResult<()> {
    LockRequest::unlock()
        .apply(file)
        .map_err(|source| OpError::Unlock {
            name: name.to_string(),
            source,
        })
}

/// One `write(2)` of `payload` at the current offset
pub fn write_slot(file: &File, name: &str, payload: &[u8]) -> OpResult<usize> {
    let mut handle = file;
    let written = handle.write(payload).map_err(|source| OpError::Write {
        name: name.to_string(),
        source,
    })?;
    if written != payload.len() {
        return Err(OpError::ShortWrite {
            name: name.to_string(),
            written,
            expected: payload.len(),
        });
    }
    Ok(written)
}

/// Close through `close(2)` so the result is observable.
///
/// The descriptor is consumed either way; a failed close is not retried.
pub fn close_slot(file: File, name: &str) -> OpResult<()> {
    nix::unistd::close(file.into_raw_fd()).map_err(|source| OpError::Close {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_access_mode_by_parity() {
        assert_eq!(AccessMode::for_index(0), AccessMode::Write);
        assert_eq!(AccessMode::for_index(1), AccessMode::Read);
        assert_eq!(AccessMode::for_index(6), AccessMode::Write);
        assert_eq!(AccessMode::for_index(9), AccessMode::Read);
    }

    #[test]
    fn test_lock_mode_alternates() {
        let modes: Vec<_> = (0..6).map(LockMode::for_round).collect();
        for pair in modes.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(modes[0], LockMode::NonBlocking);
    }

    #[test]
    fn test_lock_request_covers_whole_file() {
        let fl = LockRequest::exclusive(LockMode::Blocking).to_flock();
        assert_eq!(fl.l_type, libc::F_WRLCK as libc::c_short);
        assert_eq!(fl.l_whence, libc::SEEK_SET as libc::c_short);
        assert_eq!(fl.l_start, 0);
        assert_eq!(fl.l_len, 0);
        assert_eq!(fl.l_pid, 0);

        let fl = LockRequest::unlock().to_flock();
        assert_eq!(fl.l_type, libc::F_UNLCK as libc::c_short);
    }

    #[test]
    fn test_read_open_creates_file() {
        let dir = tempdir().unwrap();
        let file = open_slot(dir.path(), "a", AccessMode::Read).unwrap();
        assert!(dir.path().join("a").is_file());
        close_slot(file, "a").unwrap();
    }

    #[test]
    fn test_open_missing_dir_reports_errno() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("gone");
        let err = open_slot(&root, "b", AccessMode::Write).unwrap_err();
        assert_eq!(err.op(), "open");
        assert_eq!(err.errno(), Some(libc::ENOENT));
        assert!(err.to_string().contains("open b (WRITE)"));
    }

    #[test]
    fn test_short_write_has_no_errno() {
        let err = OpError::ShortWrite {
            name: "c".to_string(),
            written: 2,
            expected: 4,
        };
        assert_eq!(err.op(), "write");
        assert_eq!(err.name(), "c");
        assert_eq!(err.errno(), None);
    }

    #[test]
    fn test_write_does_not_truncate() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b"), b"0123456789").unwrap();

        let file = open_slot(dir.path(), "b", AccessMode::Write).unwrap();
        assert_eq!(write_slot(&file, "b", b"abc\0").unwrap(), 4);
        close_slot(file, "b").unwrap();

        assert_eq!(std::fs::read(dir.path().join("b")).unwrap(), b"abc\x00456789");
    }

    #[test]
    fn test_write_to_read_only_slot_fails() {
        let dir = tempdir().unwrap();
        let file = open_slot(dir.path(), "a", AccessMode::Read).unwrap();
        let err = write_slot(&file, "a", b"abc\0").unwrap_err();
        assert_eq!(err.errno(), Some(libc::EBADF));
        close_slot(file, "a").unwrap();
    }

    #[test]
    fn test_lock_on_read_only_slot_fails() {
        // F_WRLCK needs a descriptor open for writing.
        let dir = tempdir().unwrap();
        let file = open_slot(dir.path(), "a", AccessMode::Read).unwrap();
        let err = lock_slot(&file, "a", LockMode::NonBlocking).unwrap_err();
        assert_eq!(err.errno(), Some(libc::EBADF));
        close_slot(file, "a").unwrap();
    }

    #[test]
    fn test_ofd_locks_conflict_within_one_process() {
        let dir = tempdir().unwrap();
        let first = open_slot(dir.path(), "b", AccessMode::Write).unwrap();
        let second = open_slot(dir.path(), "b", AccessMode::Write).unwrap();

        lock_slot(&first, "b", LockMode::NonBlocking).unwrap();
        let err = lock_slot(&second, "b", LockMode::NonBlocking).unwrap_err();
        assert_eq!(err.errno(), Some(libc::EAGAIN));

        // Closing the holder's description releases its lock.
        close_slot(first, "b").unwrap();
        lock_slot(&second, "b", LockMode::NonBlocking).unwrap();
        close_slot(second, "b").unwrap();
    }

    #[test]
    fn test_explicit_unlock_releases() {
        let dir = tempdir().unwrap();
        let first = open_slot(dir.path(), "b", AccessMode::Write).unwrap();
        let second = open_slot(dir.path(), "b", AccessMode::Write).unwrap();

        lock_slot(&first, "b", LockMode::NonBlocking).unwrap();
        unlock_slot(&first, "b").unwrap();
        lock_slot(&second, "b", LockMode::NonBlocking).unwrap();

        close_slot(first, "b").unwrap();
        close_slot(second, "b").unwrap();
    }
}
