//! # Preflight Checks
//!
//! Fail-fast validation of target directories before any worker is forked.
//! Every directory is checked so one run reports all bad targets at once.

use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("cannot stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a directory", .0.display())]
    NotDirectory(PathBuf),
    #[error("cannot write to dir {}: {source}", path.display())]
    NotWritable {
        path: PathBuf,
        #[source]
        source: Errno,
    },
}

/// Result of preflight checks
#[derive(Debug, Default)]
pub struct PreflightResult {
    pub checked: Vec<PathBuf>,
    pub errors: Vec<PreflightError>,
}

impl PreflightResult {
    /// True only if ALL directories passed
    pub fn can_spawn(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Existing, a directory, and writable by this process.
///
/// Uses `access(2)`, which checks the real uid; lockstorm is not meant to run
/// setuid, so real and effective ids match.
pub fn check_writable_dir(path: &Path) -> Result<(), PreflightError> {
    let meta = std::fs::metadata(path).map_err(|source| PreflightError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(PreflightError::NotDirectory(path.to_path_buf()));
    }
    access(path, AccessFlags::W_OK).map_err(|source| PreflightError::NotWritable {
        path: path.to_path_buf(),
        source,
    })
}

/// Run all preflight checks
pub fn run_preflight(directories: &[PathBuf]) -> PreflightResult {
    let mut result = PreflightResult::default();
    for dir in directories {
        if let Err(e) = check_writable_dir(dir) {
            result.errors.push(e);
        }
        result.checked.push(dir.clone());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writable_dir_passes() {
        let dir = tempdir().unwrap();
        check_writable_dir(dir.path()).unwrap();
    }

    #[test]
    fn test_missing_dir_fails_stat() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = check_writable_dir(&missing).unwrap_err();
        assert!(matches!(err, PreflightError::Stat { .. }));
    }

    #[test]
    fn test_regular_file_is_not_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = check_writable_dir(&file).unwrap_err();
        assert!(matches!(err, PreflightError::NotDirectory(p) if p == file));
    }

    #[test]
    fn test_read_only_dir_is_not_writable() {
        use std::os::unix::fs::PermissionsExt;

        // root bypasses mode bits
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tempdir().unwrap();
        let ro = dir.path().join("ro");
        std::fs::create_dir(&ro).unwrap();
        std::fs::set_permissions(&ro, std::fs::Permissions::from_mode(0o555)).unwrap();

        let err = check_writable_dir(&ro).unwrap_err();
        assert!(matches!(err, PreflightError::NotWritable { source: Errno::EACCES, .. }));

        std::fs::set_permissions(&ro, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_run_preflight_reports_every_bad_dir() {
        let dir = tempdir().unwrap();
        let good = dir.path().to_path_buf();
        let bad1 = dir.path().join("nope1");
        let bad2 = dir.path().join("nope2");

        let result = run_preflight(&[bad1, good, bad2]);

        assert!(!result.can_spawn());
        assert_eq!(result.checked.len(), 3);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_run_preflight_all_good() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let result = run_preflight(&[a.path().to_path_buf(), b.path().to_path_buf()]);
        assert!(result.can_spawn());
    }
}
