//! Lock files left behind by a terminated front-end.
//!
//! The front-end writes `<model>.lock` next to an opened model file and
//! only removes it on a regular exit. Terminating the process leaves the
//! lock in place, which would make the next open prompt for recovery.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{AppError, Result};

/// Path of the lock file belonging to `mphfile`.
#[must_use]
pub fn lock_file_path(mphfile: &Path) -> PathBuf {
    let mut path = OsString::from(mphfile.as_os_str());
    path.push(".lock");
    PathBuf::from(path)
}

/// Delete the lock file of `mphfile`.
///
/// Returns whether a file was removed. A missing lock file or one we may
/// not delete is not an error.
///
/// # Errors
///
/// Returns `AppError::Io` for any other removal failure.
pub fn remove_lock_file(mphfile: &Path) -> Result<bool> {
    let lockfile = lock_file_path(mphfile);
    match fs::remove_file(&lockfile) {
        Ok(()) => {
            debug!(lockfile = %lockfile.display(), "removed lock file");
            Ok(true)
        }
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            Ok(false)
        }
        Err(err) => Err(AppError::Io(format!(
            "failed to remove lock file {}: {err}",
            lockfile.display()
        ))),
    }
}
