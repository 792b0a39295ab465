//! Scoped exclusive file locks with a bounded acquisition interval
//!
//! A [`FileLock`] holds an OS-level advisory lock (`flock` on Unix,
//! `LockFileEx` on Windows) on a dedicated lock file for as long as the
//! guard lives. The lock is released on drop, and the OS releases it if
//! the process dies, so no exit path can leave it held.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use fs2::FileExt;

use crate::{Error, Result};

/// Guard for an exclusive lock on a lock file.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, waiting at most `timeout`.
    ///
    /// Contention is retried with exponential backoff. Once `timeout` has
    /// elapsed the call fails with [`Error::LockTimeout`] instead of
    /// blocking further.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        let started = Instant::now();
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(250),
            max_elapsed_time: Some(timeout),
            ..ExponentialBackoff::default()
        };

        let attempt = || match file.try_lock_exclusive() {
            Ok(()) => Ok(()),
            Err(e) if is_contended(&e) => Err(backoff::Error::transient(e)),
            Err(e) => Err(backoff::Error::permanent(e)),
        };

        match backoff::retry(policy, attempt) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), waited = ?started.elapsed(), "Lock acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(backoff::Error::Transient { .. }) => Err(Error::LockTimeout {
                path: path.to_path_buf(),
                waited: started.elapsed(),
            }),
            Err(backoff::Error::Permanent(_)) => Err(Error::LockFailed {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Try to acquire the lock without waiting.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(_) => Err(Error::LockFailed {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");

        let _held = FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let err = FileLock::acquire(&path, Duration::from_millis(100)).unwrap_err();

        assert!(matches!(err, Error::LockTimeout { .. }), "got: {err:?}");
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.lock");

        {
            let _held = FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
            assert!(FileLock::try_acquire(&path).unwrap().is_none());
        }

        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }
}
