//! Per-mirror mutual exclusion.
//!
//! On Unix the lock is an advisory `flock` on `.mirror/lock`, so a crashed
//! pass never leaves a stale lock behind.

use std::fs::File;
use std::path::{Path, PathBuf};

use dandimirror_core::CollectionId;

use crate::error::{setup_err, SyncError};

/// Held for the duration of one sync pass; released on drop.
#[derive(Debug)]
pub struct MirrorLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

impl MirrorLock {
    /// Take the lock without blocking. Contention yields [`SyncError::MirrorBusy`].
    pub fn acquire(path: &Path, collection: &CollectionId) -> Result<Self, SyncError> {
        let file = open_lock_file(path)?;
        if !try_lock(&file, path)? {
            tracing::warn!(collection = %collection, lock = %path.display(), "mirror is busy");
            return Err(SyncError::MirrorBusy {
                collection: collection.clone(),
                lock: path.to_path_buf(),
            });
        }
        tracing::debug!(collection = %collection, "acquired mirror lock");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> Result<File, SyncError> {
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| setup_err(path, e))
}

#[cfg(unix)]
fn try_lock(file: &File, path: &Path) -> Result<bool, SyncError> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor stays open for the lifetime of `file`.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(setup_err(path, err))
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File, path: &Path) -> Result<bool, SyncError> {
    let marker = path.with_extension("held");
    match std::fs::OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(setup_err(&marker, err)),
    }
}

#[cfg(not(unix))]
impl Drop for MirrorLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.path.with_extension("held"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let id = CollectionId::from("000027");

        let held = MirrorLock::acquire(&path, &id).unwrap();
        assert_eq!(held.path(), path);
        match MirrorLock::acquire(&path, &id) {
            Err(SyncError::MirrorBusy { collection, .. }) => assert_eq!(collection, id),
            other => panic!("expected MirrorBusy, got {other:?}"),
        }

        drop(held);
        MirrorLock::acquire(&path, &id).expect("lock is free after drop");
    }
}
