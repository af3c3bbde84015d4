//! Filesystem primitives: copy-on-write duplication, atomic writes, pruning.

use std::fs;
use std::io;
use std::path::Path;

/// How a file was duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneMethod {
    Reflink,
    Copy,
    /// The destination already held the object.
    Existing,
}

/// Duplicate `src` (following symlinks) to `dest`, replacing `dest`.
///
/// Tries a copy-on-write clone first and falls back to a full copy.
pub fn clone_or_copy(src: &Path, dest: &Path) -> io::Result<CloneMethod> {
    remove_if_exists(dest)?;
    if reflink(src, dest).is_ok() {
        return Ok(CloneMethod::Reflink);
    }
    remove_if_exists(dest)?;
    fs::copy(src, dest)?;
    Ok(CloneMethod::Copy)
}

/// Store an independent copy of `src` at `dest` unless `dest` exists.
///
/// Objects are content-addressed, so an existing `dest` already holds the
/// same bytes. Never hard-links: an in-place edit of the working tree must
/// not reach the object.
pub fn link_object(src: &Path, dest: &Path) -> io::Result<CloneMethod> {
    if dest.exists() {
        return Ok(CloneMethod::Existing);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension("tmp");
    let method = clone_or_copy(src, &tmp)?;
    if let Err(err) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(method)
}

#[cfg(target_os = "linux")]
fn reflink(src: &Path, dest: &Path) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let source = fs::File::open(src)?;
    let target = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)?;
    // SAFETY: both descriptors are open for the duration of the call.
    let rc = unsafe { libc::ioctl(target.as_raw_fd(), libc::FICLONE as _, source.as_raw_fd()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn reflink(_src: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "reflink not supported on this platform",
    ))
}

/// Write `content` to `<path>.tmp` then rename over `path`.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp_name);
    fs::write(&tmp, content)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Remove now-empty directories from `start` upwards, stopping at `stop`.
pub fn prune_empty_parents(start: &Path, stop: &Path) {
    let mut current = start.parent();
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
