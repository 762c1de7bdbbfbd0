//! Path canonicalization and advisory file locking.
//!
//! Locks are OS-level advisory locks on a lock file colocated with the target
//! (`<path>.lock`), acquired via `fs2`. A [`LockGuard`] releases on every exit path,
//! including panic, by unlocking in `Drop`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Result, SubstrateError};

/// An absolute, canonicalized path, verified not to escape a configured root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalPath(PathBuf);

impl CanonicalPath {
    /// Canonicalize `path`. Rejects `..` components relative to `root` when `root`
    /// is given and `allow_outside_root` is false.
    pub fn new(path: &Path, root: Option<&Path>, allow_outside_root: bool) -> Result<Self> {
        let canonical = fs::canonicalize(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SubstrateError::NotFound { path: path.to_path_buf() }
            } else {
                SubstrateError::PermissionDenied { path: path.to_path_buf(), source }
            }
        })?;

        if let Some(root) = root
            && !allow_outside_root
        {
            let root = fs::canonicalize(root).map_err(|source| SubstrateError::PermissionDenied {
                path: root.to_path_buf(),
                source,
            })?;
            if !canonical.starts_with(&root) {
                return Err(SubstrateError::UserError {
                    message: format!(
                        "{} escapes configured root {}",
                        canonical.display(),
                        root.display()
                    ),
                    hint: crate::error::RecoveryHint::Flag("--allow-outside-root"),
                });
            }
        }

        Ok(Self(canonical))
    }

    /// Wrap an already-canonical path without re-checking the filesystem, used for
    /// paths that do not exist yet (e.g. a move destination).
    #[must_use]
    pub fn assume_canonical(path: PathBuf) -> Self {
        Self(path)
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

fn lock_file_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map_or_else(|| "lockfile".into(), |n| n.to_os_string());
    name.push(".lock");
    target.with_file_name(name)
}

/// Kind of lock held by a [`LockGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Exclusive,
    Shared,
}

/// A held advisory lock, released automatically on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
    kind: LockKind,
}

impl LockGuard {
    #[must_use]
    pub fn kind(&self) -> LockKind {
        self.kind
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

/// Retry an exclusive-lock acquisition on `target` until `timeout` elapses.
///
/// Non-blocking `try_lock` calls are polled with a short sleep between attempts,
/// matching the bounded-wait contract: every wait surfaces `Timeout`, never blocks
/// unboundedly.
pub fn acquire_exclusive(target: &Path, timeout: Duration) -> Result<LockGuard> {
    acquire(target, timeout, LockKind::Exclusive)
}

pub fn acquire_shared(target: &Path, timeout: Duration) -> Result<LockGuard> {
    acquire(target, timeout, LockKind::Shared)
}

fn acquire(target: &Path, timeout: Duration, kind: LockKind) -> Result<LockGuard> {
    let path = lock_file_path(target);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SubstrateError::PermissionDenied {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|source| SubstrateError::PermissionDenied { path: path.clone(), source })?;

    let start = Instant::now();
    loop {
        let attempt = match kind {
            LockKind::Exclusive => file.try_lock_exclusive(),
            LockKind::Shared => file.try_lock_shared(),
        };
        match attempt {
            Ok(()) => {
                return Ok(LockGuard { path, file: Some(file), kind });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() >= timeout {
                    return Err(SubstrateError::Timeout {
                        operation: format!("lock {}", target.display()),
                        timeout_s: timeout.as_secs(),
                    });
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(source) => {
                return Err(SubstrateError::PermissionDenied { path, source });
            }
        }
    }
}

/// Probe whether `target`'s lock file is currently held by another process.
///
/// Returns `(locked, reason)`; `reason` is best-effort (we cannot always identify the
/// holder's pid from an advisory lock alone).
#[must_use]
pub fn is_locked(target: &Path) -> (bool, Option<&'static str>) {
    let path = lock_file_path(target);
    let Ok(file) = OpenOptions::new().read(true).write(true).create(true).open(&path) else {
        return (false, None);
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            (false, None)
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => (true, Some("held by another process")),
        Err(_) => (false, None),
    }
}

/// Poll `is_locked` until it clears or `max` elapses. Returns `true` if unlocked.
pub fn wait_for_unlock(target: &Path, max: Duration) -> bool {
    let start = Instant::now();
    loop {
        if !is_locked(target).0 {
            return true;
        }
        if start.elapsed() >= max {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Free space, in bytes, on the filesystem containing `dir`.
pub fn disk_free(dir: &Path) -> Result<u64> {
    fs2::available_space(dir).map_err(|source| SubstrateError::PermissionDenied {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn exclusive_lock_blocks_second_acquire() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("f.txt");
        fs::write(&target, b"x").unwrap();

        let _guard = acquire_exclusive(&target, Duration::from_millis(200)).unwrap();
        let second = acquire_exclusive(&target, Duration::from_millis(150));
        assert!(matches!(second, Err(SubstrateError::Timeout { .. })));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("f.txt");
        fs::write(&target, b"x").unwrap();

        {
            let _guard = acquire_exclusive(&target, Duration::from_millis(200)).unwrap();
        }
        let second = acquire_exclusive(&target, Duration::from_millis(200));
        assert!(second.is_ok());
    }

    #[test]
    fn canonicalize_rejects_escape_from_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        let file = outside.join("f.txt");
        fs::write(&file, b"x").unwrap();

        let result = CanonicalPath::new(&file, Some(&root), false);
        assert!(result.is_err());
        assert!(CanonicalPath::new(&file, Some(&root), true).is_ok());
    }
}
