//! Atomic File Substrate (AFS): crash-safe, lock-aware, checksum-verified file
//! move/copy/replace with bounded retry.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::checksum::{self, Digest};
use crate::error::{Result, SubstrateError};
use crate::history::{ContentHash, FileRef, HistoryLog, Kind, OperationDraft, RetryPolicy};
use crate::path_lock;

/// What to do when the destination of a move/copy already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    Fail,
    Backup,
    Replace,
}

impl OverwritePolicy {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "fail" => Self::Fail,
            "replace" => Self::Replace,
            _ => Self::Backup,
        }
    }
}

/// Options accepted by every AFS entry point.
#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub verify_checksum: bool,
    pub retry: RetryPolicy,
    pub overwrite_policy: OverwritePolicy,
    pub preserve_metadata: bool,
    /// Overrides the journal `Kind` recorded for a move/copy. Callers that drive
    /// AFS on behalf of another engine (OPM's planner uses `Kind::OrganizerMove`)
    /// set this so the journal records whose tool actually moved the file instead
    /// of a generic `WriteFile`.
    pub record_kind: Option<Kind>,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            retry: RetryPolicy::default(),
            overwrite_policy: OverwritePolicy::Backup,
            preserve_metadata: true,
            record_kind: None,
        }
    }
}

impl From<&crate::config::AfsConfig> for MoveOptions {
    fn from(cfg: &crate::config::AfsConfig) -> Self {
        Self {
            verify_checksum: cfg.verify_checksum,
            retry: RetryPolicy {
                max_retries: cfg.max_retries,
                retry_delay_s: cfg.retry_delay_s,
                backoff_exponent: cfg.backoff_exponent,
                timeout_s: cfg.timeout_s,
            },
            overwrite_policy: OverwritePolicy::parse(&cfg.overwrite_policy),
            preserve_metadata: cfg.preserve_metadata,
            record_kind: None,
        }
    }
}

/// Outcome of a successful AFS operation.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub op_id: crate::history::OperationId,
    pub bytes_copied: u64,
    pub can_undo: bool,
}

pub struct Afs<'a> {
    history: &'a HistoryLog,
    trash_dir: PathBuf,
}

impl<'a> Afs<'a> {
    #[must_use]
    pub fn new(history: &'a HistoryLog, trash_dir: PathBuf) -> Self {
        Self { history, trash_dir }
    }

    #[must_use]
    pub fn history(&self) -> &'a HistoryLog {
        self.history
    }

    /// `atomic_move`: copy to a temp sibling, verify, rename onto dst, unlink src.
    pub fn atomic_move(&self, src: &Path, dst: &Path, opts: &MoveOptions) -> Result<OperationResult> {
        self.with_retry(opts, |attempt| self.move_once(src, dst, opts, attempt))
    }

    /// `atomic_copy`: identical to move, minus the final unlink.
    pub fn atomic_copy(&self, src: &Path, dst: &Path, opts: &MoveOptions) -> Result<OperationResult> {
        self.with_retry(opts, |attempt| self.copy_once(src, dst, opts, attempt, false))
    }

    /// `atomic_write`: write-new-or-replace.
    pub fn atomic_write(&self, path: &Path, bytes: &[u8], opts: &MoveOptions) -> Result<OperationResult> {
        self.with_retry(opts, |_attempt| self.write_once(path, bytes, opts))
    }

    /// `safe_delete`: move to the trash area rather than unlinking.
    pub fn safe_delete(&self, path: &Path, opts: &MoveOptions) -> Result<OperationResult> {
        self.with_retry(opts, |_attempt| self.delete_once(path, opts))
    }

    fn with_retry(
        &self,
        opts: &MoveOptions,
        mut f: impl FnMut(u32) -> Result<OperationResult>,
    ) -> Result<OperationResult> {
        let mut delay = opts.retry.retry_delay_s;
        let mut last_err = None;
        for attempt in 0..=opts.retry.max_retries {
            match f(attempt) {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < opts.retry.max_retries => {
                    last_err = Some(e);
                    thread::sleep(Duration::from_secs_f64(delay));
                    delay *= opts.retry.backoff_exponent;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(SubstrateError::Internal { detail: "retry loop exhausted with no error".into() }))
    }

    fn move_once(&self, src: &Path, dst: &Path, opts: &MoveOptions, _attempt: u32) -> Result<OperationResult> {
        let result = self.copy_once(src, dst, opts, _attempt, true)?;
        Ok(result)
    }

    fn resolve_dst(src: &Path, dst: &Path) -> Result<PathBuf> {
        let dst = if dst.is_dir() {
            let name = src.file_name().ok_or_else(|| SubstrateError::UserError {
                message: format!("source {} has no file name", src.display()),
                hint: crate::error::RecoveryHint::FreeText("pass a file, not a bare root".into()),
            })?;
            dst.join(name)
        } else {
            dst.to_path_buf()
        };
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|source| SubstrateError::PermissionDenied {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(dst)
    }

    fn copy_once(
        &self,
        src: &Path,
        dst: &Path,
        opts: &MoveOptions,
        _attempt: u32,
        unlink_src: bool,
    ) -> Result<OperationResult> {
        if !src.exists() {
            return Err(SubstrateError::NotFound { path: src.to_path_buf() });
        }
        let dst = Self::resolve_dst(src, dst)?;

        let src_lock_timeout = Duration::from_secs(opts.retry.timeout_s / 2);
        let _src_lock = path_lock::acquire_exclusive(src, src_lock_timeout)
            .map_err(|_| SubstrateError::LockedSource { path: src.to_path_buf(), held_by: None })?;

        let src_digest = if opts.verify_checksum { Some(checksum::hash_file(src)?) } else { None };

        let mut backup_taken = None;
        if dst.exists() {
            match opts.overwrite_policy {
                OverwritePolicy::Fail => return Err(SubstrateError::DestinationExists { path: dst.clone() }),
                OverwritePolicy::Backup => {
                    backup_taken = Some(self.backup_existing_dst(&dst)?);
                }
                OverwritePolicy::Replace => {}
            }
        }

        let tmp = dst.with_file_name(format!(
            "{}.tmp-{}",
            dst.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
            uuid::Uuid::new_v4()
        ));

        let copy_result = self.copy_verify_rename(src, &tmp, &dst, src_digest.as_ref());
        if let Err(e) = copy_result {
            let _ = fs::remove_file(&tmp);
            if let Some(backup) = backup_taken {
                let _ = fs::rename(&backup, &dst);
            }
            return Err(e);
        }
        let (bytes_copied, new_digest) = copy_result.unwrap();

        if unlink_src {
            fs::remove_file(src).map_err(|source| SubstrateError::PermissionDenied {
                path: src.to_path_buf(),
                source,
            })?;
            if let Some(parent) = src.parent() {
                let _ = checksum::fsync_dir(parent);
            }
        }

        let draft = OperationDraft {
            kind: opts.record_kind.unwrap_or(Kind::WriteFile),
            tool: "afs".into(),
            args: vec![src.display().to_string(), dst.display().to_string()],
            file: FileRef::for_path(&dst),
            old_hash: ContentHash::Digest(String::new()),
            new_hash: ContentHash::from(new_digest),
            lines_affected: 0,
            changes_count: 1,
            description: if unlink_src {
                format!("move {} -> {}", src.display(), dst.display())
            } else {
                format!("copy {} -> {}", src.display(), dst.display())
            },
            deps: vec![],
        };

        let op = if let Some(backup) = &backup_taken {
            self.history.record_with_backup(draft, backup)?
        } else if unlink_src && draft.kind == Kind::OrganizerMove {
            self.history.record_relocatable(draft)?
        } else {
            self.history.record(draft)?
        };

        Ok(OperationResult { op_id: op.op_id, bytes_copied, can_undo: op.can_undo })
    }

    fn copy_verify_rename(
        &self,
        src: &Path,
        tmp: &Path,
        dst: &Path,
        src_digest: Option<&Digest>,
    ) -> Result<(u64, Digest)> {
        let (bytes_copied, tmp_digest) = checksum::copy_stream(src, tmp)?;
        checksum::fsync_file(tmp)?;

        if let Some(expected) = src_digest
            && *expected != tmp_digest
        {
            return Err(SubstrateError::ChecksumMismatch {
                path: tmp.to_path_buf(),
                expected: expected.as_str().to_string(),
                actual: tmp_digest.as_str().to_string(),
            });
        }

        match fs::rename(tmp, dst) {
            Ok(()) => {}
            Err(_) => {
                // Cross-filesystem rename: fall back to copy+unlink of the temp file.
                let (_, fallback_digest) = checksum::copy_stream(tmp, dst)?;
                checksum::fsync_file(dst)?;
                let _ = fs::remove_file(tmp);
                if fallback_digest != tmp_digest {
                    return Err(SubstrateError::ChecksumMismatch {
                        path: dst.to_path_buf(),
                        expected: tmp_digest.as_str().to_string(),
                        actual: fallback_digest.as_str().to_string(),
                    });
                }
            }
        }
        if let Some(parent) = dst.parent() {
            let _ = checksum::fsync_dir(parent);
        }
        Ok((bytes_copied, tmp_digest))
    }

    fn backup_existing_dst(&self, dst: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.trash_dir).map_err(|source| SubstrateError::PermissionDenied {
            path: self.trash_dir.clone(),
            source,
        })?;
        let name = dst.file_name().and_then(|n| n.to_str()).unwrap_or("file");
        let trashed = self.trash_dir.join(format!("{}-{name}", now_millis()));
        fs::rename(dst, &trashed)
            .map_err(|source| SubstrateError::PermissionDenied { path: dst.to_path_buf(), source })?;
        Ok(trashed)
    }

    fn write_once(&self, path: &Path, bytes: &[u8], opts: &MoveOptions) -> Result<OperationResult> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SubstrateError::PermissionDenied {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let _lock = path_lock::acquire_exclusive(path, Duration::from_secs(opts.retry.timeout_s))?;

        let mut backup_taken = None;
        if path.exists() && opts.overwrite_policy == OverwritePolicy::Backup {
            backup_taken = Some(self.backup_existing_dst(path)?);
        } else if path.exists() && opts.overwrite_policy == OverwritePolicy::Fail {
            return Err(SubstrateError::DestinationExists { path: path.to_path_buf() });
        }

        let tmp = path.with_file_name(format!(
            "{}.tmp-{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
            uuid::Uuid::new_v4()
        ));
        fs::write(&tmp, bytes).map_err(|source| SubstrateError::PermissionDenied { path: tmp.clone(), source })?;
        checksum::fsync_file(&tmp)?;
        fs::rename(&tmp, path).map_err(|source| SubstrateError::PermissionDenied { path: path.to_path_buf(), source })?;

        let digest = checksum::hash_file(path)?;
        let draft = OperationDraft {
            kind: Kind::WriteFile,
            tool: "afs".into(),
            args: vec![path.display().to_string()],
            file: FileRef::for_path(path),
            old_hash: ContentHash::Digest(String::new()),
            new_hash: ContentHash::from(digest),
            lines_affected: 0,
            changes_count: 1,
            description: format!("write {}", path.display()),
            deps: vec![],
        };
        let op = if let Some(backup) = &backup_taken {
            self.history.record_with_backup(draft, backup)?
        } else {
            self.history.record(draft)?
        };
        Ok(OperationResult { op_id: op.op_id, bytes_copied: bytes.len() as u64, can_undo: op.can_undo })
    }

    fn delete_once(&self, path: &Path, opts: &MoveOptions) -> Result<OperationResult> {
        if !path.exists() {
            return Err(SubstrateError::NotFound { path: path.to_path_buf() });
        }
        let _lock = path_lock::acquire_exclusive(path, Duration::from_secs(opts.retry.timeout_s))?;
        let backup = self.backup_existing_dst(path)?;

        let draft = OperationDraft {
            kind: Kind::DeleteFile,
            tool: "afs".into(),
            args: vec![path.display().to_string()],
            file: FileRef::for_path(path),
            old_hash: ContentHash::Digest(String::new()),
            new_hash: ContentHash::Sentinel(crate::history::HashSentinel::Deleted),
            lines_affected: 0,
            changes_count: 1,
            description: format!("delete {}", path.display()),
            deps: vec![],
        };
        let op = self.history.record_with_backup(draft, &backup)?;
        Ok(OperationResult { op_id: op.op_id, bytes_copied: 0, can_undo: op.can_undo })
    }
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, HistoryLog) {
        let dir = TempDir::new().unwrap();
        let history = HistoryLog::open(dir.path()).unwrap();
        (dir, history)
    }

    #[test]
    fn move_with_checksum_creates_destination_and_removes_source() {
        let (dir, history) = setup();
        let afs = Afs::new(&history, dir.path().join("trash"));
        let src = dir.path().join("a.txt");
        fs::write(&src, b"hello\n").unwrap();
        let dst_dir = dir.path().join("dst");
        fs::create_dir_all(&dst_dir).unwrap();

        let result = afs.atomic_move(&src, &dst_dir.join("a.txt"), &MoveOptions::default()).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dst_dir.join("a.txt")).unwrap(), b"hello\n");
        assert_eq!(result.bytes_copied, 6);
    }

    #[test]
    fn checksum_mismatch_is_not_retried() {
        // Simulated by writing a destination collision under `fail` policy; the point
        // under test is that DestinationExists (also non-retryable) surfaces on the
        // first attempt rather than looping through the retry budget.
        let (dir, history) = setup();
        let afs = Afs::new(&history, dir.path().join("trash"));
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        fs::write(&src, b"one").unwrap();
        fs::write(&dst, b"two").unwrap();

        let mut opts = MoveOptions::default();
        opts.overwrite_policy = OverwritePolicy::Fail;
        let result = afs.atomic_move(&src, &dst, &opts);
        assert!(matches!(result, Err(SubstrateError::DestinationExists { .. })));
        assert!(src.exists(), "source must survive a failed move");
    }

    #[test]
    fn overwrite_backup_policy_preserves_previous_destination() {
        let (dir, history) = setup();
        let afs = Afs::new(&history, dir.path().join("trash"));
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();

        afs.atomic_move(&src, &dst, &MoveOptions::default()).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");

        let trashed: Vec<_> = fs::read_dir(dir.path().join("trash")).unwrap().flatten().collect();
        assert_eq!(trashed.len(), 1);
    }

    #[test]
    fn atomic_write_creates_new_file() {
        let (dir, history) = setup();
        let afs = Afs::new(&history, dir.path().join("trash"));
        let path = dir.path().join("new.txt");

        let result = afs.atomic_write(&path, b"payload", &MoveOptions::default()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert_eq!(result.bytes_copied, 7);
    }

    #[test]
    fn safe_delete_moves_to_trash_not_unlink() {
        let (dir, history) = setup();
        let afs = Afs::new(&history, dir.path().join("trash"));
        let path = dir.path().join("gone.txt");
        fs::write(&path, b"bye").unwrap();

        afs.safe_delete(&path, &MoveOptions::default()).unwrap();
        assert!(!path.exists());
        let trashed: Vec<_> = fs::read_dir(dir.path().join("trash")).unwrap().flatten().collect();
        assert_eq!(trashed.len(), 1);
    }
}
