//! Append-only operation journal (`operations.jsonl`), one JSON object per line.
//!
//! Appends and retention rewrites are gated by an exclusive lock; reads take a shared
//! lock. A fresh file's first line is `{"schema":"toh/1"}`; incompatible readers must
//! refuse to mutate (this implementation is the only writer, so it simply checks the
//! marker on open).

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::backup::BackupStore;
use crate::checksum;
use crate::error::{Result, SubstrateError};
use crate::path_lock;

use super::recovery;
use super::types::{
    ContentHash, FileRef, HashSentinel, Kind, Operation, OperationDraft, OperationId, OpStatus, Statistics,
};

const SCHEMA_LINE: &str = r#"{"schema":"toh/1"}"#;
const HISTORY_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HistoryLog {
    root: PathBuf,
    journal_path: PathBuf,
    backups: BackupStore,
}

/// Result of `HistoryLog::undo`.
#[derive(Debug, Clone)]
pub struct UndoResult {
    pub restored_op_id: OperationId,
    pub undo_op_id: OperationId,
}

/// Filter accepted by `query`.
#[derive(Debug, Default, Clone)]
pub struct QueryFilter {
    pub file: Option<PathBuf>,
    pub tool: Option<String>,
    pub kind: Option<Kind>,
    pub since: Option<SystemTime>,
}

impl HistoryLog {
    /// Open (creating if absent) the journal rooted at `root`. Sweeps orphaned
    /// backups — those with no corresponding journal line — on every open, per the
    /// documented crash-recovery policy.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|source| SubstrateError::PermissionDenied {
            path: root.to_path_buf(),
            source,
        })?;
        let journal_path = root.join("operations.jsonl");
        if !journal_path.exists() {
            fs::write(&journal_path, format!("{SCHEMA_LINE}\n"))
                .map_err(|source| SubstrateError::PermissionDenied { path: journal_path.clone(), source })?;
        }
        let backups = BackupStore::new(root.to_path_buf());
        let log = Self { root: root.to_path_buf(), journal_path, backups };
        log.sweep_orphaned_backups()?;
        Ok(log)
    }

    #[must_use]
    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    fn sweep_orphaned_backups(&self) -> Result<()> {
        let known_ops: std::collections::HashSet<String> =
            self.read_all()?.into_iter().map(|op| op.op_id.as_str().to_string()).collect();
        self.backups.purge(|op_id| !known_ops.contains(op_id))?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<Operation>> {
        let _guard = path_lock::acquire_shared(&self.journal_path, HISTORY_LOCK_TIMEOUT)?;
        let file = File::open(&self.journal_path)
            .map_err(|source| SubstrateError::PermissionDenied { path: self.journal_path.clone(), source })?;
        let reader = BufReader::new(file);
        let mut ops = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line
                .map_err(|source| SubstrateError::PermissionDenied { path: self.journal_path.clone(), source })?;
            if idx == 0 || line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Operation>(&line) {
                Ok(op) => ops.push(op),
                Err(_) => continue, // HistoryCorrupt for this one record only; skip, don't abort.
            }
        }
        Ok(ops)
    }

    /// Record a new operation: acquire the exclusive history lock, synthesize an
    /// `op_id`, write the line, fsync, release.
    pub fn record(&self, draft: OperationDraft) -> Result<Operation> {
        let op_id = OperationId::new();
        let op = Operation {
            op_id: op_id.clone(),
            ts: now_iso8601(),
            kind: draft.kind,
            tool: draft.tool,
            args: draft.args,
            file: draft.file,
            old_hash: draft.old_hash,
            new_hash: draft.new_hash,
            lines_affected: draft.lines_affected,
            changes_count: draft.changes_count,
            backup_ref: None,
            compressed: false,
            user: current_user(),
            cwd: std::env::current_dir().unwrap_or_default(),
            description: draft.description,
            can_undo: false,
            deps: draft.deps,
            status: Some(OpStatus::Completed),
        };
        self.append(&op)?;
        Ok(op)
    }

    /// Record an operation alongside a just-taken backup, marking it undoable and
    /// emitting its recovery script. This is the path used by AFS/OPM for any
    /// mutation that overwrote or removed existing bytes.
    pub fn record_with_backup(&self, mut draft: OperationDraft, source_before_mutation: &Path) -> Result<Operation> {
        let op_id = OperationId::new();
        let backup_ref = self.backups.put(op_id.as_str(), source_before_mutation, 1024).map_err(|e| {
            SubstrateError::BackupFailed { op_id: op_id.to_string(), source: e.to_string() }
        })?;
        draft.old_hash =
            ContentHash::from(checksum::hash_file(source_before_mutation).unwrap_or(checksum::Digest(String::new())));

        let op = Operation {
            op_id: op_id.clone(),
            ts: now_iso8601(),
            kind: draft.kind,
            tool: draft.tool,
            args: draft.args,
            file: draft.file,
            old_hash: draft.old_hash,
            new_hash: draft.new_hash,
            lines_affected: draft.lines_affected,
            changes_count: draft.changes_count,
            backup_ref: Some(backup_ref.path.display().to_string()),
            compressed: backup_ref.compressed,
            user: current_user(),
            cwd: std::env::current_dir().unwrap_or_default(),
            description: draft.description,
            can_undo: true,
            deps: draft.deps,
            status: Some(OpStatus::Completed),
        };
        self.append(&op)?;
        recovery::emit(&self.root, &op, &backup_ref)?;
        Ok(op)
    }

    /// Record a relocation (`OrganizerMove`) that did not overwrite anything at its
    /// destination. There is nothing for the Backup Store to hold — the moved file
    /// is still intact at its new path — so reversal is positional (move it back to
    /// `draft.args[0]`) rather than byte-restore. `undo` branches on `kind` to tell
    /// the two reversal strategies apart.
    pub fn record_relocatable(&self, draft: OperationDraft) -> Result<Operation> {
        let op_id = OperationId::new();
        let op = Operation {
            op_id: op_id.clone(),
            ts: now_iso8601(),
            kind: draft.kind,
            tool: draft.tool,
            args: draft.args,
            file: draft.file,
            old_hash: draft.old_hash,
            new_hash: draft.new_hash,
            lines_affected: draft.lines_affected,
            changes_count: draft.changes_count,
            backup_ref: None,
            compressed: false,
            user: current_user(),
            cwd: std::env::current_dir().unwrap_or_default(),
            description: draft.description,
            can_undo: true,
            deps: draft.deps,
            status: Some(OpStatus::Completed),
        };
        self.append(&op)?;
        Ok(op)
    }

    fn append(&self, op: &Operation) -> Result<()> {
        let _guard = path_lock::acquire_exclusive(&self.journal_path, HISTORY_LOCK_TIMEOUT)?;
        let line = serde_json::to_string(op)
            .map_err(|e| SubstrateError::Internal { detail: format!("failed to serialize operation: {e}") })?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.journal_path)
            .map_err(|source| SubstrateError::PermissionDenied { path: self.journal_path.clone(), source })?;
        writeln!(file, "{line}")
            .map_err(|source| SubstrateError::PermissionDenied { path: self.journal_path.clone(), source })?;
        file.sync_all().map_err(|source| SubstrateError::PermissionDenied { path: self.journal_path.clone(), source })
    }

    /// Stream records matching `filter`.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<Operation>> {
        let ops = self.read_all()?;
        Ok(ops
            .into_iter()
            .filter(|op| filter.file.as_ref().is_none_or(|f| op.file.path == *f))
            .filter(|op| filter.tool.as_ref().is_none_or(|t| &op.tool == t))
            .filter(|op| filter.kind.is_none_or(|k| op.kind == k))
            .collect())
    }

    /// Restore the file referenced by `op_id` from its backup, recording a new
    /// `Undo` operation for the restoration itself (the "pre-undo backup" of spec
    /// §4.5 is just this: undo is a normal recorded mutation of kind `Undo`).
    pub fn undo(&self, op_id: &OperationId) -> Result<UndoResult> {
        let ops = self.read_all()?;
        let target = ops
            .iter()
            .find(|op| &op.op_id == op_id)
            .ok_or_else(|| SubstrateError::UserError {
                message: format!("no such operation: {op_id}"),
                hint: crate::error::RecoveryHint::FreeText("run `history` to list known operation ids".into()),
            })?;

        if !target.can_undo {
            return Err(SubstrateError::UserError {
                message: format!("operation {op_id} is not undoable"),
                hint: crate::error::RecoveryHint::FreeText("this operation has no retained backup".into()),
            });
        }

        // `can_undo` with no `backup_ref` only ever comes from `record_relocatable` —
        // a pure positional move with nothing for the Backup Store to hold.
        if target.backup_ref.is_none() {
            return self.undo_relocation(op_id, target);
        }

        let backup_path = target.backup_ref.as_ref().ok_or_else(|| SubstrateError::HistoryCorrupt {
            detail: format!("operation {op_id} marked can_undo but has no backup_ref"),
        })?;

        let compressed = target.compressed;
        let backup_ref =
            crate::backup::BackupRef { op_id: op_id.to_string(), path: PathBuf::from(backup_path), compressed };
        let bytes = self.backups.get(&backup_ref)?;

        let current_digest = checksum::hash_file(&target.file.path).ok();
        let pre_undo_draft = OperationDraft {
            kind: Kind::Undo,
            tool: "history".into(),
            args: vec![op_id.to_string()],
            file: target.file.clone(),
            old_hash: current_digest.map(ContentHash::from).unwrap_or(ContentHash::Sentinel(HashSentinel::Error)),
            new_hash: target.old_hash.clone(),
            lines_affected: 0,
            changes_count: 1,
            description: format!("undo of {op_id}"),
            deps: vec![op_id.clone()],
        };

        // Snapshot the pre-undo bytes under the new `Undo` operation's own backup
        // before overwriting, so undoing an undo (a redo) is itself a normal,
        // backup-backed restore. A delete's undo has nothing to snapshot (the file
        // doesn't exist yet), so it falls back to the plain, non-reversible record.
        let recorded = if target.file.path.exists() {
            self.record_with_backup(pre_undo_draft, &target.file.path)?
        } else {
            self.record(pre_undo_draft)?
        };

        fs::write(&target.file.path, &bytes)
            .map_err(|source| SubstrateError::PermissionDenied { path: target.file.path.clone(), source })?;

        let restored_digest = checksum::hash_file(&target.file.path)?;
        if !target.old_hash.matches_digest(&restored_digest) {
            return Err(SubstrateError::HistoryCorrupt {
                detail: format!("post-restore hash mismatch for {op_id}"),
            });
        }

        Ok(UndoResult { restored_op_id: op_id.clone(), undo_op_id: recorded.op_id })
    }

    /// Reverse an `OrganizerMove` with no backup: move the file back from where it
    /// ended up (`target.file.path`) to where it came from (`target.args[0]`).
    fn undo_relocation(&self, op_id: &OperationId, target: &Operation) -> Result<UndoResult> {
        if !target.file.path.exists() {
            return Err(SubstrateError::NotFound { path: target.file.path.clone() });
        }
        let original = target.args.first().map(PathBuf::from).ok_or_else(|| SubstrateError::HistoryCorrupt {
            detail: format!("operation {op_id} is a relocation with no recorded source path"),
        })?;
        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| SubstrateError::PermissionDenied { path: parent.to_path_buf(), source })?;
        }
        fs::rename(&target.file.path, &original)
            .map_err(|source| SubstrateError::PermissionDenied { path: target.file.path.clone(), source })?;

        // `args[0]` records where the file was *before* this reversal, so undoing
        // this undo (a redo) moves it back there the same way `undo_relocation`
        // reverses any other relocation.
        let pre_undo_draft = OperationDraft {
            kind: Kind::Undo,
            tool: "history".into(),
            args: vec![target.file.path.display().to_string()],
            file: FileRef::for_path(&original),
            old_hash: target.new_hash.clone(),
            new_hash: target.old_hash.clone(),
            lines_affected: 0,
            changes_count: 1,
            description: format!("undo of {op_id} (relocation)"),
            deps: vec![op_id.clone()],
        };
        let recorded = self.record_relocatable(pre_undo_draft)?;
        Ok(UndoResult { restored_op_id: op_id.clone(), undo_op_id: recorded.op_id })
    }

    /// Counts by kind/tool, bytes on disk, undoable count.
    pub fn stats(&self) -> Result<Statistics> {
        let ops = self.read_all()?;
        let mut stats = Statistics::default();
        stats.total = ops.len() as u64;
        for op in &ops {
            *stats.by_kind.entry(format!("{:?}", op.kind)).or_insert(0) += 1;
            *stats.by_tool.entry(op.tool.clone()).or_insert(0) += 1;
            if op.can_undo {
                stats.undoable += 1;
            }
        }
        stats.bytes_on_disk = walk_dir_size(&self.backups.dir().to_path_buf());
        Ok(stats)
    }

    /// Drop records (and their backups) strictly older than `retention`, atomically
    /// rewriting the journal.
    pub fn retain_within(&self, now: SystemTime, retention: Duration) -> Result<()> {
        let _guard = path_lock::acquire_exclusive(&self.journal_path, HISTORY_LOCK_TIMEOUT)?;
        let ops = self.read_all()?;
        let cutoff_ops: Vec<_> = ops
            .into_iter()
            .filter(|op| parse_iso8601_age(&op.ts, now).map(|age| age <= retention).unwrap_or(true))
            .collect();

        let tmp_path = self.journal_path.with_extension("jsonl.tmp");
        {
            let mut tmp = File::create(&tmp_path)
                .map_err(|source| SubstrateError::PermissionDenied { path: tmp_path.clone(), source })?;
            writeln!(tmp, "{SCHEMA_LINE}")
                .map_err(|source| SubstrateError::PermissionDenied { path: tmp_path.clone(), source })?;
            for op in &cutoff_ops {
                let line = serde_json::to_string(op)
                    .map_err(|e| SubstrateError::Internal { detail: e.to_string() })?;
                writeln!(tmp, "{line}")
                    .map_err(|source| SubstrateError::PermissionDenied { path: tmp_path.clone(), source })?;
            }
            tmp.sync_all().map_err(|source| SubstrateError::PermissionDenied { path: tmp_path.clone(), source })?;
        }
        fs::rename(&tmp_path, &self.journal_path)
            .map_err(|source| SubstrateError::PermissionDenied { path: self.journal_path.clone(), source })?;

        let kept: std::collections::HashSet<String> =
            cutoff_ops.iter().map(|op| op.op_id.as_str().to_string()).collect();
        self.backups.purge(|op_id| !kept.contains(op_id))?;
        Ok(())
    }
}

fn walk_dir_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else { return 0 };
    entries.flatten().filter_map(|e| e.metadata().ok()).map(|m| m.len()).sum()
}

fn parse_iso8601_age(ts: &str, now: SystemTime) -> Option<Duration> {
    let then = chrono::DateTime::parse_from_rfc3339(ts).ok()?;
    let now_epoch_s = now.duration_since(std::time::UNIX_EPOCH).ok()?.as_secs() as i64;
    let age_s = now_epoch_s - then.timestamp();
    Some(Duration::from_secs(age_s.max(0) as u64))
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn current_user() -> String {
    std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "unknown".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::types::FileRef;
    use tempfile::TempDir;

    fn draft_for(path: &Path) -> OperationDraft {
        OperationDraft::new(Kind::WriteFile, "test", FileRef::for_path(path))
    }

    #[test]
    fn record_and_query_roundtrip() {
        let dir = TempDir::new().unwrap();
        let log = HistoryLog::open(dir.path()).unwrap();
        let target = dir.path().join("a.txt");
        fs::write(&target, b"hello\n").unwrap();

        let op = log.record(draft_for(&target)).unwrap();
        let found = log.query(&QueryFilter::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].op_id, op.op_id);
    }

    #[test]
    fn undo_restores_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let log = HistoryLog::open(dir.path()).unwrap();
        let target = dir.path().join("t.txt");
        fs::write(&target, b"Version 1.0\n").unwrap();

        let mut draft = draft_for(&target);
        draft.new_hash = ContentHash::from(checksum::hash_file(&target).unwrap());
        let op = log.record_with_backup(draft, &target).unwrap();

        fs::write(&target, b"Version 2.0\n").unwrap();

        let result = log.undo(&op.op_id).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"Version 1.0\n");
        assert_ne!(result.undo_op_id, op.op_id);
    }

    #[test]
    fn stats_counts_undoable() {
        let dir = TempDir::new().unwrap();
        let log = HistoryLog::open(dir.path()).unwrap();
        let target = dir.path().join("a.txt");
        fs::write(&target, b"x").unwrap();
        log.record_with_backup(draft_for(&target), &target).unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.undoable, 1);
    }
}
