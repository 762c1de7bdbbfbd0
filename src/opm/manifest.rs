//! OPM manifest: the per-run record of every operation an organizer performed,
//! rewritten atomically after each one so a crash mid-run leaves a readable,
//! `in_progress` manifest instead of a torn file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubstrateError};
use crate::history::{HistoryLog, Operation, OperationId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub created: String,
    pub total_operations: u64,
    pub operations: Vec<Operation>,
    pub configuration: std::collections::BTreeMap<String, String>,
    pub stats: std::collections::BTreeMap<String, u64>,
    pub in_progress: bool,
}

impl Manifest {
    #[must_use]
    pub fn new(configuration: std::collections::BTreeMap<String, String>) -> Self {
        Self {
            created: chrono::Utc::now().to_rfc3339(),
            total_operations: 0,
            operations: Vec::new(),
            configuration,
            stats: std::collections::BTreeMap::new(),
            in_progress: true,
        }
    }

    pub fn push(&mut self, op: Operation) {
        *self.stats.entry(format!("{:?}", op.kind)).or_insert(0) += 1;
        self.operations.push(op);
        self.total_operations = self.operations.len() as u64;
    }

    pub fn finish(&mut self) {
        self.in_progress = false;
    }
}

/// Atomically rewrite `path` with the manifest's current state. Called after every
/// operation during a run, so the manifest on disk never lags more than one
/// operation behind reality.
pub fn save(path: &Path, manifest: &Manifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| SubstrateError::PermissionDenied { path: parent.to_path_buf(), source })?;
    }
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(manifest)
        .map_err(|e| SubstrateError::Internal { detail: e.to_string() })?;
    fs::write(&tmp, text).map_err(|source| SubstrateError::PermissionDenied { path: tmp.clone(), source })?;
    fs::rename(&tmp, path).map_err(|source| SubstrateError::PermissionDenied { path: path.to_path_buf(), source })
}

pub fn load(path: &Path) -> Result<Manifest> {
    let text = fs::read_to_string(path)
        .map_err(|source| SubstrateError::PermissionDenied { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text).map_err(|e| SubstrateError::HistoryCorrupt { detail: format!("manifest: {e}") })
}

/// Reverse every operation in the manifest in LIFO order via the history's own undo
/// path, returning the restored `op_id`s in the order they were undone.
pub fn undo_manifest(path: &Path, history: &HistoryLog) -> Result<Vec<OperationId>> {
    let manifest = load(path)?;
    let mut restored = Vec::new();
    for op in manifest.operations.iter().rev() {
        if !op.can_undo {
            continue;
        }
        let result = history.undo(&op.op_id)?;
        restored.push(result.restored_op_id);
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ContentHash, FileRef, HashSentinel, Kind, OperationDraft};
    use tempfile::TempDir;

    fn sample_op(dir: &Path) -> Operation {
        HistoryLog::open(dir)
            .unwrap()
            .record(OperationDraft::new(Kind::OrganizerMove, "opm", FileRef::for_path(Path::new("a.txt"))))
            .unwrap()
    }

    #[test]
    fn save_then_load_roundtrips_in_progress_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = Manifest::new(std::collections::BTreeMap::new());
        manifest.push(sample_op(&dir.path().join("hist")));
        save(&path, &manifest).unwrap();

        let loaded = load(&path).unwrap();
        assert!(loaded.in_progress);
        assert_eq!(loaded.total_operations, 1);
    }

    #[test]
    fn finish_clears_in_progress() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = Manifest::new(std::collections::BTreeMap::new());
        manifest.finish();
        save(&path, &manifest).unwrap();
        assert!(!load(&path).unwrap().in_progress);
    }

    #[test]
    fn undo_manifest_skips_non_undoable_operations() {
        let dir = TempDir::new().unwrap();
        let history = HistoryLog::open(&dir.path().join("hist")).unwrap();
        let mut manifest = Manifest::new(std::collections::BTreeMap::new());
        let op = history
            .record(OperationDraft {
                new_hash: ContentHash::Sentinel(HashSentinel::NewFile),
                ..OperationDraft::new(Kind::OrganizerMove, "opm", FileRef::for_path(Path::new("a.txt")))
            })
            .unwrap();
        manifest.push(op);
        let path = dir.path().join("manifest.json");
        save(&path, &manifest).unwrap();

        let restored = undo_manifest(&path, &history).unwrap();
        assert!(restored.is_empty());
    }
}
