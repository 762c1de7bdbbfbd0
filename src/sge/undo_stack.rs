//! SGE's bounded undo stack: mirrors the TOH journal's contract for git-level
//! operations, with its own owned artifacts (stash refs / archives).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubstrateError};
use crate::sge::classifier::DangerClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoStackEntry {
    pub id: String,
    pub ts: String,
    pub git_command: String,
    pub danger_class: String,
    pub metadata: std::collections::BTreeMap<String, String>,
    pub backup_refs: Vec<String>,
    pub recovery_script: Option<PathBuf>,
    pub recovery_hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StackFile {
    entries: Vec<UndoStackEntry>,
}

pub struct UndoStack {
    path: PathBuf,
    depth: usize,
}

impl UndoStack {
    #[must_use]
    pub fn new(root: &Path, depth: usize) -> Self {
        Self { path: root.join("sge_undo_stack.json"), depth }
    }

    fn load(&self) -> Result<StackFile> {
        if !self.path.exists() {
            return Ok(StackFile::default());
        }
        let text = std::fs::read_to_string(&self.path)
            .map_err(|source| SubstrateError::PermissionDenied { path: self.path.clone(), source })?;
        serde_json::from_str(&text)
            .map_err(|e| SubstrateError::HistoryCorrupt { detail: format!("undo stack: {e}") })
    }

    fn save(&self, stack: &StackFile) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(stack).map_err(|e| SubstrateError::Internal { detail: e.to_string() })?;
        std::fs::write(&tmp, text).map_err(|source| SubstrateError::PermissionDenied { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|source| SubstrateError::PermissionDenied { path: self.path.clone(), source })
    }

    /// Push a new entry, evicting and removing the owned artifacts of the oldest
    /// entry if the stack is now over its configured depth (default 50).
    pub fn push(
        &self,
        git_command: String,
        danger_class: DangerClass,
        backup_refs: Vec<String>,
        recovery_script: Option<PathBuf>,
        recovery_hints: Vec<String>,
    ) -> Result<UndoStackEntry> {
        let entry = UndoStackEntry {
            id: uuid::Uuid::new_v4().to_string(),
            ts: chrono::Utc::now().to_rfc3339(),
            git_command,
            danger_class: format!("{danger_class:?}"),
            metadata: std::collections::BTreeMap::new(),
            backup_refs,
            recovery_script,
            recovery_hints,
        };

        let mut stack = self.load()?;
        stack.entries.push(entry.clone());
        while stack.entries.len() > self.depth {
            let evicted = stack.entries.remove(0);
            self.remove_artifacts(&evicted);
        }
        self.save(&stack)?;
        Ok(entry)
    }

    fn remove_artifacts(&self, entry: &UndoStackEntry) {
        for backup in &entry.backup_refs {
            let path = Path::new(backup);
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
        if let Some(script) = &entry.recovery_script {
            let _ = std::fs::remove_file(script);
        }
    }

    #[must_use]
    pub fn entries(&self) -> Vec<UndoStackEntry> {
        self.load().map(|s| s.entries).unwrap_or_default()
    }

    pub fn pop_latest(&self) -> Result<Option<UndoStackEntry>> {
        let mut stack = self.load()?;
        let entry = stack.entries.pop();
        self.save(&stack)?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn push_beyond_depth_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let stack = UndoStack::new(dir.path(), 2);
        stack.push("reset --hard".into(), DangerClass::ReversibleDestructive, vec![], None, vec![]).unwrap();
        stack.push("checkout -f".into(), DangerClass::ReversibleDestructive, vec![], None, vec![]).unwrap();
        stack.push("stash clear".into(), DangerClass::ReversibleDestructive, vec![], None, vec![]).unwrap();

        let entries = stack.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].git_command, "checkout -f");
        assert_eq!(entries[1].git_command, "stash clear");
    }

    #[test]
    fn eviction_removes_owned_backup_files() {
        let dir = TempDir::new().unwrap();
        let backup = dir.path().join("backup1");
        std::fs::write(&backup, b"x").unwrap();
        let stack = UndoStack::new(dir.path(), 1);

        stack
            .push("reset --hard".into(), DangerClass::ReversibleDestructive, vec![backup.display().to_string()], None, vec![])
            .unwrap();
        stack.push("checkout -f".into(), DangerClass::ReversibleDestructive, vec![], None, vec![]).unwrap();

        assert!(!backup.exists());
    }
}
