//! The Operation journal's data model.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::checksum::Digest;

static SEQ: AtomicU64 = AtomicU64::new(0);

/// `<ms_since_epoch>_<pid>_<seq>`, monotonic within one process, unique, never reused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(String);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        let ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let seq = SEQ.fetch_add(1, Ordering::SeqCst);
        Self(format!("{ms}_{}_{seq}", process::id()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for OperationId {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.split('_').count() == 3 { Ok(Self(value)) } else { Err(format!("malformed op_id: {value}")) }
    }
}

impl From<OperationId> for String {
    fn from(value: OperationId) -> Self {
        value.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Absolute, canonicalized path plus device/inode pair at record time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: PathBuf,
    pub device: u64,
    pub inode: u64,
}

impl FileRef {
    /// Build a `FileRef` for an existing file. Device/inode are best-effort zero on
    /// platforms without the metadata (tests never depend on the actual values).
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if let Ok(meta) = std::fs::metadata(path) {
                return Self { path: path.to_path_buf(), device: meta.dev(), inode: meta.ino() };
            }
        }
        Self { path: path.to_path_buf(), device: 0, inode: 0 }
    }
}

/// SHA-256 of file bytes, or a sentinel for create/delete/hash-failure cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentHash {
    Digest(String),
    Sentinel(HashSentinel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashSentinel {
    #[serde(rename = "NEW_FILE")]
    NewFile,
    #[serde(rename = "DELETED")]
    Deleted,
    #[serde(rename = "ERROR")]
    Error,
}

impl From<Digest> for ContentHash {
    fn from(digest: Digest) -> Self {
        ContentHash::Digest(digest.0)
    }
}

impl ContentHash {
    #[must_use]
    pub fn matches_digest(&self, digest: &Digest) -> bool {
        matches!(self, ContentHash::Digest(d) if d == digest.as_str())
    }
}

/// The closed set of operation kinds this substrate records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    ReplaceText,
    ReplaceAst,
    UnifiedRefactor,
    MultiEdit,
    WriteFile,
    DeleteFile,
    GitReset,
    GitClean,
    GitForcePush,
    GitStashClear,
    GitRebase,
    GitBranchDelete,
    OrganizerMove,
    Undo,
}

/// Status recorded alongside a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Completed,
    RolledBack,
    Cancelled,
}

/// One line of the append-only journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: OperationId,
    pub ts: String,
    pub kind: Kind,
    pub tool: String,
    pub args: Vec<String>,
    pub file: FileRef,
    pub old_hash: ContentHash,
    pub new_hash: ContentHash,
    pub lines_affected: u64,
    pub changes_count: u64,
    pub backup_ref: Option<String>,
    pub compressed: bool,
    pub user: String,
    pub cwd: PathBuf,
    pub description: String,
    pub can_undo: bool,
    pub deps: Vec<OperationId>,
    #[serde(default)]
    pub status: Option<OpStatus>,
}

/// The pre-assignment form a client builds before calling `HistoryLog::record`.
#[derive(Debug, Clone)]
pub struct OperationDraft {
    pub kind: Kind,
    pub tool: String,
    pub args: Vec<String>,
    pub file: FileRef,
    pub old_hash: ContentHash,
    pub new_hash: ContentHash,
    pub lines_affected: u64,
    pub changes_count: u64,
    pub description: String,
    pub deps: Vec<OperationId>,
}

impl OperationDraft {
    #[must_use]
    pub fn new(kind: Kind, tool: impl Into<String>, file: FileRef) -> Self {
        Self {
            kind,
            tool: tool.into(),
            args: Vec::new(),
            file,
            old_hash: ContentHash::Sentinel(HashSentinel::NewFile),
            new_hash: ContentHash::Sentinel(HashSentinel::NewFile),
            lines_affected: 0,
            changes_count: 0,
            description: String::new(),
            deps: Vec::new(),
        }
    }
}

/// Retry policy shared by AFS, OPM, and the checksum hash retry loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_s: f64,
    pub backoff_exponent: f64,
    pub timeout_s: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, retry_delay_s: 0.5, backoff_exponent: 2.0, timeout_s: 30 }
    }
}

/// `HistoryLog::stats()` return value.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Statistics {
    pub total: u64,
    pub by_kind: std::collections::BTreeMap<String, u64>,
    pub by_tool: std::collections::BTreeMap<String, u64>,
    pub bytes_on_disk: u64,
    pub undoable: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_are_unique_and_monotonic() {
        let a = OperationId::new();
        let b = OperationId::new();
        assert_ne!(a, b);
        assert!(a < b || a.as_str() != b.as_str());
    }

    #[test]
    fn operation_id_round_trips_through_string() {
        let id = OperationId::new();
        let s: String = id.clone().into();
        let back = OperationId::try_from(s).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn malformed_operation_id_is_rejected() {
        assert!(OperationId::try_from("not-an-id".to_string()).is_err());
    }
}
