//! Closed error-kind taxonomy shared by every engine (AFS, TOH, SGE, OPM).
//!
//! Every surfaced error carries a [`RecoveryHint`] so CLI output and programmatic
//! callers see the same actionable text.

use std::fmt;
use std::path::PathBuf;

/// A short, structured suggestion attached to an error.
///
/// `Flag` is for "pass this CLI flag"; `FreeText` is for anything else
/// ("acquire the lock from pid N").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryHint {
    Flag(&'static str),
    FreeText(String),
}

impl fmt::Display for RecoveryHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryHint::Flag(flag) => write!(f, "try {flag}"),
            RecoveryHint::FreeText(text) => write!(f, "{text}"),
        }
    }
}

/// The closed set of error kinds.
#[derive(Debug)]
pub enum SubstrateError {
    UserError { message: String, hint: RecoveryHint },
    NotFound { path: PathBuf },
    PermissionDenied { path: PathBuf, source: std::io::Error },
    LockedSource { path: PathBuf, held_by: Option<String> },
    LockedDestination { path: PathBuf },
    LockedDuringHash { path: PathBuf },
    DestinationExists { path: PathBuf },
    ChecksumMismatch { path: PathBuf, expected: String, actual: String },
    ShortWrite { path: PathBuf, expected: u64, actual: u64 },
    Timeout { operation: String, timeout_s: u64 },
    ContextForbidden { command: String, reason: String },
    ConfirmationRequired { phrase: &'static str },
    DependencyMissing { name: &'static str },
    HistoryCorrupt { detail: String },
    BackupFailed { op_id: String, source: String },
    Cancelled,
    Internal { detail: String },
}

impl SubstrateError {
    /// The recovery hint shown alongside the human message.
    #[must_use]
    pub fn hint(&self) -> RecoveryHint {
        match self {
            SubstrateError::UserError { hint, .. } => hint.clone(),
            SubstrateError::NotFound { path } => {
                RecoveryHint::FreeText(format!("check that {} exists", path.display()))
            }
            SubstrateError::PermissionDenied { path, .. } => {
                RecoveryHint::FreeText(format!("check permissions on {}", path.display()))
            }
            SubstrateError::LockedSource { held_by: Some(pid), .. } => {
                RecoveryHint::FreeText(format!("acquire the lock from pid {pid}"))
            }
            SubstrateError::LockedSource { .. } | SubstrateError::LockedDestination { .. } => {
                RecoveryHint::FreeText("wait for the other process to finish, or raise --timeout".into())
            }
            SubstrateError::LockedDuringHash { .. } => RecoveryHint::Flag("--max-retries 6"),
            SubstrateError::DestinationExists { .. } => RecoveryHint::Flag("--overwrite-policy backup"),
            SubstrateError::ChecksumMismatch { .. } => {
                RecoveryHint::FreeText("source changed during the copy; retry the operation".into())
            }
            SubstrateError::ShortWrite { .. } => {
                RecoveryHint::FreeText("check available disk space on the destination".into())
            }
            SubstrateError::Timeout { .. } => RecoveryHint::Flag("--timeout 60"),
            SubstrateError::ContextForbidden { .. } => RecoveryHint::FreeText(
                "set context mode to normal, or run from a non-production environment".into(),
            ),
            SubstrateError::ConfirmationRequired { phrase } => RecoveryHint::FreeText(format!(
                "type the exact phrase `{phrase}`, or pass --force-yes with it"
            )),
            SubstrateError::DependencyMissing { name } => {
                RecoveryHint::FreeText(format!("install {name} and ensure it is on PATH"))
            }
            SubstrateError::HistoryCorrupt { .. } => RecoveryHint::FreeText(
                "inspect operations.jsonl manually; the record is skipped, not repaired".into(),
            ),
            SubstrateError::BackupFailed { .. } => {
                RecoveryHint::FreeText("check disk space and permissions on the backup store".into())
            }
            SubstrateError::Cancelled => RecoveryHint::FreeText("operation was cancelled cleanly".into()),
            SubstrateError::Internal { .. } => {
                RecoveryHint::FreeText("this is a bug; please file a report".into())
            }
        }
    }

    /// The error-kind name, used for the grep-able structured line.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SubstrateError::UserError { .. } => "UserError",
            SubstrateError::NotFound { .. } => "NotFound",
            SubstrateError::PermissionDenied { .. } => "PermissionDenied",
            SubstrateError::LockedSource { .. } => "LockedSource",
            SubstrateError::LockedDestination { .. } => "LockedDestination",
            SubstrateError::LockedDuringHash { .. } => "LockedDuringHash",
            SubstrateError::DestinationExists { .. } => "DestinationExists",
            SubstrateError::ChecksumMismatch { .. } => "ChecksumMismatch",
            SubstrateError::ShortWrite { .. } => "ShortWrite",
            SubstrateError::Timeout { .. } => "Timeout",
            SubstrateError::ContextForbidden { .. } => "ContextForbidden",
            SubstrateError::ConfirmationRequired { .. } => "ConfirmationRequired",
            SubstrateError::DependencyMissing { .. } => "DependencyMissing",
            SubstrateError::HistoryCorrupt { .. } => "HistoryCorrupt",
            SubstrateError::BackupFailed { .. } => "BackupFailed",
            SubstrateError::Cancelled => "Cancelled",
            SubstrateError::Internal { .. } => "Internal",
        }
    }

    /// Whether the substrate's own retry loops should retry this error.
    ///
    /// Transient locking/IO errors retry; checksum, short-write, and corruption
    /// errors never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubstrateError::LockedSource { .. }
                | SubstrateError::LockedDestination { .. }
                | SubstrateError::LockedDuringHash { .. }
                | SubstrateError::Timeout { .. }
        )
    }

    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            SubstrateError::UserError { .. } => 1,
            SubstrateError::DependencyMissing { .. } => 2,
            SubstrateError::LockedSource { .. }
            | SubstrateError::LockedDestination { .. }
            | SubstrateError::DestinationExists { .. } => 3,
            SubstrateError::ChecksumMismatch { .. } => 4,
            SubstrateError::ContextForbidden { .. } => 5,
            SubstrateError::Timeout { .. } | SubstrateError::LockedDuringHash { .. } => 6,
            SubstrateError::Cancelled => 130,
            _ => 1,
        }
    }
}

impl fmt::Display for SubstrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            SubstrateError::UserError { message, .. } => message.clone(),
            SubstrateError::NotFound { path } => format!("not found: {}", path.display()),
            SubstrateError::PermissionDenied { path, source } => {
                format!("permission denied on {}: {source}", path.display())
            }
            SubstrateError::LockedSource { path, .. } => format!("source is locked: {}", path.display()),
            SubstrateError::LockedDestination { path } => {
                format!("destination is locked: {}", path.display())
            }
            SubstrateError::LockedDuringHash { path } => {
                format!("lock contention while hashing: {}", path.display())
            }
            SubstrateError::DestinationExists { path } => {
                format!("destination already exists: {}", path.display())
            }
            SubstrateError::ChecksumMismatch { path, expected, actual } => format!(
                "checksum mismatch on {}: expected {expected}, got {actual}",
                path.display()
            ),
            SubstrateError::ShortWrite { path, expected, actual } => format!(
                "short write on {}: expected {expected} bytes, wrote {actual}",
                path.display()
            ),
            SubstrateError::Timeout { operation, timeout_s } => {
                format!("{operation} timed out after {timeout_s}s")
            }
            SubstrateError::ContextForbidden { command, reason } => {
                format!("'{command}' is forbidden by the current context: {reason}")
            }
            SubstrateError::ConfirmationRequired { phrase } => {
                format!("this operation requires typed confirmation: `{phrase}`")
            }
            SubstrateError::DependencyMissing { name } => format!("required dependency missing: {name}"),
            SubstrateError::HistoryCorrupt { detail } => format!("history log corrupt: {detail}"),
            SubstrateError::BackupFailed { op_id, source } => {
                format!("backup failed for operation {op_id}: {source}")
            }
            SubstrateError::Cancelled => "operation cancelled".to_string(),
            SubstrateError::Internal { detail } => format!("internal error: {detail}"),
        };
        write!(f, "[{}] {message} (hint: {})", self.kind(), self.hint())
    }
}

impl std::error::Error for SubstrateError {}

pub type Result<T> = std::result::Result<T, SubstrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(SubstrateError::ChecksumMismatch {
            path: "x".into(),
            expected: "a".into(),
            actual: "b".into()
        }.exit_code(), 4);
        assert_eq!(
            SubstrateError::ContextForbidden { command: "x".into(), reason: "y".into() }.exit_code(),
            5
        );
        assert_eq!(SubstrateError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn retry_policy_excludes_checksum_mismatch() {
        let err = SubstrateError::ChecksumMismatch {
            path: "x".into(),
            expected: "a".into(),
            actual: "b".into(),
        };
        assert!(!err.is_retryable());
        let locked = SubstrateError::LockedSource { path: "x".into(), held_by: None };
        assert!(locked.is_retryable());
    }

    #[test]
    fn display_contains_kind_and_hint() {
        let err = SubstrateError::Timeout { operation: "move".into(), timeout_s: 30 };
        let text = err.to_string();
        assert!(text.contains("[Timeout]"));
        assert!(text.contains("--timeout 60"));
    }
}
