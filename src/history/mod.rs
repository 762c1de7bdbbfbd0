//! Text Operation History (TOH): append-only journal, backups, recovery scripts.

pub mod log;
pub mod recovery;
pub mod types;

pub use log::{HistoryLog, QueryFilter, UndoResult};
pub use types::{
    ContentHash, FileRef, HashSentinel, Kind, Operation, OperationDraft, OperationId, OpStatus, RetryPolicy,
    Statistics,
};
