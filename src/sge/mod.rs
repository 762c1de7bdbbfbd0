//! Safe Git Engine: classifies git invocations by danger class and applies the
//! corresponding guard policy (pass through, backup-and-record, convert-unless-
//! confirmed, typed-phrase confirmation, or outright block) before delegating to the
//! real `git` binary.

pub mod classifier;
pub mod context;
pub mod interposer;
pub mod undo_stack;

pub use classifier::{classify, context_forbids, DangerClass, Policy};
pub use context::Context;
pub use interposer::{explain, run, RunOutcome};
pub use undo_stack::{UndoStack, UndoStackEntry};
