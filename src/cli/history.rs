//! `msubstrate history|undo|stats|clean` — TOH entry points.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use clap::Args;

use crate::error::Result;
use crate::history::{OperationId, QueryFilter};
use crate::substrate::Substrate;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[arg(long)]
    pub file: Option<PathBuf>,
    #[arg(long)]
    pub tool: Option<String>,
}

#[derive(Args, Debug)]
pub struct UndoArgs {
    /// The operation id to restore (as shown by `history`)
    pub op_id: String,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Override the configured retention window, in days
    #[arg(long)]
    pub retention_days: Option<u64>,
}

pub fn run_history(args: &HistoryArgs, substrate: &Substrate) -> Result<()> {
    let filter = QueryFilter { file: args.file.clone(), tool: args.tool.clone(), ..QueryFilter::default() };
    for op in substrate.history().query(&filter)? {
        println!("{} {:?} {} {}", op.op_id, op.kind, op.tool, op.file.path.display());
    }
    Ok(())
}

pub fn run_undo(args: &UndoArgs, substrate: &Substrate) -> Result<()> {
    let op_id = OperationId::try_from(args.op_id.clone()).map_err(|_| crate::error::SubstrateError::UserError {
        message: format!("not a valid operation id: {}", args.op_id),
        hint: crate::error::RecoveryHint::FreeText("run `history` to list known operation ids".into()),
    })?;
    let result = substrate.history().undo(&op_id)?;
    println!("restored {} via new operation {}", result.restored_op_id, result.undo_op_id);
    Ok(())
}

pub fn run_stats(substrate: &Substrate) -> Result<()> {
    let stats = substrate.history().stats()?;
    println!("total={} undoable={} bytes_on_disk={}", stats.total, stats.undoable, stats.bytes_on_disk);
    for (kind, count) in &stats.by_kind {
        println!("  {kind}: {count}");
    }
    Ok(())
}

pub fn run_clean(args: &CleanArgs, substrate: &Substrate) -> Result<()> {
    let days = args.retention_days.unwrap_or(substrate.config.history.retention_days);
    substrate.history().retain_within(SystemTime::now(), Duration::from_secs(days * 86_400))?;
    println!("retained operations within the last {days} days");
    Ok(())
}
