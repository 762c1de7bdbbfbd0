//! `msubstrate move|copy|write|rm` — direct AFS entry points.

use std::path::PathBuf;

use clap::Args;

use crate::afs::{MoveOptions, OverwritePolicy};
use crate::error::Result;
use crate::substrate::Substrate;

#[derive(Args, Debug)]
pub struct MoveArgs {
    pub src: PathBuf,
    pub dst: PathBuf,

    /// What to do if the destination already exists
    #[arg(long, default_value = "backup")]
    pub overwrite_policy: String,

    /// Skip the SHA-256 verification pass
    #[arg(long)]
    pub no_verify_checksum: bool,

    /// Override the configured retry budget
    #[arg(long)]
    pub max_retries: Option<u32>,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    pub path: PathBuf,

    /// Read the new content from this file instead of stdin
    #[arg(long)]
    pub from_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RmArgs {
    pub path: PathBuf,
}

fn move_opts(substrate: &Substrate, args: &MoveArgs) -> MoveOptions {
    let mut opts = MoveOptions::from(&substrate.config.afs);
    opts.overwrite_policy = OverwritePolicy::parse(&args.overwrite_policy);
    if args.no_verify_checksum {
        opts.verify_checksum = false;
    }
    if let Some(max_retries) = args.max_retries {
        opts.retry.max_retries = max_retries;
    }
    opts
}

pub fn run_move(args: &MoveArgs, substrate: &Substrate) -> Result<()> {
    let opts = move_opts(substrate, args);
    let result = substrate.afs().atomic_move(&args.src, &args.dst, &opts)?;
    println!("moved: op_id={} bytes={} undoable={}", result.op_id, result.bytes_copied, result.can_undo);
    Ok(())
}

pub fn run_copy(args: &MoveArgs, substrate: &Substrate) -> Result<()> {
    let opts = move_opts(substrate, args);
    let result = substrate.afs().atomic_copy(&args.src, &args.dst, &opts)?;
    println!("copied: op_id={} bytes={} undoable={}", result.op_id, result.bytes_copied, result.can_undo);
    Ok(())
}

pub fn run_write(args: &WriteArgs, substrate: &Substrate) -> Result<()> {
    let bytes = match &args.from_file {
        Some(path) => std::fs::read(path)
            .map_err(|source| crate::error::SubstrateError::PermissionDenied { path: path.clone(), source })?,
        None => {
            use std::io::Read;
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .map_err(|source| crate::error::SubstrateError::PermissionDenied { path: args.path.clone(), source })?;
            buf
        }
    };
    let opts = MoveOptions::from(&substrate.config.afs);
    let result = substrate.afs().atomic_write(&args.path, &bytes, &opts)?;
    println!("wrote: op_id={} bytes={}", result.op_id, result.bytes_copied);
    Ok(())
}

pub fn run_rm(args: &RmArgs, substrate: &Substrate) -> Result<()> {
    let opts = MoveOptions::from(&substrate.config.afs);
    let result = substrate.afs().safe_delete(&args.path, &opts)?;
    println!("removed: op_id={} undoable={}", result.op_id, result.can_undo);
    Ok(())
}
