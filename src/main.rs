use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use msubstrate::cli::{afs, history, opm, sge};
use msubstrate::error::SubstrateError;
use msubstrate::telemetry;

/// Safe mutation substrate for AI coding agents
///
/// msubstrate provides crash-safe file operations (move/copy/write/delete with
/// checksum verification and bounded retry), an append-only operation journal with
/// undo support, a guard layer in front of destructive git commands, and a
/// rule-driven batch file organizer — all sharing one durable history so any
/// mutation made through it can be listed, inspected, and reversed.
///
/// QUICK START:
///
///   msubstrate move src.txt dst/             # atomic, checksum-verified move
///   msubstrate history                        # list recorded operations
///   msubstrate undo <op_id>                   # restore pre-mutation bytes
///   msubstrate git -- reset --hard            # guarded git invocation
///   msubstrate organize . --by-extension      # batch-organize a directory
#[derive(Parser)]
#[command(name = "msubstrate")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Suppress prompts; fail with user_error instead of blocking on confirmation
    #[arg(long, global = true, env = "NONINTERACTIVE")]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Atomically move a file, verifying checksums and retrying on contention
    Move(afs::MoveArgs),

    /// Atomically copy a file
    Copy(afs::MoveArgs),

    /// Write bytes to a file atomically (write-new-or-replace)
    Write(afs::WriteArgs),

    /// Move a file to the trash area rather than unlinking it
    Rm(afs::RmArgs),

    /// List recorded operations, optionally filtered
    History(history::HistoryArgs),

    /// Restore a file to the state it had before the given operation
    Undo(history::UndoArgs),

    /// Summary counts across the operation journal
    Stats,

    /// Drop journal records (and backups) older than the retention window
    Clean(history::CleanArgs),

    /// Run a git command through the safe-git guard pipeline
    Git(sge::GitArgs),

    /// Show what the guard pipeline would do, without running git or taking backups
    Explain(sge::GitArgs),

    /// Inspect or change the repository's environment/mode context
    #[command(subcommand)]
    Context(sge::ContextCommands),

    /// Batch-organize files under a directory by a single rule
    Organize(opm::OrganizeArgs),
}

fn main() -> ExitCode {
    telemetry::init(std::env::var("NONINTERACTIVE").is_ok());

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(kind = err.kind(), %err, "msubstrate command failed");
            eprintln!("error: {err}");
            ExitCode::from(exit_code_u8(&err))
        }
    }
}

fn exit_code_u8(err: &SubstrateError) -> u8 {
    u8::try_from(err.exit_code()).unwrap_or(1)
}

fn run(cli: &Cli) -> msubstrate::error::Result<()> {
    let substrate = msubstrate::cli::open(cli.root.as_deref())?;

    match &cli.command {
        Commands::Move(args) => afs::run_move(args, &substrate),
        Commands::Copy(args) => afs::run_copy(args, &substrate),
        Commands::Write(args) => afs::run_write(args, &substrate),
        Commands::Rm(args) => afs::run_rm(args, &substrate),
        Commands::History(args) => history::run_history(args, &substrate),
        Commands::Undo(args) => history::run_undo(args, &substrate),
        Commands::Stats => history::run_stats(&substrate),
        Commands::Clean(args) => history::run_clean(args, &substrate),
        Commands::Git(args) => sge::run_git(args, cli.non_interactive, &substrate),
        Commands::Explain(args) => sge::run_explain(args, &substrate),
        Commands::Context(cmd) => sge::run_context(cmd, &substrate),
        Commands::Organize(args) => opm::run(args, &substrate),
    }
}
