//! `msubstrate organize` — OPM entry point.

use std::path::PathBuf;

use clap::Args;

use crate::afs::MoveOptions;
use crate::error::Result;
use crate::opm::{self, ArchiveFormat, OrganizeOptions, Rule};
use crate::opm::rules::default_extension_map;
use crate::substrate::Substrate;

#[derive(Args, Debug)]
pub struct OrganizeArgs {
    pub root: PathBuf,

    /// Organize by file extension into category folders
    #[arg(long)]
    pub by_extension: bool,

    /// Organize by last-modified date, using the given strftime format
    #[arg(long, value_name = "FORMAT")]
    pub by_date: Option<String>,

    /// Organize into Small/Medium/Large folders, thresholds in MiB
    #[arg(long, num_args = 2, value_names = ["SMALL_MB", "LARGE_MB"])]
    pub by_size: Option<Vec<f64>>,

    /// Organize by coarse MIME-derived type
    #[arg(long)]
    pub by_type: bool,

    /// Move every nested file up to `root`, then remove emptied subdirectories
    #[arg(long)]
    pub flatten: bool,

    /// Archive files older than this many days into a single archive
    #[arg(long, value_name = "DAYS")]
    pub archive_older_than: Option<u64>,

    /// Archive format used by `--archive-older-than`
    #[arg(long, default_value = "zip")]
    pub archive_format: String,

    /// Show what would happen without moving anything
    #[arg(long)]
    pub dry_run: bool,
}

fn resolve_rule(args: &OrganizeArgs) -> Result<Rule> {
    if args.by_extension {
        return Ok(Rule::ByExtension(default_extension_map()));
    }
    if let Some(fmt) = &args.by_date {
        return Ok(Rule::ByDate(fmt.clone()));
    }
    if let Some(thresholds) = &args.by_size {
        return Ok(Rule::BySize { small_mb: thresholds[0], large_mb: thresholds[1] });
    }
    if args.by_type {
        return Ok(Rule::ByType);
    }
    if args.flatten {
        return Ok(Rule::Flatten);
    }
    if let Some(days) = args.archive_older_than {
        return Ok(Rule::ArchiveOlderThan { days, format: ArchiveFormat::parse(&args.archive_format) });
    }
    Err(crate::error::SubstrateError::UserError {
        message: "no organization rule selected".into(),
        hint: crate::error::RecoveryHint::FreeText(
            "pass one of --by-extension, --by-date, --by-size, --by-type, --flatten, --archive-older-than".into(),
        ),
    })
}

pub fn run(args: &OrganizeArgs, substrate: &Substrate) -> Result<()> {
    let rule = resolve_rule(args)?;
    let opts = OrganizeOptions {
        dry_run: args.dry_run,
        move_opts: MoveOptions::from(&substrate.config.afs),
        manifest_path: substrate.root.join(&substrate.config.history.history_dir).join("manifest.json"),
    };

    let (report, manifest) =
        opm::organize(&args.root, &rule, substrate.history(), substrate.trash_dir(), &opts)?;

    if args.dry_run {
        for (src, dst) in &report.planned {
            println!("would move {} -> {}", src.display(), dst.display());
        }
    } else {
        println!("moved {} file(s); manifest has {} operation(s)", report.moved, manifest.total_operations);
    }
    Ok(())
}
