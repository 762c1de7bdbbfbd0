//! CLI surface: one module per engine, mirroring the binary's subcommand groups.

pub mod afs;
pub mod history;
pub mod opm;
pub mod sge;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::substrate::Substrate;

/// Open the substrate rooted at `root`, or the current directory if unset.
pub fn open(root: Option<&Path>) -> Result<Substrate> {
    let root = root.map_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")), Path::to_path_buf);
    Substrate::open(&root)
}
