//! The explicit `Substrate` handle threaded through every call site.
//!
//! Replaces what would otherwise be module-level history/config singletons: one
//! instance is built once at process startup (or once per test fixture) from env +
//! config file, then passed by reference into AFS, SGE, and OPM entry points.

use std::path::{Path, PathBuf};

use crate::afs::Afs;
use crate::backup::BackupStore;
use crate::config::Config;
use crate::error::Result;
use crate::history::HistoryLog;

pub struct Substrate {
    pub config: Config,
    pub root: PathBuf,
    history: HistoryLog,
}

impl Substrate {
    /// Construct the substrate for `root`: loads config (env-overridden), opens the
    /// history log (sweeping orphaned backups), and resolves the trash directory.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let history_dir = root.join(&config.history.history_dir);
        let history = HistoryLog::open(&history_dir)?;
        Ok(Self { config, root: root.to_path_buf(), history })
    }

    #[must_use]
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    #[must_use]
    pub fn backups(&self) -> &BackupStore {
        self.history.backups()
    }

    #[must_use]
    pub fn afs(&self) -> Afs<'_> {
        Afs::new(&self.history, self.trash_dir())
    }

    #[must_use]
    pub fn trash_dir(&self) -> PathBuf {
        self.root.join(&self.config.history.trash_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_history_directory() {
        let dir = TempDir::new().unwrap();
        let substrate = Substrate::open(dir.path()).unwrap();
        assert!(dir.path().join(".msubstrate/operations.jsonl").exists());
        assert_eq!(substrate.config.afs.max_retries, 3);
    }
}
