//! SGE context: `{environment, mode, restrictions[], updated_at}`, persisted as JSON
//! under the repository's git metadata area.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubstrateError};
use crate::path_lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Normal,
    CodeFreeze,
    Maintenance,
    Paranoid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub environment: Environment,
    pub mode: Mode,
    pub restrictions: Vec<String>,
    pub updated_at: String,
    /// Not part of the persisted JSON; filled in by the caller (e.g. the interposer
    /// resolving the current branch from git) so `context_forbids` can check
    /// code-freeze's hotfix-branch carve-out without shelling out itself.
    #[serde(skip)]
    pub current_branch_hint: Option<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            mode: Mode::Normal,
            restrictions: Vec::new(),
            updated_at: String::new(),
            current_branch_hint: None,
        }
    }
}

fn context_path(git_dir: &Path) -> PathBuf {
    git_dir.join("msubstrate_context.json")
}

/// Load the context file, or the development/normal default if absent.
pub fn load(git_dir: &Path) -> Result<Context> {
    let path = context_path(git_dir);
    if !path.exists() {
        return Ok(Context::default());
    }
    let _guard = path_lock::acquire_shared(&path, Duration::from_secs(5))?;
    let text =
        std::fs::read_to_string(&path).map_err(|source| SubstrateError::PermissionDenied { path: path.clone(), source })?;
    serde_json::from_str(&text).map_err(|e| SubstrateError::HistoryCorrupt { detail: format!("context file: {e}") })
}

/// Atomically replace the context file, guarded by an exclusive lock.
pub fn save(git_dir: &Path, mut ctx: Context) -> Result<()> {
    let path = context_path(git_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| SubstrateError::PermissionDenied { path: parent.to_path_buf(), source })?;
    }
    let _guard = path_lock::acquire_exclusive(&path, Duration::from_secs(5))?;
    ctx.updated_at = chrono::Utc::now().to_rfc3339();

    let tmp = path.with_extension("json.tmp");
    let text =
        serde_json::to_string_pretty(&ctx).map_err(|e| SubstrateError::Internal { detail: e.to_string() })?;
    std::fs::write(&tmp, text).map_err(|source| SubstrateError::PermissionDenied { path: tmp.clone(), source })?;
    std::fs::rename(&tmp, &path).map_err(|source| SubstrateError::PermissionDenied { path: path.clone(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_context_defaults_to_development_normal() {
        let dir = TempDir::new().unwrap();
        let ctx = load(dir.path()).unwrap();
        assert_eq!(ctx.environment, Environment::Development);
        assert_eq!(ctx.mode, Mode::Normal);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let ctx = Context { environment: Environment::Production, mode: Mode::Paranoid, ..Context::default() };
        save(dir.path(), ctx).unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.environment, Environment::Production);
        assert_eq!(loaded.mode, Mode::Paranoid);
        assert!(!loaded.updated_at.is_empty());
    }
}
