//! Typed configuration: `.msubstrate/config.toml` merged with environment overrides.
//!
//! A missing config file is not an error — every field falls back to a documented
//! default. Unknown keys in the file are rejected so a typo is a load error, not a
//! silently ignored setting.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubstrateError};

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_s() -> f64 {
    0.5
}
fn default_backoff_exponent() -> f64 {
    2.0
}
fn default_timeout_s() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_overwrite_policy() -> String {
    "backup".into()
}
fn default_retention_days() -> u64 {
    30
}
fn default_compression_threshold_bytes() -> u64 {
    1024
}
fn default_undo_stack_depth() -> usize {
    50
}
fn default_protected_branches() -> Vec<String> {
    vec!["main".into(), "master".into(), "develop".into(), "release*".into(), "stable*".into()]
}
fn default_history_dir() -> String {
    ".msubstrate".into()
}
fn default_trash_dir() -> String {
    ".msubstrate/trash".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AfsConfig {
    pub verify_checksum: bool,
    pub max_retries: u32,
    pub retry_delay_s: f64,
    pub backoff_exponent: f64,
    pub timeout_s: u64,
    pub overwrite_policy: String,
    pub preserve_metadata: bool,
}

impl Default for AfsConfig {
    fn default() -> Self {
        Self {
            verify_checksum: default_true(),
            max_retries: default_max_retries(),
            retry_delay_s: default_retry_delay_s(),
            backoff_exponent: default_backoff_exponent(),
            timeout_s: default_timeout_s(),
            overwrite_policy: default_overwrite_policy(),
            preserve_metadata: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HistoryConfig {
    pub retention_days: u64,
    pub compression_threshold_bytes: u64,
    pub history_dir: String,
    pub trash_dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            history_dir: default_history_dir(),
            trash_dir: default_trash_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SgeConfig {
    pub undo_stack_depth: usize,
    pub protected_branches: Vec<String>,
}

impl Default for SgeConfig {
    fn default() -> Self {
        Self { undo_stack_depth: default_undo_stack_depth(), protected_branches: default_protected_branches() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct OpmConfig {
    pub wait_for_unlock_s: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub afs: AfsConfig,
    pub history: HistoryConfig,
    pub sge: SgeConfig,
    pub opm: OpmConfig,
}

impl Config {
    /// Load `<root>/.msubstrate/config.toml`, falling back to defaults if absent,
    /// then apply environment-variable overrides (env > file > default).
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(".msubstrate").join("config.toml");
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|source| SubstrateError::PermissionDenied { path: path.clone(), source })?;
            toml::from_str(&text).map_err(|e| SubstrateError::UserError {
                message: format!("invalid config at {}: {e}", path.display()),
                hint: crate::error::RecoveryHint::FreeText(
                    "remove the unrecognized key or fix the malformed TOML".into(),
                ),
            })?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the `SAFE_MOVE_*` / `SAFEGIT_*` environment variables named in the
    /// external-interfaces contract, taking precedence over file and built-in values.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u32("SAFE_MOVE_MAX_RETRIES") {
            self.afs.max_retries = v;
        }
        if let Some(v) = env_f64("SAFE_MOVE_RETRY_DELAY") {
            self.afs.retry_delay_s = v;
        }
        if let Some(v) = env_u64("SAFE_MOVE_TIMEOUT") {
            self.afs.timeout_s = v;
        }
        if let Some(v) = env_bool("SAFE_MOVE_VERIFY_CHECKSUM") {
            self.afs.verify_checksum = v;
        }
        if let Ok(v) = env::var("SAFE_MOVE_HISTORY") {
            self.history.history_dir = v;
        }
        if let Ok(v) = env::var("SAFE_MOVE_TRASH") {
            self.history.trash_dir = v;
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_u32(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Non-interactive / confirmation-flag protocol (§4.9, §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive {
    pub non_interactive: bool,
    pub assume_yes: bool,
    pub force_yes: bool,
}

impl NonInteractive {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            non_interactive: env_bool("SAFEGIT_NONINTERACTIVE").unwrap_or(false)
                || env_bool("NONINTERACTIVE").unwrap_or(false),
            assume_yes: env_bool("SAFEGIT_ASSUME_YES").unwrap_or(false) || env_bool("ASSUME_YES").unwrap_or(false),
            force_yes: env_bool("SAFEGIT_FORCE_YES").unwrap_or(false) || env_bool("FORCE_YES").unwrap_or(false),
        }
    }

    /// Union with `other`: a flag authorized by either side wins. Lets the
    /// non-interactive env protocol (§7) authorize an operation that CLI flags alone
    /// did not.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            non_interactive: self.non_interactive || other.non_interactive,
            assume_yes: self.assume_yes || other.assume_yes,
            force_yes: self.force_yes || other.force_yes,
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.afs.max_retries, 3);
        assert_eq!(config.sge.protected_branches, default_protected_branches());
    }

    #[test]
    fn unknown_key_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".msubstrate")).unwrap();
        std::fs::write(
            dir.path().join(".msubstrate/config.toml"),
            "[afs]\nbogus_field = true\n",
        )
        .unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn non_interactive_merge_unions_flags() {
        let from_flags = NonInteractive { non_interactive: false, assume_yes: true, force_yes: false };
        let from_env = NonInteractive { non_interactive: true, assume_yes: false, force_yes: false };
        let merged = from_flags.merge(&from_env);
        assert!(merged.non_interactive);
        assert!(merged.assume_yes);
        assert!(!merged.force_yes);
    }

    #[test]
    fn file_value_is_overridden_by_env() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".msubstrate")).unwrap();
        std::fs::write(dir.path().join(".msubstrate/config.toml"), "[afs]\nmax_retries = 9\n").unwrap();

        // SAFETY: tests in this module run single-threaded per process invocation of this
        // specific test; still, avoid leaking the override across tests.
        unsafe {
            env::set_var("SAFE_MOVE_MAX_RETRIES", "7");
        }
        let config = Config::load(dir.path()).unwrap();
        unsafe {
            env::remove_var("SAFE_MOVE_MAX_RETRIES");
        }
        assert_eq!(config.afs.max_retries, 7);
    }
}
