//! SGE Interposer: confirm/convert/block pipeline, stash-based pre-op backups,
//! undo-stack integration.
//!
//! Shells out to the real `git` the way [`crate::sge`]'s design note describes: this
//! module does not reimplement git semantics, it classifies, guards, possibly
//! rewrites argv, records intent, and execs.

use std::path::Path;
use std::process::Command;

use crate::config::NonInteractive;
use crate::error::{Result, SubstrateError};
use crate::sge::classifier::{self, DangerClass, Policy};
use crate::sge::context::Context;
use crate::sge::undo_stack::UndoStack;

/// Outcome of [`run`] / [`explain`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub executed_argv: Vec<String>,
    pub original_argv: Vec<String>,
}

/// Typed confirmation phrase required to push over a protected or diverged branch.
const ESCALATED_FORCE_PUSH_PHRASE: &str = "I ACCEPT THE RISK";

/// Ahead/behind + branch-protection + remote-platform analysis for a force push.
/// Mirrors `safegit.py`'s `_check_branch_protection`/`_check_upstream_divergence`.
#[derive(Debug, Clone, Default)]
struct ForcePushRisk {
    branch: String,
    protected: bool,
    platform: Option<&'static str>,
    ahead: u64,
    behind: u64,
}

impl ForcePushRisk {
    fn diverged(&self) -> bool {
        self.ahead > 0 && self.behind > 0
    }

    fn escalates(&self) -> bool {
        self.protected || self.diverged()
    }
}

fn analyze_force_push(repo_root: &Path, argv: &[String], protected_branches: &[String]) -> ForcePushRisk {
    let positional: Vec<&str> =
        argv.iter().skip(1).filter(|a| !a.starts_with('-')).map(std::string::String::as_str).collect();
    let remote = positional.first().copied().unwrap_or("origin");
    let branch = positional
        .get(1)
        .map(|b| (*b).to_string())
        .or_else(|| current_branch(repo_root))
        .unwrap_or_default();
    let (ahead, behind) = ahead_behind(repo_root, &branch);

    ForcePushRisk { protected: is_protected_branch(&branch, protected_branches), platform: remote_platform(repo_root, remote), ahead, behind, branch }
}

fn current_branch(repo_root: &Path) -> Option<String> {
    let output = Command::new("git").args(["branch", "--show-current"]).current_dir(repo_root).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() { None } else { Some(name) }
}

fn remote_platform(repo_root: &Path, remote: &str) -> Option<&'static str> {
    let output = Command::new("git").args(["remote", "get-url", remote]).current_dir(repo_root).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).to_lowercase();
    if url.contains("github.com") {
        Some("GitHub")
    } else if url.contains("gitlab") {
        Some("GitLab")
    } else if url.contains("bitbucket") {
        Some("Bitbucket")
    } else {
        None
    }
}

/// `(ahead, behind)` relative to `<branch>@{upstream}`, `(0, 0)` if there is none.
fn ahead_behind(repo_root: &Path, branch: &str) -> (u64, u64) {
    if branch.is_empty() {
        return (0, 0);
    }
    let Ok(upstream_output) = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", &format!("{branch}@{{upstream}}")])
        .current_dir(repo_root)
        .output()
    else {
        return (0, 0);
    };
    if !upstream_output.status.success() {
        return (0, 0);
    }
    let upstream = String::from_utf8_lossy(&upstream_output.stdout).trim().to_string();
    if upstream.is_empty() {
        return (0, 0);
    }

    let Ok(counts) = Command::new("git")
        .args(["rev-list", "--left-right", "--count", &format!("{upstream}...HEAD")])
        .current_dir(repo_root)
        .output()
    else {
        return (0, 0);
    };
    let text = String::from_utf8_lossy(&counts.stdout);
    let mut fields = text.split_whitespace();
    let behind = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let ahead = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (ahead, behind)
}

/// Glob-style match against `protected_branches` patterns (trailing `*` suffix only,
/// same convention `SgeConfig::protected_branches` documents).
fn is_protected_branch(branch: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => branch.starts_with(prefix),
        None => branch == pattern,
    })
}

/// Dry-run: predict effects without running git and without creating backups.
#[must_use]
pub fn explain(repo_root: &Path, argv: &[String], ctx: &Context, protected_branches: &[String]) -> String {
    let (class, policy) = classifier::classify(argv);
    if let Some(reason) = classifier::context_forbids(argv, ctx) {
        return format!("BLOCKED by context: {reason}");
    }
    match policy {
        Policy::PassThrough => format!("safe: git {} would run unchanged", argv.join(" ")),
        Policy::BackupPromptRecord => {
            format!("{class:?}: a backup would be taken, then `git {}` would run", argv.join(" "))
        }
        Policy::ConvertUnlessConfirmed { converted_flag, raw_flag } => {
            let risk = analyze_force_push(repo_root, argv, protected_branches);
            let mut text = format!(
                "{class:?}: `{raw_flag}` would be rewritten to `{converted_flag}` unless a typed confirmation keeps it raw"
            );
            if risk.protected {
                text.push_str(&format!("; '{}' matches a protected-branch pattern", risk.branch));
            }
            if risk.diverged() {
                text.push_str(&format!(
                    "; diverged {} ahead / {} behind upstream",
                    risk.ahead, risk.behind
                ));
            }
            if let Some(platform) = risk.platform {
                text.push_str(&format!(" ({platform})"));
            }
            if risk.escalates() {
                text.push_str(&format!("; escalated: requires typed confirmation '{ESCALATED_FORCE_PUSH_PHRASE}'"));
            }
            text
        }
        Policy::RequireTypedPhrase { phrase } => {
            format!("{class:?}: requires typed confirmation `{phrase}` before `git {}` runs", argv.join(" "))
        }
        Policy::Blocked { alternative } => format!("{class:?}: blocked outright; alternative: {alternative}"),
    }
}

/// Run `argv` through the classify → guard → (maybe backup) → exec pipeline.
pub fn run(
    repo_root: &Path,
    argv: &[String],
    ctx: &Context,
    non_interactive: NonInteractive,
    typed_confirmation: Option<&str>,
    undo_stack: &UndoStack,
    protected_branches: &[String],
) -> Result<RunOutcome> {
    if let Some(reason) = classifier::context_forbids(argv, ctx) {
        return Err(SubstrateError::ContextForbidden { command: argv.join(" "), reason });
    }

    let (class, policy) = classifier::classify(argv);

    let executed_argv = match policy {
        Policy::PassThrough => argv.to_vec(),
        Policy::BackupPromptRecord => {
            require_confirmation(class, non_interactive, typed_confirmation, "--yes", "PROCEED")?;
            let backup_refs = take_pre_op_backup(repo_root, argv)?;
            undo_stack.push(
                format!("git {}", argv.join(" ")),
                class,
                backup_refs,
                None,
                vec!["the stash/archive reference above restores the pre-operation state".into()],
            )?;
            argv.to_vec()
        }
        Policy::ConvertUnlessConfirmed { converted_flag, raw_flag } => {
            let risk = analyze_force_push(repo_root, argv, protected_branches);
            if risk.escalates() {
                require_confirmation(
                    DangerClass::HighRiskDestructive,
                    non_interactive,
                    typed_confirmation,
                    "--force-yes",
                    ESCALATED_FORCE_PUSH_PHRASE,
                )?;
            }
            if typed_confirmation == Some("KEEP RAW FORCE") {
                argv.to_vec()
            } else {
                argv.iter().map(|a| if a == raw_flag { converted_flag.to_string() } else { a.clone() }).collect()
            }
        }
        Policy::RequireTypedPhrase { phrase } => {
            require_confirmation(class, non_interactive, typed_confirmation, "--force-yes", phrase)?;
            argv.to_vec()
        }
        Policy::Blocked { alternative } => {
            return Err(SubstrateError::UserError {
                message: format!("'{}' is blocked; alternative: {alternative}", argv.join(" ")),
                hint: crate::error::RecoveryHint::FreeText(alternative.to_string()),
            });
        }
    };

    let output = Command::new("git")
        .args(&executed_argv)
        .current_dir(repo_root)
        .status()
        .map_err(|_| SubstrateError::DependencyMissing { name: "git" })?;

    Ok(RunOutcome {
        exit_code: output.code().unwrap_or(1),
        executed_argv,
        original_argv: argv.to_vec(),
    })
}

fn require_confirmation(
    class: DangerClass,
    non_interactive: NonInteractive,
    typed_confirmation: Option<&str>,
    flag: &'static str,
    phrase: &'static str,
) -> Result<()> {
    match class {
        DangerClass::HighRiskDestructive => {
            if !non_interactive.force_yes || typed_confirmation != Some(phrase) {
                return Err(SubstrateError::ConfirmationRequired { phrase });
            }
        }
        DangerClass::ReversibleDestructive => {
            if non_interactive.non_interactive && !non_interactive.assume_yes && !non_interactive.force_yes {
                return Err(SubstrateError::UserError {
                    message: "this operation requires confirmation in non-interactive mode".into(),
                    hint: crate::error::RecoveryHint::Flag(flag),
                });
            }
        }
        DangerClass::Safe | DangerClass::ConvertibleDestructive => {}
    }
    Ok(())
}

/// Create a stash-based or archive-based backup of worktree state before delegating
/// to a reversible-destructive git command; returns the artifact reference(s).
fn take_pre_op_backup(repo_root: &Path, argv: &[String]) -> Result<Vec<String>> {
    let sub = argv.first().map(std::string::String::as_str).unwrap_or("");
    if sub == "stash" {
        // Stash itself is the backup target of `stash drop/clear`; archive the stash
        // list instead of creating a new stash (stashing inside a stash op is wrong).
        let list = Command::new("git")
            .args(["stash", "list"])
            .current_dir(repo_root)
            .output()
            .map_err(|_| SubstrateError::DependencyMissing { name: "git" })?;
        return Ok(vec![format!("stash-list:{}", String::from_utf8_lossy(&list.stdout).trim())]);
    }

    let label = format!("sge-pre-op-{}", uuid::Uuid::new_v4());
    let status = Command::new("git")
        .args(["stash", "push", "--include-untracked", "--message", &label])
        .current_dir(repo_root)
        .status()
        .map_err(|_| SubstrateError::DependencyMissing { name: "git" })?;

    if status.success() {
        Ok(vec![format!("stash:{label}")])
    } else {
        // Nothing to stash (clean worktree) is not a failure.
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sge::context::{Environment, Mode};
    use tempfile::TempDir;

    #[test]
    fn explain_reports_blocked_for_context_forbidden() {
        let dir = TempDir::new().unwrap();
        let argv = vec!["push".to_string(), "--force".to_string()];
        let ctx = Context { environment: Environment::Production, ..Context::default() };
        assert!(explain(dir.path(), &argv, &ctx, &[]).starts_with("BLOCKED"));
    }

    #[test]
    fn explain_describes_force_with_lease_conversion() {
        let dir = TempDir::new().unwrap();
        let argv = vec!["push".to_string(), "--force".to_string(), "origin".to_string(), "feature".to_string()];
        let ctx = Context { mode: Mode::Normal, ..Context::default() };
        let text = explain(dir.path(), &argv, &ctx, &[]);
        assert!(text.contains("force-with-lease"));
    }

    #[test]
    fn explain_escalates_for_a_protected_branch_name() {
        let dir = TempDir::new().unwrap();
        let argv = vec!["push".to_string(), "--force".to_string(), "origin".to_string(), "main".to_string()];
        let ctx = Context { mode: Mode::Normal, ..Context::default() };
        let text = explain(dir.path(), &argv, &ctx, &["main".to_string()]);
        assert!(text.contains("protected-branch"));
        assert!(text.contains(ESCALATED_FORCE_PUSH_PHRASE));
    }

    #[test]
    fn is_protected_branch_matches_trailing_glob_suffix() {
        let patterns = vec!["main".to_string(), "release*".to_string()];
        assert!(is_protected_branch("main", &patterns));
        assert!(is_protected_branch("release-1.0", &patterns));
        assert!(!is_protected_branch("feature", &patterns));
    }
}
