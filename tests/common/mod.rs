//! Shared test helpers for msubstrate integration tests.
//!
//! All tests use temp directories — no side effects on the real repo.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Create an empty, isolated git repository in a temp directory.
pub fn setup_git_repo() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    run_git(dir.path(), &["init", "--quiet"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["config", "user.name", "Test"]);
    dir
}

/// Commit every file currently present in the repo.
pub fn commit_all(dir: &Path, message: &str) {
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "--quiet", "-m", message]);
}

pub fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("failed to run git");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}
