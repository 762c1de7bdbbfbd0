//! Command Classifier: pattern → danger-class map for git invocations, plus the
//! context rules evaluated before a class's own default policy.

use crate::sge::context::{Context, Environment, Mode};

/// The classifier's verdict for a git invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DangerClass {
    Safe,
    ReversibleDestructive,
    ConvertibleDestructive,
    HighRiskDestructive,
}

/// Default policy attached to a [`DangerClass`], before context rules are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    PassThrough,
    BackupPromptRecord,
    ConvertUnlessConfirmed { converted_flag: &'static str, raw_flag: &'static str },
    RequireTypedPhrase { phrase: &'static str },
    Blocked { alternative: &'static str },
}

/// Classify a normalized argv (git subcommand + flags, without the leading `git`).
#[must_use]
pub fn classify(argv: &[String]) -> (DangerClass, Policy) {
    let joined = argv.join(" ");
    let sub = argv.first().map(std::string::String::as_str).unwrap_or("");

    if sub == "filter-branch" || joined.contains("filter-repo") {
        return (
            DangerClass::HighRiskDestructive,
            Policy::Blocked { alternative: "git filter-repo with a reviewed, scoped --path filter" },
        );
    }
    if joined.contains("push") && joined.contains("--mirror") {
        return (DangerClass::HighRiskDestructive, Policy::RequireTypedPhrase { phrase: "MIRROR PUSH" });
    }
    if joined.contains("push") && joined.contains("--delete") {
        return (DangerClass::HighRiskDestructive, Policy::RequireTypedPhrase { phrase: "DELETE REMOTE" });
    }
    if joined.contains("reflog") && joined.contains("expire") {
        return (DangerClass::HighRiskDestructive, Policy::RequireTypedPhrase { phrase: "EXPIRE REFLOG" });
    }
    if joined.contains("update-ref") && joined.contains("-d") {
        return (DangerClass::HighRiskDestructive, Policy::RequireTypedPhrase { phrase: "DELETE REFERENCE" });
    }
    if joined.contains("gc") && joined.contains("--prune=now") {
        return (DangerClass::HighRiskDestructive, Policy::RequireTypedPhrase { phrase: "PROCEED" });
    }

    if joined.contains("push") && joined.contains("--force") && !joined.contains("--force-with-lease") {
        return (
            DangerClass::ConvertibleDestructive,
            Policy::ConvertUnlessConfirmed { converted_flag: "--force-with-lease", raw_flag: "--force" },
        );
    }

    if (sub == "reset" && joined.contains("--hard"))
        || (sub == "checkout" && (joined.contains("-f") || joined.contains(" .")))
        || (sub == "stash" && (joined.contains("drop") || joined.contains("clear")))
        || (sub == "branch" && joined.contains("-D"))
        || (sub == "commit" && joined.contains("--amend"))
        || (sub == "clean" && joined.contains("-f"))
        || sub == "rebase"
    {
        return (DangerClass::ReversibleDestructive, Policy::BackupPromptRecord);
    }

    (DangerClass::Safe, Policy::PassThrough)
}

/// Context rules evaluated before the class's own default policy (spec §4.7).
///
/// Returns `Some(reason)` when the context forbids the command outright.
#[must_use]
pub fn context_forbids(argv: &[String], ctx: &Context) -> Option<String> {
    let joined = argv.join(" ");
    let sub = argv.first().map(std::string::String::as_str).unwrap_or("");

    match ctx.environment {
        Environment::Production => {
            if (sub == "reset" && joined.contains("--hard"))
                || (sub == "clean" && joined.contains("-f"))
                || sub == "rebase"
                || (joined.contains("push") && joined.contains("--force"))
            {
                return Some("destructive operations are forbidden in the production environment".into());
            }
        }
        Environment::Staging | Environment::Development => {}
    }

    match ctx.mode {
        Mode::CodeFreeze => {
            let is_write = !matches!(classify(argv).0, DangerClass::Safe) || sub == "commit" || sub == "push";
            let branch_is_hotfix = ctx.current_branch_hint.as_deref().is_some_and(|b| b.contains("hotfix"));
            if is_write && !branch_is_hotfix {
                return Some("write operations are forbidden during code-freeze except on hotfix branches".into());
            }
        }
        Mode::Paranoid => {
            const READ_ONLY_ALLOWLIST: &[&str] = &["status", "log", "diff", "show", "fetch", "blame"];
            if !READ_ONLY_ALLOWLIST.contains(&sub) {
                return Some("paranoid mode only allows read-only commands".into());
            }
        }
        Mode::Normal | Mode::Maintenance => {}
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_commands_pass_through() {
        let argv = vec!["status".to_string()];
        assert_eq!(classify(&argv).0, DangerClass::Safe);
    }

    #[test]
    fn reset_hard_is_reversible_destructive() {
        let argv = vec!["reset".to_string(), "--hard".to_string()];
        assert_eq!(classify(&argv).0, DangerClass::ReversibleDestructive);
    }

    #[test]
    fn force_push_converts_to_force_with_lease() {
        let argv = vec!["push".to_string(), "--force".to_string(), "origin".to_string(), "feature".to_string()];
        let (class, policy) = classify(&argv);
        assert_eq!(class, DangerClass::ConvertibleDestructive);
        assert!(matches!(policy, Policy::ConvertUnlessConfirmed { .. }));
    }

    #[test]
    fn filter_branch_is_blocked() {
        let argv = vec!["filter-branch".to_string()];
        assert!(matches!(classify(&argv).1, Policy::Blocked { .. }));
    }

    #[test]
    fn production_forbids_force_push() {
        let argv = vec!["push".to_string(), "--force".to_string(), "origin".to_string(), "main".to_string()];
        let ctx = Context { environment: Environment::Production, ..Context::default() };
        assert!(context_forbids(&argv, &ctx).is_some());
    }

    #[test]
    fn paranoid_mode_allows_only_read_only() {
        let ctx = Context { mode: Mode::Paranoid, ..Context::default() };
        assert!(context_forbids(&["status".to_string()], &ctx).is_none());
        assert!(context_forbids(&["commit".to_string()], &ctx).is_some());
    }
}
