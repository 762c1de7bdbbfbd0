//! `msubstrate git|explain|context` — SGE entry points.

use clap::{Args, Subcommand};

use crate::config::NonInteractive;
use crate::error::Result;
use crate::sge::context::{self, Environment, Mode};
use crate::sge::undo_stack::UndoStack;
use crate::sge::{explain, interposer};
use crate::substrate::Substrate;

#[derive(Args, Debug)]
pub struct GitArgs {
    /// git subcommand and flags, e.g. `reset --hard`
    #[arg(last = true, required = true)]
    pub argv: Vec<String>,

    /// Skip confirmation prompts for reversible-destructive commands
    #[arg(long)]
    pub yes: bool,

    /// Authorize a high-risk command, paired with --confirm
    #[arg(long)]
    pub force_yes: bool,

    /// The exact typed confirmation phrase required for high-risk commands
    #[arg(long)]
    pub confirm: Option<String>,

    /// Fail rather than prompt when a confirmation would be required
    #[arg(long)]
    pub non_interactive: bool,
}

#[derive(Subcommand, Debug)]
pub enum ContextCommands {
    /// Show the current repository context
    ShowContext(ShowContextArgs),

    /// Set the environment (development, staging, production)
    SetEnv(SetEnvArgs),

    /// Set the mode (normal, code-freeze, maintenance, paranoid)
    SetMode(SetModeArgs),

    /// Add a free-text restriction note to the context
    AddRestriction(RestrictionArgs),

    /// Remove a previously added restriction
    RemoveRestriction(RestrictionArgs),
}

#[derive(Args, Debug)]
pub struct ShowContextArgs {
    /// Emit the context as JSON instead of the human-readable summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SetEnvArgs {
    pub environment: String,
}

#[derive(Args, Debug)]
pub struct SetModeArgs {
    pub mode: String,
}

#[derive(Args, Debug)]
pub struct RestrictionArgs {
    pub restriction: String,
}

fn git_dir(substrate: &Substrate) -> std::path::PathBuf {
    substrate.root.join(".git")
}

fn parse_environment(s: &str) -> Result<Environment> {
    match s {
        "development" | "dev" => Ok(Environment::Development),
        "staging" => Ok(Environment::Staging),
        "production" | "prod" => Ok(Environment::Production),
        other => Err(crate::error::SubstrateError::UserError {
            message: format!("unknown environment: {other}"),
            hint: crate::error::RecoveryHint::FreeText("use development, staging, or production".into()),
        }),
    }
}

fn parse_mode(s: &str) -> Result<Mode> {
    match s {
        "normal" => Ok(Mode::Normal),
        "code-freeze" | "codefreeze" => Ok(Mode::CodeFreeze),
        "maintenance" => Ok(Mode::Maintenance),
        "paranoid" => Ok(Mode::Paranoid),
        other => Err(crate::error::SubstrateError::UserError {
            message: format!("unknown mode: {other}"),
            hint: crate::error::RecoveryHint::FreeText("use normal, code-freeze, maintenance, or paranoid".into()),
        }),
    }
}

pub fn run_git(args: &GitArgs, non_interactive_default: bool, substrate: &Substrate) -> Result<()> {
    let git_dir = git_dir(substrate);
    let ctx = context::load(&git_dir)?;
    let from_flags = NonInteractive {
        non_interactive: args.non_interactive || non_interactive_default,
        assume_yes: args.yes,
        force_yes: args.force_yes,
    };
    let non_interactive = from_flags.merge(&NonInteractive::from_env());
    let undo_stack = UndoStack::new(
        &substrate.root.join(&substrate.config.history.history_dir),
        substrate.config.sge.undo_stack_depth,
    );
    let outcome = interposer::run(
        &substrate.root,
        &args.argv,
        &ctx,
        non_interactive,
        args.confirm.as_deref(),
        &undo_stack,
        &substrate.config.sge.protected_branches,
    )?;
    if outcome.exit_code != 0 {
        return Err(crate::error::SubstrateError::UserError {
            message: format!("git exited with code {}", outcome.exit_code),
            hint: crate::error::RecoveryHint::FreeText("inspect git's own output above".into()),
        });
    }
    Ok(())
}

pub fn run_explain(args: &GitArgs, substrate: &Substrate) -> Result<()> {
    let ctx = context::load(&git_dir(substrate))?;
    println!("{}", explain(&substrate.root, &args.argv, &ctx, &substrate.config.sge.protected_branches));
    Ok(())
}

pub fn run_context(cmd: &ContextCommands, substrate: &Substrate) -> Result<()> {
    let git_dir = git_dir(substrate);
    match cmd {
        ContextCommands::ShowContext(args) => {
            let ctx = context::load(&git_dir)?;
            if args.json {
                let json = serde_json::to_string_pretty(&ctx)
                    .map_err(|e| crate::error::SubstrateError::Internal { detail: e.to_string() })?;
                println!("{json}");
            } else {
                println!(
                    "environment={:?} mode={:?} restrictions={:?}",
                    ctx.environment, ctx.mode, ctx.restrictions
                );
            }
        }
        ContextCommands::SetEnv(args) => {
            let mut ctx = context::load(&git_dir)?;
            ctx.environment = parse_environment(&args.environment)?;
            context::save(&git_dir, ctx)?;
        }
        ContextCommands::SetMode(args) => {
            let mut ctx = context::load(&git_dir)?;
            ctx.mode = parse_mode(&args.mode)?;
            context::save(&git_dir, ctx)?;
        }
        ContextCommands::AddRestriction(args) => {
            let mut ctx = context::load(&git_dir)?;
            ctx.restrictions.push(args.restriction.clone());
            context::save(&git_dir, ctx)?;
        }
        ContextCommands::RemoveRestriction(args) => {
            let mut ctx = context::load(&git_dir)?;
            ctx.restrictions.retain(|r| r != &args.restriction);
            context::save(&git_dir, ctx)?;
        }
    }
    Ok(())
}
