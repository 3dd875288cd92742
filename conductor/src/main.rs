//! Autonomous implement → verify → fix runner.
//!
//! `conductor start` creates a run branch and a run record from a task plan;
//! `conductor resume` continues a recorded run. Progress is persisted under
//! `.conductor/runs/`, so a run can always be resumed from its state file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use conductor::core::types::{RunStatus, Sandbox};
use conductor::exit_codes;
use conductor::io::agent::CodexInvoker;
use conductor::io::config::{DEFAULT_CONFIG_PATH, load_config};
use conductor::io::quality_gates::CommandGateRunner;
use conductor::logging;
use conductor::run_executor::RunLimits;
use conductor::session::{RunCommand, SessionOptions, SessionOutcome, run_session};
use conductor::task_runner::TaskSettings;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Drive coding agents through a phased task plan"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new run on a fresh branch.
    Start(StartArgs),
    /// Continue a recorded run.
    Resume(ResumeArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Human-readable plan handed to the agents.
    #[arg(long, default_value = "docs/ideation/PLAN.md")]
    plan: PathBuf,
    /// Structured plan document (phases and tasks).
    #[arg(long, default_value = "docs/ideation/tasks.json")]
    tasks: PathBuf,
    /// Extra attempts per task after the first.
    #[arg(long, default_value_t = 1)]
    retry: u32,
    /// Run branch prefix (overrides config).
    #[arg(long)]
    branch_prefix: Option<String>,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct ResumeArgs {
    /// Run state file to continue.
    #[arg(long)]
    state: PathBuf,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Stop after this many phases.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_phases: Option<u32>,
    /// Pause after this many tasks.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_tasks: Option<u32>,
    /// List the phases and tasks that would run, then exit.
    #[arg(long)]
    dry_run: bool,
    /// Proceed even if the working tree has uncommitted changes.
    #[arg(long)]
    allow_dirty: bool,
    /// Model passed to the agent.
    #[arg(long)]
    model: Option<String>,
    /// Sandbox for implementer, refactor and bug_fixer steps.
    #[arg(long, value_enum)]
    sandbox: Option<Sandbox>,
    #[arg(long)]
    skip_quality_gates: bool,
    /// Mirror agent and gate output to the terminal (default).
    #[arg(long, overrides_with = "silent")]
    print_logs: bool,
    /// Keep agent and gate output in the step logs only.
    #[arg(long, overrides_with = "print_logs")]
    silent: bool,
    /// Config file (defaults to `.conductor/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl CommonArgs {
    fn mirror_output(&self) -> bool {
        !self.silent
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve working directory")?;

    let (command, common) = match cli.command {
        Command::Start(args) => (
            RunCommand::Start {
                plan_path: args.plan,
                tasks_path: args.tasks,
                retry_limit: args.retry,
                branch_prefix: args.branch_prefix,
            },
            args.common,
        ),
        Command::Resume(args) => (
            RunCommand::Resume {
                state_path: args.state,
            },
            args.common,
        ),
    };

    let config_path = common
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_config(&root.join(config_path))?;

    let options = SessionOptions {
        command,
        limits: RunLimits {
            max_phases: common.max_phases,
            max_tasks: common.max_tasks,
        },
        dry_run: common.dry_run,
        allow_dirty: common.allow_dirty,
        settings: TaskSettings {
            model: common.model.clone(),
            sandbox: common.sandbox,
            skip_quality_gates: common.skip_quality_gates,
            print_logs: common.mirror_output(),
            diff_patch_limit: config.diff_patch_limit_chars,
        },
    };
    let agent = CodexInvoker::new(config.agent.command.clone());
    let gates = CommandGateRunner::new(config.quality_gates.clone());

    match run_session(&root, &options, &config, &agent, &gates)? {
        SessionOutcome::DryRun(lines) => {
            for line in lines {
                println!("{line}");
            }
            Ok(exit_codes::OK)
        }
        SessionOutcome::Finished(summary) => {
            for line in summary.lines() {
                println!("{line}");
            }
            if summary.status == RunStatus::Blocked {
                Ok(exit_codes::BLOCKED)
            } else {
                Ok(exit_codes::OK)
            }
        }
    }
}
