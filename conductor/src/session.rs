//! `start` / `resume` driver: repository checks, run record setup, execution,
//! and the post-run clean-tree invariant.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, instrument};

use crate::core::plan::{PlanDocument, dry_run_listing};
use crate::core::types::RunStatus;
use crate::io::agent::AgentInvoker;
use crate::io::config::ConductorConfig;
use crate::io::git::Git;
use crate::io::plan::load_plan_document;
use crate::io::quality_gates::GateRunner;
use crate::io::run_state::{
    RunPaths, RunState, ensure_run_directories, ensure_runs_dir, load_run_state, save_run_state,
    timestamp_run_id,
};
use crate::run_executor::{RunLimits, RunStop, execute_run};
use crate::task_runner::{TaskRunner, TaskSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCommand {
    Start {
        plan_path: PathBuf,
        tasks_path: PathBuf,
        retry_limit: u32,
        /// Overrides the configured branch prefix.
        branch_prefix: Option<String>,
    },
    Resume {
        state_path: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub command: RunCommand,
    pub limits: RunLimits,
    pub dry_run: bool,
    pub allow_dirty: bool,
    pub settings: TaskSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub state_path: PathBuf,
    pub stop: RunStop,
    pub handoff_path: Option<PathBuf>,
}

impl RunSummary {
    /// Lines printed once a run stops.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Run {} finished with status {}", self.run_id, self.status),
            format!("State file: {}", self.state_path.display()),
        ];
        if matches!(
            self.stop,
            RunStop::TaskLimitReached | RunStop::PhaseLimitReached
        ) {
            lines.push(format!("Stopped: {}", self.stop));
        }
        if let Some(handoff) = &self.handoff_path {
            lines.push(format!("Handoff: {}", handoff.display()));
        }
        lines
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    DryRun(Vec<String>),
    Finished(RunSummary),
}

/// Run `start` or `resume` against the repository at `root`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn run_session<A: AgentInvoker, G: GateRunner>(
    root: &Path,
    options: &SessionOptions,
    config: &ConductorConfig,
    agent: &A,
    gates: &G,
) -> Result<SessionOutcome> {
    let git = Git::new(root);
    git.ensure_repo()?;
    let runs_dir = root.join(&config.runs_dir);

    let (state_path, mut state, document) = match &options.command {
        RunCommand::Start {
            plan_path,
            tasks_path,
            retry_limit,
            branch_prefix,
        } => {
            let tasks_path = root.join(tasks_path);
            let document = load_plan_document(&tasks_path)?;
            if options.dry_run {
                return Ok(dry_run(&document, options.limits));
            }
            prepare_worktree(&git, &runs_dir, options.allow_dirty)?;
            let prefix = branch_prefix.as_deref().unwrap_or(&config.branch_prefix);
            let (state_path, state) = start_run(
                &git,
                &runs_dir,
                prefix,
                &document,
                &root.join(plan_path),
                &tasks_path,
                *retry_limit,
            )?;
            (state_path, state, document)
        }
        RunCommand::Resume { state_path } => {
            let state_path = root.join(state_path);
            let mut state = load_run_state(&state_path)?;
            let document = load_plan_document(&state.tasks_path)?;
            state.check_covers(&document)?;
            if options.dry_run {
                return Ok(dry_run(&document, options.limits));
            }
            prepare_worktree(&git, &runs_dir, options.allow_dirty)?;
            resume_run(&git, &state_path, &mut state)?;
            (state_path, state, document)
        }
    };

    let runner = TaskRunner::new(root, agent, gates, options.settings.clone());
    let stop = execute_run(
        &mut state,
        &state_path,
        &document,
        options.limits,
        &runner,
    )?;

    if state.status != RunStatus::Blocked && git.has_changes()? {
        bail!(
            "working tree is dirty after run {} ended with status {}; every accepted step must leave a clean tree",
            state.run_id,
            state.status
        );
    }

    info!(run_id = %state.run_id, status = %state.status, stop = %stop, "run stopped");
    Ok(SessionOutcome::Finished(RunSummary {
        handoff_path: (state.status == RunStatus::Blocked).then(|| state.handoff_path.clone()),
        run_id: state.run_id,
        status: state.status,
        state_path,
        stop,
    }))
}

fn dry_run(document: &PlanDocument, limits: RunLimits) -> SessionOutcome {
    SessionOutcome::DryRun(dry_run_listing(
        document,
        limits.max_phases,
        limits.max_tasks,
    ))
}

fn prepare_worktree(git: &Git, runs_dir: &Path, allow_dirty: bool) -> Result<()> {
    ensure_runs_dir(runs_dir)?;
    if !allow_dirty {
        git.ensure_clean()?;
    }
    Ok(())
}

fn start_run(
    git: &Git,
    runs_dir: &Path,
    branch_prefix: &str,
    document: &PlanDocument,
    plan_path: &Path,
    tasks_path: &Path,
    retry_limit: u32,
) -> Result<(PathBuf, RunState)> {
    if branch_prefix.trim().is_empty() {
        bail!("branch prefix must not be empty");
    }
    let base_branch = git.current_branch()?;
    let (run_id, paths) = unique_run_id(git, runs_dir, branch_prefix, &timestamp_run_id())?;
    let branch = format!("{branch_prefix}/{run_id}");
    git.checkout_new_branch(&branch)
        .with_context(|| format!("create run branch {branch} from {base_branch}"))?;
    info!(run_id = %run_id, branch = %branch, base = %base_branch, "starting run");

    let mut state = RunState::initial(
        document,
        &run_id,
        &branch,
        plan_path,
        tasks_path,
        retry_limit,
        &paths,
    );
    ensure_run_directories(&state)?;
    save_run_state(&paths.state_path, &mut state)?;
    Ok((paths.state_path, state))
}

/// First of `base`, `base-2`, `base-3`, … with neither a state file nor a branch.
fn unique_run_id(
    git: &Git,
    runs_dir: &Path,
    branch_prefix: &str,
    base: &str,
) -> Result<(String, RunPaths)> {
    for suffix in 1u32.. {
        let run_id = if suffix == 1 {
            base.to_string()
        } else {
            format!("{base}-{suffix}")
        };
        let paths = RunPaths::new(runs_dir, &run_id);
        if !paths.state_path.exists() && !git.branch_exists(&format!("{branch_prefix}/{run_id}"))? {
            return Ok((run_id, paths));
        }
    }
    bail!("no free run id for {base}")
}

fn resume_run(git: &Git, state_path: &Path, state: &mut RunState) -> Result<()> {
    let current = git.current_branch()?;
    if current != state.branch {
        if !git.branch_exists(&state.branch)? {
            bail!(
                "run branch {} recorded in {} does not exist",
                state.branch,
                state_path.display()
            );
        }
        git.checkout_branch(&state.branch)?;
        info!(from = %current, to = %state.branch, "checked out run branch");
    }

    let reopened = state.reopen_blocked();
    if !reopened.is_empty() {
        info!(tasks = ?reopened, "reopened blocked tasks with a fresh retry budget");
    }
    ensure_run_directories(state)?;
    save_run_state(state_path, state)?;
    info!(run_id = %state.run_id, "resuming run");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailureCategory;
    use crate::test_support::TestRepo;

    #[test]
    fn summary_lines_mention_pause_and_handoff() {
        let mut summary = RunSummary {
            run_id: "r1".to_string(),
            status: RunStatus::Running,
            state_path: PathBuf::from("/runs/r1.state.json"),
            stop: RunStop::TaskLimitReached,
            handoff_path: None,
        };
        assert_eq!(
            summary.lines(),
            vec![
                "Run r1 finished with status running",
                "State file: /runs/r1.state.json",
                "Stopped: task limit reached",
            ]
        );

        summary.status = RunStatus::Blocked;
        summary.stop = RunStop::Blocked {
            phase_id: "phase-1".to_string(),
            task_id: "task-001".to_string(),
            failure: crate::core::types::AttemptResult::failed(
                Vec::new(),
                FailureCategory::NoChanges,
                None,
            ),
        };
        summary.handoff_path = Some(PathBuf::from("/runs/r1/HANDOFF.md"));
        let lines = summary.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "Handoff: /runs/r1/HANDOFF.md");
    }

    #[test]
    fn run_ids_get_numeric_suffix_when_taken() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        let runs_dir = repo.path().join(".conductor/runs");
        ensure_runs_dir(&runs_dir).expect("runs dir");

        let (id, _) = unique_run_id(&git, &runs_dir, "conductor", "20260101-000000").expect("id");
        assert_eq!(id, "20260101-000000");

        std::fs::write(runs_dir.join("20260101-000000.state.json"), "{}").expect("state");
        repo.git(&["branch", "conductor/20260101-000000-2"])
            .expect("branch");
        let (id, paths) =
            unique_run_id(&git, &runs_dir, "conductor", "20260101-000000").expect("id");
        assert_eq!(id, "20260101-000000-3");
        assert!(paths.state_path.ends_with("20260101-000000-3.state.json"));
    }
}
