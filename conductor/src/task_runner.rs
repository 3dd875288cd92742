//! Per-task agent state machine.
//!
//! An attempt starts with the implementer. Every mutating step (implementer,
//! refactor, bug_fixer) must change the repository, pass the quality gates and
//! get committed before the verifier reviews it. The verifier either accepts
//! the work (`DONE`) or routes it to refactor/bug_fixer with notes. Any step
//! failure ends the attempt; attempts are bounded by the retry limit.
//!
//! Every transition of the task's runtime record is persisted immediately.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::agents::prompts::{
    CommitPromptInput, PromptInput, build_agent_prompt, build_commit_message_prompt,
};
use crate::agents::{OutputSchema, write_output_schema};
use crate::core::classify::{FailureEvidence, NO_CHANGES_MARKER, classify_exhausted_failure};
use crate::core::parsers::{parse_conventional_commit, parse_verifier_decision, truncate_text};
use crate::core::plan::{PlanPhase, PlanTask};
use crate::core::types::{
    AgentRole, AttemptResult, FailureCategory, Sandbox, StepFailure, StepResult, TaskStatus,
    VerifierDecision, VerifierStatus,
};
use crate::io::agent::{AgentInvoker, AgentPurpose, AgentRequest, AgentResponse};
use crate::io::artifacts::{StepArtifacts, append_log};
use crate::io::git::Git;
use crate::io::quality_gates::{GateRequest, GateRunner};
use crate::io::run_state::{RunState, TaskState, save_run_state};

/// Ceiling on verifier rounds within one attempt.
pub const MAX_VERIFIER_CYCLES: u32 = 5;
/// Default character budget for the diff patch shown to the commit-message call.
pub const DEFAULT_DIFF_PATCH_LIMIT: usize = 12_000;

/// Knobs shared by every task in a run.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub model: Option<String>,
    /// Sandbox for mutating steps; the verifier and commit-message calls are always read-only.
    pub sandbox: Option<Sandbox>,
    pub skip_quality_gates: bool,
    /// Mirror agent and gate output to the terminal.
    pub print_logs: bool,
    pub diff_patch_limit: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            model: None,
            sandbox: None,
            skip_quality_gates: false,
            print_logs: false,
            diff_patch_limit: DEFAULT_DIFF_PATCH_LIMIT,
        }
    }
}

/// One task to drive through its retry budget.
pub struct TaskRequest<'a> {
    pub state: &'a mut RunState,
    pub state_path: &'a Path,
    pub phase: &'a PlanPhase,
    pub task: &'a PlanTask,
    pub retry_limit: u32,
}

/// Seam between the run executor and the per-task state machine.
pub trait TaskExecutor {
    fn execute_task(&self, request: TaskRequest<'_>) -> Result<AttemptResult>;
}

/// The task's slice of the run record, persisted on every update.
struct TaskScope<'s> {
    state: &'s mut RunState,
    state_path: &'s Path,
    phase: &'s PlanPhase,
    task: &'s PlanTask,
}

impl TaskScope<'_> {
    fn current(&self) -> Result<&TaskState> {
        self.state
            .task(&self.phase.id, &self.task.id)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "task runtime state not found: {}/{}",
                    self.phase.id,
                    self.task.id
                )
            })
    }

    fn update(&mut self, apply: impl FnOnce(&mut TaskState)) -> Result<()> {
        apply(self.state.task_mut(&self.phase.id, &self.task.id)?);
        save_run_state(self.state_path, self.state)
    }
}

/// Bookkeeping for a single attempt.
#[derive(Debug)]
struct AttemptCycle {
    attempt: u32,
    max_attempts: u32,
    step_sequence: u32,
    verifier_cycle: u32,
    notes: Vec<String>,
    next_agent: AgentRole,
    changed_files: Vec<String>,
    latest_commit: Option<String>,
    failure_context: Option<String>,
}

impl AttemptCycle {
    fn new(attempt: u32, max_attempts: u32, failure_context: Option<String>) -> Self {
        Self {
            attempt,
            max_attempts,
            step_sequence: 0,
            verifier_cycle: 0,
            notes: Vec::new(),
            next_agent: AgentRole::Implementer,
            changed_files: Vec::new(),
            latest_commit: None,
            failure_context,
        }
    }

    fn merge_changed_files(&mut self, files: Vec<String>) {
        for file in files {
            if !self.changed_files.contains(&file) {
                self.changed_files.push(file);
            }
        }
    }
}

/// A mutating step whose changes passed the gates and were committed.
struct CommittedStep {
    commit_hash: String,
    changed_files: Vec<String>,
}

/// Drives tasks through implement → verify → fix cycles.
pub struct TaskRunner<'a, A, G> {
    root: &'a Path,
    agent: &'a A,
    gates: &'a G,
    settings: TaskSettings,
    git: Git,
}

impl<'a, A: AgentInvoker, G: GateRunner> TaskRunner<'a, A, G> {
    pub fn new(root: &'a Path, agent: &'a A, gates: &'a G, settings: TaskSettings) -> Self {
        Self {
            root,
            agent,
            gates,
            settings,
            git: Git::new(root),
        }
    }

    /// Run attempts `attempts + 1 ..= retry_limit + 1` until one passes.
    ///
    /// Once the budget is exhausted the failure category is derived from the
    /// persisted task record, not from the last step.
    #[instrument(skip_all, fields(phase = %request.phase.id, task = %request.task.id))]
    pub fn execute_task_with_retry(&self, request: TaskRequest<'_>) -> Result<AttemptResult> {
        let max_attempts = request.retry_limit + 1;
        let mut scope = TaskScope {
            state: request.state,
            state_path: request.state_path,
            phase: request.phase,
            task: request.task,
        };

        let current = scope.current()?;
        let first_attempt = current.attempts + 1;
        // An interrupted task resumes with the failure text it last recorded.
        let mut failure_context = if current.attempts > 0 {
            current.last_error.clone()
        } else {
            None
        };
        if first_attempt > max_attempts {
            warn!(attempts = current.attempts, max_attempts, "retry budget already exhausted");
        }

        let mut last_failure: Option<StepFailure> = None;
        for attempt in first_attempt..=max_attempts {
            scope.update(|task| {
                task.status = TaskStatus::Running;
                task.attempts = attempt;
                task.last_error = None;
                task.last_quality_gate = None;
                task.changed_files.clear();
            })?;
            info!(attempt, max_attempts, "starting attempt");

            let mut cycle = AttemptCycle::new(attempt, max_attempts, failure_context.take());
            match self.run_attempt(&mut scope, &mut cycle)? {
                Ok(()) => {
                    let commit = cycle.latest_commit.clone();
                    let files = cycle.changed_files.clone();
                    scope.update(|task| {
                        task.status = TaskStatus::Passed;
                        task.last_commit = commit;
                        task.last_error = None;
                        task.changed_files = files;
                    })?;
                    info!(attempt, commit = ?cycle.latest_commit, "task passed");
                    return Ok(AttemptResult::passed(
                        cycle.latest_commit,
                        cycle.changed_files,
                    ));
                }
                Err(failure) => {
                    warn!(
                        attempt,
                        category = %failure.category,
                        details = %failure.details,
                        "attempt failed"
                    );
                    let files = cycle.changed_files.clone();
                    scope.update(|task| {
                        task.status = TaskStatus::Failed;
                        task.last_error = Some(failure.details.clone());
                        if failure.category == FailureCategory::QualityGate {
                            task.last_quality_gate = Some(
                                failure
                                    .gate
                                    .clone()
                                    .unwrap_or_else(|| FailureCategory::QualityGate.to_string()),
                            );
                        }
                        task.changed_files = files;
                    })?;
                    failure_context = Some(failure.details.clone());
                    last_failure = Some(failure);
                }
            }
        }

        let task = scope.current()?;
        let category = classify_exhausted_failure(FailureEvidence {
            last_quality_gate: task.last_quality_gate.as_deref(),
            last_codex_exit_code: task.last_codex_exit_code,
            last_error: task.last_error.as_deref(),
        });
        if let Some(failure) = &last_failure
            && failure.category != category
        {
            debug!(step = %failure.category, %category, "final category differs from last step");
        }
        Ok(AttemptResult::failed(
            task.changed_files.clone(),
            category,
            task.last_error.clone(),
        ))
    }

    fn run_attempt(
        &self,
        scope: &mut TaskScope<'_>,
        cycle: &mut AttemptCycle,
    ) -> Result<StepResult<()>> {
        loop {
            if cycle.next_agent == AgentRole::Verifier {
                cycle.verifier_cycle += 1;
                if cycle.verifier_cycle > MAX_VERIFIER_CYCLES {
                    return Ok(Err(StepFailure::new(
                        FailureCategory::CodexError,
                        format!("Verifier exceeded max cycles ({MAX_VERIFIER_CYCLES})"),
                    )));
                }
                cycle.step_sequence += 1;
                let decision = match self.verifier_step(scope, cycle)? {
                    Ok(decision) => decision,
                    Err(failure) => return Ok(Err(failure)),
                };
                debug!(
                    status = decision.status.as_str(),
                    notes = decision.notes.len(),
                    "verifier decision"
                );
                cycle.next_agent = match decision.status {
                    VerifierStatus::Done => return Ok(Ok(())),
                    VerifierStatus::Refactor => AgentRole::Refactor,
                    VerifierStatus::Issues => AgentRole::BugFixer,
                };
                cycle.notes = decision.notes;
                continue;
            }

            let role = cycle.next_agent;
            cycle.step_sequence += 1;
            let step = match self.mutating_step(scope, cycle, role)? {
                Ok(step) => step,
                Err(failure) => return Ok(Err(failure)),
            };
            cycle.latest_commit = Some(step.commit_hash);
            cycle.merge_changed_files(step.changed_files);
            cycle.notes.clear();
            cycle.next_agent = AgentRole::Verifier;
        }
    }

    /// Build the prompt, call the agent, and record the exchange on the task.
    fn invoke_role(
        &self,
        scope: &mut TaskScope<'_>,
        cycle: &AttemptCycle,
        role: AgentRole,
        output_schema: Option<OutputSchema>,
    ) -> Result<(StepArtifacts, AgentResponse)> {
        let artifacts = StepArtifacts::new(
            &scope.state.log_dir,
            &scope.state.message_dir,
            &scope.phase.id,
            &scope.task.id,
            cycle.attempt,
            cycle.step_sequence,
            role,
        );
        let failure_context = match role {
            AgentRole::Implementer => cycle.failure_context.as_deref(),
            _ => None,
        };
        let sandbox = if role.is_mutating() {
            self.settings.sandbox
        } else {
            Some(Sandbox::ReadOnly)
        };
        let prompt = build_agent_prompt(
            role,
            &PromptInput {
                plan_path: &scope.state.plan_path,
                tasks_path: &scope.state.tasks_path,
                phase: scope.phase,
                task: scope.task,
                attempt: cycle.attempt,
                max_attempts: cycle.max_attempts,
                verifier_cycle: cycle.verifier_cycle,
                max_verifier_cycles: MAX_VERIFIER_CYCLES,
                notes: &cycle.notes,
                failure_context,
            },
        )?;
        let output_schema_path = output_schema
            .map(|schema| write_output_schema(&scope.state.run_dir, schema))
            .transpose()?;

        info!(role = %role, step = cycle.step_sequence, "invoking agent");
        let response = self.agent.invoke(&AgentRequest {
            purpose: AgentPurpose::Step(role),
            workdir: self.root.to_path_buf(),
            prompt,
            log_path: artifacts.log_path.clone(),
            output_path: artifacts.message_path.clone(),
            output_schema_path,
            model: self.settings.model.clone(),
            sandbox,
            mirror_output: self.settings.print_logs,
        })?;

        let log_path = artifacts.log_path.clone();
        let message_path = artifacts.message_path.clone();
        let exit_code = response.exit_code;
        scope.update(|task| {
            task.last_log_path = Some(log_path);
            task.last_message_path = Some(message_path);
            task.last_codex_exit_code = Some(exit_code);
        })?;
        Ok((artifacts, response))
    }

    fn verifier_step(
        &self,
        scope: &mut TaskScope<'_>,
        cycle: &AttemptCycle,
    ) -> Result<StepResult<VerifierDecision>> {
        let (_, response) = self.invoke_role(
            scope,
            cycle,
            AgentRole::Verifier,
            Some(OutputSchema::VerifierDecision),
        )?;
        if !response.succeeded() {
            return Ok(Err(StepFailure::new(
                FailureCategory::CodexError,
                format!("codex verifier failed with code {}", response.exit_code),
            )));
        }
        Ok(parse_verifier_decision(&response.output).map_err(|err| {
            StepFailure::new(
                FailureCategory::CodexError,
                format!("invalid verifier response: {err:#}"),
            )
        }))
    }

    fn mutating_step(
        &self,
        scope: &mut TaskScope<'_>,
        cycle: &AttemptCycle,
        role: AgentRole,
    ) -> Result<StepResult<CommittedStep>> {
        let (artifacts, response) = self.invoke_role(scope, cycle, role, None)?;
        if !response.succeeded() {
            return Ok(Err(StepFailure::new(
                FailureCategory::CodexError,
                format!("codex {role} failed with code {}", response.exit_code),
            )));
        }

        let changed_files = match self.git.changed_files() {
            Ok(files) => files,
            Err(err) => return Ok(Err(git_failure("list changed files", &err))),
        };
        if changed_files.is_empty() {
            let details = format!("{NO_CHANGES_MARKER} detected after {role}");
            append_log(&artifacts.log_path, "Task Failure", &details)?;
            return Ok(Err(StepFailure::new(FailureCategory::NoChanges, details)));
        }
        debug!(files = changed_files.len(), "step changed files");

        if self.settings.skip_quality_gates {
            debug!("quality gates skipped");
        } else {
            let report = self.gates.run(&GateRequest {
                workdir: self.root.to_path_buf(),
                log_path: artifacts.log_path.clone(),
                mirror_output: self.settings.print_logs,
            })?;
            if !report.passed {
                return Ok(Err(StepFailure::quality_gate(
                    report.failed_gate,
                    report.details,
                )));
            }
        }

        let commit_hash = match self.commit_changes(scope, &artifacts, &changed_files)? {
            Ok(hash) => hash,
            Err(failure) => return Ok(Err(failure)),
        };
        Ok(Ok(CommittedStep {
            commit_hash,
            changed_files,
        }))
    }

    /// Stage everything, ask the agent for a commit message, and commit.
    fn commit_changes(
        &self,
        scope: &TaskScope<'_>,
        artifacts: &StepArtifacts,
        changed_files: &[String],
    ) -> Result<StepResult<String>> {
        let staged = (|| -> Result<(String, String)> {
            self.git.stage_all()?;
            Ok((self.git.staged_diff_stat()?, self.git.staged_diff()?))
        })();
        let (diff_stat, diff) = match staged {
            Ok(staged) => staged,
            Err(err) => return Ok(Err(git_failure("stage changes", &err))),
        };

        let diff_patch = truncate_text(&diff, self.settings.diff_patch_limit);
        let prompt = build_commit_message_prompt(&CommitPromptInput {
            task_title: &scope.task.title,
            changed_files,
            diff_stat: &diff_stat,
            diff_patch: &diff_patch,
        })?;
        let schema_path = write_output_schema(&scope.state.run_dir, OutputSchema::CommitMessage)?;
        let response = self.agent.invoke(&AgentRequest {
            purpose: AgentPurpose::CommitMessage,
            workdir: self.root.to_path_buf(),
            prompt,
            log_path: artifacts.log_path.clone(),
            output_path: artifacts.commit_message_path.clone(),
            output_schema_path: Some(schema_path),
            model: self.settings.model.clone(),
            sandbox: Some(Sandbox::ReadOnly),
            mirror_output: self.settings.print_logs,
        })?;
        if !response.succeeded() {
            return Ok(Err(StepFailure::new(
                FailureCategory::CodexError,
                format!(
                    "codex commit message generation failed ({})",
                    response.exit_code
                ),
            )));
        }
        let message = match parse_conventional_commit(&response.output) {
            Ok(message) => message,
            Err(err) => {
                return Ok(Err(StepFailure::new(
                    FailureCategory::CodexError,
                    format!("invalid commit message: {err:#}"),
                )));
            }
        };

        let committed = (|| -> Result<String> {
            self.git.commit_staged(&message.subject, &message.body)?;
            self.git.head_commit()
        })();
        match committed {
            Ok(hash) => {
                info!(commit = %hash, subject = %message.subject, "committed step");
                Ok(Ok(hash))
            }
            Err(err) => Ok(Err(git_failure("commit", &err))),
        }
    }
}

impl<A: AgentInvoker, G: GateRunner> TaskExecutor for TaskRunner<'_, A, G> {
    fn execute_task(&self, request: TaskRequest<'_>) -> Result<AttemptResult> {
        self.execute_task_with_retry(request)
    }
}

fn git_failure(action: &str, err: &anyhow::Error) -> StepFailure {
    StepFailure::new(
        FailureCategory::GitConflict,
        format!("{action} failed: {err:#}"),
    )
}
