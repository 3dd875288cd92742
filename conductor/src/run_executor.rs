//! Walks the plan phase by phase and task by task.
//!
//! Completed phases and passed tasks are skipped, so re-entering a run picks
//! up at the first unfinished task. A task that exhausts its retry budget
//! blocks its phase and the run, and execution stops there.

use std::fmt;
use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, instrument, warn};

use crate::core::plan::PlanDocument;
use crate::core::types::{AttemptResult, PhaseStatus, RunStatus, TaskStatus};
use crate::io::artifacts::{HandoffRequest, write_handoff};
use crate::io::run_state::{RunState, save_run_state};
use crate::task_runner::{TaskExecutor, TaskRequest};

/// Optional caps on work done by one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLimits {
    pub max_phases: Option<u32>,
    pub max_tasks: Option<u32>,
}

/// Why execution stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    Completed,
    Blocked {
        phase_id: String,
        task_id: String,
        failure: AttemptResult,
    },
    /// Soft pause: the run stays `running` and can be resumed.
    TaskLimitReached,
    PhaseLimitReached,
}

impl fmt::Display for RunStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Blocked {
                phase_id, task_id, ..
            } => write!(f, "blocked on {phase_id}/{task_id}"),
            Self::TaskLimitReached => f.write_str("task limit reached"),
            Self::PhaseLimitReached => f.write_str("phase limit reached"),
        }
    }
}

/// Execute the run until it completes, blocks, or hits a cap.
///
/// The record is persisted at every phase and task boundary.
#[instrument(skip_all, fields(run_id = %state.run_id))]
pub fn execute_run<T: TaskExecutor>(
    state: &mut RunState,
    state_path: &Path,
    document: &PlanDocument,
    limits: RunLimits,
    executor: &T,
) -> Result<RunStop> {
    state.check_covers(document)?;
    let mut phases_visited = 0u32;
    let mut tasks_visited = 0u32;
    let mut phase_cap_hit = false;

    for phase in &document.phases {
        if state.phase_mut(&phase.id)?.status == PhaseStatus::Completed {
            continue;
        }
        if limits.max_phases.is_some_and(|max| phases_visited >= max) {
            info!(phases_visited, "phase limit reached");
            phase_cap_hit = true;
            break;
        }
        phases_visited += 1;
        state.phase_mut(&phase.id)?.status = PhaseStatus::InProgress;
        save_run_state(state_path, state)?;
        info!(phase = %phase.id, "phase started");

        for task in &phase.tasks {
            if state.task_mut(&phase.id, &task.id)?.status == TaskStatus::Passed {
                continue;
            }
            if limits.max_tasks.is_some_and(|max| tasks_visited >= max) {
                info!(tasks_visited, "task limit reached");
                save_run_state(state_path, state)?;
                return Ok(RunStop::TaskLimitReached);
            }
            tasks_visited += 1;

            let retry_limit = state.retry_limit;
            let result = executor.execute_task(TaskRequest {
                state: &mut *state,
                state_path,
                phase,
                task,
                retry_limit,
            })?;

            if result.success {
                state.task_mut(&phase.id, &task.id)?.status = TaskStatus::Passed;
                continue;
            }

            warn!(
                phase = %phase.id,
                task = %task.id,
                category = ?result.failure_category,
                "task exhausted its retry budget; blocking run"
            );
            state.task_mut(&phase.id, &task.id)?.status = TaskStatus::Blocked;
            state.phase_mut(&phase.id)?.status = PhaseStatus::Blocked;
            state.status = RunStatus::Blocked;
            write_handoff(&HandoffRequest {
                state: &*state,
                state_path,
                phase,
                task,
                failure: &result,
            })?;
            save_run_state(state_path, state)?;
            return Ok(RunStop::Blocked {
                phase_id: phase.id.clone(),
                task_id: task.id.clone(),
                failure: result,
            });
        }

        let all_passed = phase.tasks.iter().all(|task| {
            state
                .task(&phase.id, &task.id)
                .is_some_and(|task| task.status == TaskStatus::Passed)
        });
        if all_passed {
            state.phase_mut(&phase.id)?.status = PhaseStatus::Completed;
            info!(phase = %phase.id, "phase completed");
        }
        save_run_state(state_path, state)?;
    }

    if state
        .phases
        .iter()
        .all(|phase| phase.status == PhaseStatus::Completed)
    {
        state.status = RunStatus::Completed;
        save_run_state(state_path, state)?;
        return Ok(RunStop::Completed);
    }
    if !phase_cap_hit {
        bail!("run {} has unfinished phases after every planned phase ran", state.run_id);
    }
    Ok(RunStop::PhaseLimitReached)
}
