//! Durable run record (`<runs_dir>/<run-id>.state.json`).
//!
//! The record is the single source of truth for a run. It is rewritten in full
//! (temp file + rename) after every meaningful transition so an interrupted
//! run resumes from the last persisted boundary.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::plan::{PlanDocument, PlanTaskStatus};
use crate::core::types::{PhaseStatus, RunStatus, TaskStatus};
use crate::io::artifacts::timestamp_now;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub id: String,
    pub name: String,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub id: String,
    pub phase_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_codex_exit_code: Option<i32>,
    /// Name of the quality gate that failed the last attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_quality_gate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_log_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_path: Option<PathBuf>,
}

/// Persisted record for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub schema_version: u32,
    pub run_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub status: RunStatus,
    pub branch: String,
    pub plan_path: PathBuf,
    pub tasks_path: PathBuf,
    pub retry_limit: u32,
    pub run_dir: PathBuf,
    pub log_dir: PathBuf,
    pub message_dir: PathBuf,
    pub handoff_path: PathBuf,
    pub phases: Vec<PhaseState>,
    pub tasks: Vec<TaskState>,
}

/// Filesystem layout for one run under the runs directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub state_path: PathBuf,
    pub run_dir: PathBuf,
    pub log_dir: PathBuf,
    pub message_dir: PathBuf,
    pub handoff_path: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let run_dir = runs_dir.join(run_id);
        Self {
            state_path: runs_dir.join(format!("{run_id}.state.json")),
            log_dir: run_dir.join("logs"),
            message_dir: run_dir.join("messages"),
            handoff_path: run_dir.join("HANDOFF.md"),
            run_dir,
        }
    }
}

/// Timestamp-based run id (`YYYYMMDD-HHMMSS`, local time).
pub fn timestamp_run_id() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

impl RunState {
    /// Build the initial record for a fresh run.
    ///
    /// Tasks already `done` in the plan start `passed`; a phase whose tasks are
    /// all done starts `completed`.
    pub fn initial(
        document: &PlanDocument,
        run_id: &str,
        branch: &str,
        plan_path: &Path,
        tasks_path: &Path,
        retry_limit: u32,
        paths: &RunPaths,
    ) -> Self {
        let now = timestamp_now();
        let phases = document
            .phases
            .iter()
            .map(|phase| PhaseState {
                id: phase.id.clone(),
                name: phase.name.clone(),
                status: if phase
                    .tasks
                    .iter()
                    .all(|task| task.status == PlanTaskStatus::Done)
                {
                    PhaseStatus::Completed
                } else {
                    PhaseStatus::Pending
                },
            })
            .collect();
        let tasks = document
            .phases
            .iter()
            .flat_map(|phase| {
                phase.tasks.iter().map(move |task| TaskState {
                    id: task.id.clone(),
                    phase_id: phase.id.clone(),
                    title: task.title.clone(),
                    status: if task.status == PlanTaskStatus::Done {
                        TaskStatus::Passed
                    } else {
                        TaskStatus::Pending
                    },
                    attempts: 0,
                    last_error: None,
                    last_codex_exit_code: None,
                    last_quality_gate: None,
                    last_commit: None,
                    changed_files: Vec::new(),
                    last_log_path: None,
                    last_message_path: None,
                })
            })
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
            status: RunStatus::Running,
            branch: branch.to_string(),
            plan_path: plan_path.to_path_buf(),
            tasks_path: tasks_path.to_path_buf(),
            retry_limit,
            run_dir: paths.run_dir.clone(),
            log_dir: paths.log_dir.clone(),
            message_dir: paths.message_dir.clone(),
            handoff_path: paths.handoff_path.clone(),
            phases,
            tasks,
        }
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseState> {
        self.phases.iter().find(|phase| phase.id == phase_id)
    }

    pub fn task(&self, phase_id: &str, task_id: &str) -> Option<&TaskState> {
        self.tasks
            .iter()
            .find(|task| task.phase_id == phase_id && task.id == task_id)
    }

    /// Mutable phase lookup that fails when the record has no such phase.
    pub fn phase_mut(&mut self, phase_id: &str) -> Result<&mut PhaseState> {
        self.phases
            .iter_mut()
            .find(|phase| phase.id == phase_id)
            .ok_or_else(|| anyhow!("phase runtime state not found: {phase_id}"))
    }

    /// Mutable task lookup that fails when the record has no such task.
    pub fn task_mut(&mut self, phase_id: &str, task_id: &str) -> Result<&mut TaskState> {
        self.tasks
            .iter_mut()
            .find(|task| task.phase_id == phase_id && task.id == task_id)
            .ok_or_else(|| anyhow!("task runtime state not found: {phase_id}/{task_id}"))
    }

    /// Check structural invariants; returns one message per violation.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut phase_ids = HashSet::new();
        for phase in &self.phases {
            if !phase_ids.insert(phase.id.as_str()) {
                errors.push(format!("duplicate phase id '{}'", phase.id));
            }
        }
        let mut task_keys = HashSet::new();
        for task in &self.tasks {
            if !phase_ids.contains(task.phase_id.as_str()) {
                errors.push(format!(
                    "task '{}' references unknown phase '{}'",
                    task.id, task.phase_id
                ));
            }
            if !task_keys.insert((task.phase_id.as_str(), task.id.as_str())) {
                errors.push(format!("duplicate task id '{}'", task.id));
            }
        }
        errors
    }

    /// Check that plan and run record list the same phases and tasks.
    pub fn check_covers(&self, document: &PlanDocument) -> Result<()> {
        for phase in &document.phases {
            if self.phase(&phase.id).is_none() {
                bail!("phase runtime state not found: {}", phase.id);
            }
            for task in &phase.tasks {
                if self.task(&phase.id, &task.id).is_none() {
                    bail!("task runtime state not found: {}/{}", phase.id, task.id);
                }
            }
        }
        for phase in &self.phases {
            if document.phase(&phase.id).is_none() {
                bail!("phase {} is not in the plan", phase.id);
            }
        }
        for task in &self.tasks {
            let planned = document
                .phase(&task.phase_id)
                .is_some_and(|phase| phase.tasks.iter().any(|planned| planned.id == task.id));
            if !planned {
                bail!("task {}/{} is not in the plan", task.phase_id, task.id);
            }
        }
        Ok(())
    }

    /// Reopen a blocked run so the blocked task gets a fresh retry budget.
    ///
    /// Returns the reopened task ids.
    pub fn reopen_blocked(&mut self) -> Vec<String> {
        if self.status != RunStatus::Blocked {
            return Vec::new();
        }
        self.status = RunStatus::Running;
        for phase in &mut self.phases {
            if phase.status == PhaseStatus::Blocked {
                phase.status = PhaseStatus::InProgress;
            }
        }
        let mut reopened = Vec::new();
        for task in &mut self.tasks {
            if task.status == TaskStatus::Blocked {
                task.status = TaskStatus::Pending;
                task.attempts = 0;
                reopened.push(task.id.clone());
            }
        }
        reopened
    }
}

/// Load a run record, rejecting unsupported schema versions and broken invariants.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    let version = value.get("schemaVersion").and_then(Value::as_u64);
    if version != Some(u64::from(SCHEMA_VERSION)) {
        bail!(
            "unsupported run state schema version {} in {}",
            version.map_or_else(|| "(missing)".to_string(), |v| v.to_string()),
            path.display()
        );
    }
    let state: RunState = serde_json::from_value(value)
        .with_context(|| format!("deserialize run state {}", path.display()))?;
    let errors = state.validate();
    if !errors.is_empty() {
        bail!(
            "run state invariants failed in {}:\n- {}",
            path.display(),
            errors.join("\n- ")
        );
    }
    debug!(run_id = %state.run_id, status = %state.status, "run state loaded");
    Ok(state)
}

/// Stamp `updated_at` and atomically rewrite the full record.
pub fn save_run_state(path: &Path, state: &mut RunState) -> Result<()> {
    state.updated_at = timestamp_now();
    debug!(path = %path.display(), run_id = %state.run_id, status = %state.status, "writing run state");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Create the log and message directories for a run.
pub fn ensure_run_directories(state: &RunState) -> Result<()> {
    for dir in [&state.run_dir, &state.log_dir, &state.message_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    Ok(())
}

/// Create `runs_dir` with a `.gitignore` that hides every run artifact from git.
pub fn ensure_runs_dir(runs_dir: &Path) -> Result<()> {
    fs::create_dir_all(runs_dir)
        .with_context(|| format!("create runs directory {}", runs_dir.display()))?;
    let gitignore = runs_dir.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, "*\n")
            .with_context(|| format!("write {}", gitignore.display()))?;
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}
