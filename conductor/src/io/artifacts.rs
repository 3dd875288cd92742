//! Per-step artifact paths, append-only logs, and the hand-off document.
//!
//! Artifacts are product output: they are always written and are independent
//! of `RUST_LOG` tracing.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};

use crate::core::plan::{PlanPhase, PlanTask};
use crate::core::types::{AgentRole, AttemptResult};
use crate::io::run_state::RunState;

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Replace anything outside `[a-zA-Z0-9._-]` with `-`.
pub fn sanitize_for_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Files produced by one agent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepArtifacts {
    pub log_path: PathBuf,
    pub message_path: PathBuf,
    pub commit_message_path: PathBuf,
}

impl StepArtifacts {
    /// `<dir>/<phase>/<task>.attempt-<n>.step-<nn>.<role>.{log,md,commit.json}`
    pub fn new(
        log_dir: &Path,
        message_dir: &Path,
        phase_id: &str,
        task_id: &str,
        attempt: u32,
        step_sequence: u32,
        role: AgentRole,
    ) -> Self {
        let phase = sanitize_for_filename(phase_id);
        let base = format!(
            "{}.attempt-{attempt}.step-{step_sequence:02}.{}",
            sanitize_for_filename(task_id),
            sanitize_for_filename(role.as_str())
        );
        Self {
            log_path: log_dir.join(&phase).join(format!("{base}.log")),
            message_path: message_dir.join(&phase).join(format!("{base}.md")),
            commit_message_path: message_dir.join(&phase).join(format!("{base}.commit.json")),
        }
    }
}

/// Append a timestamped `### <time> <title>` section, creating parent dirs.
pub fn append_log(path: &Path, title: &str, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let section = format!("\n### {} {title}\n\n{}\n", timestamp_now(), body.trim_end());
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))?;
    file.write_all(section.as_bytes())
        .with_context(|| format!("append log {}", path.display()))
}

/// `(empty)` placeholder used in log sections.
pub(crate) fn or_empty(text: &str) -> &str {
    if text.is_empty() { "(empty)" } else { text }
}

pub struct HandoffRequest<'a> {
    pub state: &'a RunState,
    pub state_path: &'a Path,
    pub phase: &'a PlanPhase,
    pub task: &'a PlanTask,
    pub failure: &'a AttemptResult,
}

/// Render the hand-off document for a blocked run.
pub fn render_handoff(request: &HandoffRequest<'_>) -> String {
    let HandoffRequest {
        state,
        state_path,
        phase,
        task,
        failure,
    } = request;
    let title = task.title.split_whitespace().collect::<Vec<_>>().join(" ");
    let category = failure
        .failure_category
        .map_or("unknown", |category| category.as_str());
    let details = failure
        .failure_details
        .as_deref()
        .unwrap_or("No details captured");

    let mut lines = vec![
        "# Conductor Handoff".to_string(),
        String::new(),
        format!("Run ID: {}", state.run_id),
        format!("Branch: {}", state.branch),
        format!("Phase: {} - {}", phase.id, phase.name),
        format!("Blocked Task: {} - {title}", task.id),
        format!("Failure Category: {category}"),
        format!("Failure Details: {details}"),
        String::new(),
        "## Suggested Follow-up Task".to_string(),
        String::new(),
        format!("- id: {}-fix-1", task.id),
        format!("- title: Fix {} and complete acceptance criteria", task.id),
        format!(
            "- description: Investigate failure logs, patch implementation for {}, rerun quality gates, then resume the run.",
            task.id
        ),
        String::new(),
        "## Runtime Artifacts".to_string(),
        String::new(),
        format!("- State: {}", state_path.display()),
        format!("- Logs root: {}", state.log_dir.display()),
        format!("- Messages root: {}", state.message_dir.display()),
    ];
    if let Some(task_state) = state.task(&phase.id, &task.id) {
        if let Some(log) = &task_state.last_log_path {
            lines.push(format!("- Last log: {}", log.display()));
        }
        if let Some(message) = &task_state.last_message_path {
            lines.push(format!("- Last message: {}", message.display()));
        }
    }
    lines.extend([
        String::new(),
        "## Resume Command".to_string(),
        String::new(),
        format!(
            "conductor resume --state {} --allow-dirty",
            state_path.display()
        ),
        String::new(),
    ]);
    lines.join("\n")
}

/// Write the hand-off document to `state.handoff_path`.
pub fn write_handoff(request: &HandoffRequest<'_>) -> Result<()> {
    let path = &request.state.handoff_path;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create handoff dir {}", parent.display()))?;
    }
    fs::write(path, render_handoff(request))
        .with_context(|| format!("write handoff {}", path.display()))
}
