//! Shared deterministic types for the task-execution engine.
//!
//! These types define stable contracts between the orchestration layers and
//! the persisted run record. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregate status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Blocked,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

/// Runtime status of a task.
///
/// Within one attempt a task only moves `Pending`/`Failed` -> `Running` ->
/// `Passed`|`Failed`. `Passed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Blocked,
}

/// Step-level failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Agent executable exited non-zero or produced an unusable structured response.
    CodexError,
    /// A project verification command failed.
    QualityGate,
    /// A mutating step left the repository unchanged.
    NoChanges,
    /// A version-control operation failed; also the fallback bucket.
    GitConflict,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodexError => "codex_error",
            Self::QualityGate => "quality_gate",
            Self::NoChanges => "no_changes",
            Self::GitConflict => "git_conflict",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent roles that participate in an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Implementer,
    Verifier,
    Refactor,
    BugFixer,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Implementer => "implementer",
            Self::Verifier => "verifier",
            Self::Refactor => "refactor",
            Self::BugFixer => "bug_fixer",
        }
    }

    /// Whether this role is expected to modify the worktree.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::Verifier)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sandbox policy passed through to the agent executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Sandbox {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl Sandbox {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::WorkspaceWrite => "workspace-write",
            Self::DangerFullAccess => "danger-full-access",
        }
    }
}

/// Verdict returned by the verifier role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierStatus {
    Done,
    Refactor,
    Issues,
}

impl VerifierStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Refactor => "REFACTOR",
            Self::Issues => "ISSUES",
        }
    }
}

/// Parsed verifier decision. `notes` is non-empty unless `status` is `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierDecision {
    pub status: VerifierStatus,
    pub notes: Vec<String>,
}

/// Validated conventional commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub subject: String,
    pub body: String,
}

/// Expected failure of a single agent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub category: FailureCategory,
    pub details: String,
    /// Name of the failing quality gate, for `QualityGate` failures.
    pub gate: Option<String>,
}

impl StepFailure {
    pub fn new(category: FailureCategory, details: impl Into<String>) -> Self {
        Self {
            category,
            details: details.into(),
            gate: None,
        }
    }

    pub fn quality_gate(gate: Option<String>, details: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::QualityGate,
            details: details.into(),
            gate,
        }
    }
}

/// Outcome of a step: the value on success, or a categorized failure.
///
/// Infrastructure errors (state persistence, missing executables) are not
/// step failures and travel through the outer `anyhow::Result` instead.
pub type StepResult<T> = Result<T, StepFailure>;

/// Final result of running a task through its retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub success: bool,
    pub commit_hash: Option<String>,
    pub changed_files: Vec<String>,
    pub failure_category: Option<FailureCategory>,
    pub failure_details: Option<String>,
}

impl AttemptResult {
    pub fn passed(commit_hash: Option<String>, changed_files: Vec<String>) -> Self {
        Self {
            success: true,
            commit_hash,
            changed_files,
            failure_category: None,
            failure_details: None,
        }
    }

    pub fn failed(
        changed_files: Vec<String>,
        category: FailureCategory,
        details: Option<String>,
    ) -> Self {
        Self {
            success: false,
            commit_hash: None,
            changed_files,
            failure_category: Some(category),
            failure_details: details,
        }
    }
}
