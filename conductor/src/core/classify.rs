//! Deterministic classification of a task whose retry budget is exhausted.

use crate::core::types::FailureCategory;

/// Marker the task runner writes for mutating steps that changed nothing.
pub const NO_CHANGES_MARKER: &str = "No repository changes";

/// Fields of the task's runtime record that drive the final category.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureEvidence<'a> {
    pub last_quality_gate: Option<&'a str>,
    pub last_codex_exit_code: Option<i32>,
    pub last_error: Option<&'a str>,
}

/// Classify by priority: quality gate, agent exit code, no-changes text, then
/// version control as the fallback.
pub fn classify_exhausted_failure(evidence: FailureEvidence<'_>) -> FailureCategory {
    if evidence.last_quality_gate.is_some() {
        return FailureCategory::QualityGate;
    }
    if evidence.last_codex_exit_code.is_some_and(|code| code != 0) {
        return FailureCategory::CodexError;
    }
    if evidence
        .last_error
        .is_some_and(|err| err.contains(NO_CHANGES_MARKER))
    {
        return FailureCategory::NoChanges;
    }
    FailureCategory::GitConflict
}
