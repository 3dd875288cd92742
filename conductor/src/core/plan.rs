//! Plan document model (read-only input).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Input status recorded in the plan for each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTaskStatus {
    Todo,
    Done,
    Pending,
}

impl PlanTaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Done => "done",
            Self::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub status: PlanTaskStatus,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPhase {
    pub id: String,
    pub name: String,
    pub goal: String,
    #[serde(default)]
    pub exit_criteria: Vec<String>,
    pub tasks: Vec<PlanTask>,
}

/// Ordered phases and tasks the run works through. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDocument {
    pub idea: String,
    pub generated_at: String,
    pub repo: String,
    pub phases: Vec<PlanPhase>,
}

impl PlanDocument {
    pub fn phase(&self, phase_id: &str) -> Option<&PlanPhase> {
        self.phases.iter().find(|phase| phase.id == phase_id)
    }
}

/// Check identifier uniqueness (phase ids, and task ids across the plan).
///
/// Returns one message per violation; empty means valid.
pub fn validate_plan(document: &PlanDocument) -> Vec<String> {
    let mut errors = Vec::new();
    let mut phase_ids = HashSet::new();
    let mut task_ids = HashSet::new();
    for phase in &document.phases {
        if !phase_ids.insert(phase.id.as_str()) {
            errors.push(format!("duplicate phase id '{}'", phase.id));
        }
        for task in &phase.tasks {
            if !task_ids.insert(task.id.as_str()) {
                errors.push(format!(
                    "duplicate task id '{}' (phase '{}')",
                    task.id, phase.id
                ));
            }
        }
    }
    errors
}

/// Render the dry-run listing, honoring optional phase and task caps.
pub fn dry_run_listing(
    document: &PlanDocument,
    max_phases: Option<u32>,
    max_tasks: Option<u32>,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut tasks_listed = 0u32;
    let phases = document
        .phases
        .iter()
        .take(max_phases.map_or(usize::MAX, |cap| cap as usize));
    for phase in phases {
        if max_tasks.is_some_and(|cap| tasks_listed >= cap) {
            break;
        }
        lines.push(format!("{} | {}", phase.id, phase.name));
        for task in &phase.tasks {
            if max_tasks.is_some_and(|cap| tasks_listed >= cap) {
                break;
            }
            lines.push(format!(
                "  - {} [{}] {}",
                task.id,
                task.status.as_str(),
                task.title
            ));
            tasks_listed += 1;
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_plan;

    #[test]
    fn deserializes_camel_case_document() {
        let raw = r#"{
            "idea": "todo app",
            "generatedAt": "2026-01-01T00:00:00Z",
            "repo": "acme/todo",
            "phases": [{
                "id": "phase-1",
                "name": "Foundation",
                "goal": "Set up",
                "exitCriteria": ["builds"],
                "tasks": [{"id": "task-001", "status": "todo", "title": "Init", "description": "d", "notes": []}]
            }]
        }"#;
        let doc: PlanDocument = serde_json::from_str(raw).expect("parse");
        assert_eq!(doc.generated_at, "2026-01-01T00:00:00Z");
        assert_eq!(doc.phases[0].exit_criteria, vec!["builds".to_string()]);
        assert_eq!(doc.phases[0].tasks[0].status, PlanTaskStatus::Todo);
    }

    #[test]
    fn reports_duplicate_ids() {
        let mut doc = sample_plan();
        let dup_task = doc.phases[0].tasks[0].clone();
        doc.phases[1].tasks.push(dup_task);
        let dup_phase = doc.phases[0].clone();
        doc.phases.push(dup_phase);

        let errors = validate_plan(&doc);
        assert!(errors.iter().any(|err| err.contains("duplicate phase id")));
        assert!(errors.iter().any(|err| err.contains("duplicate task id")));
    }

    #[test]
    fn dry_run_lists_all_phases_and_tasks() {
        let doc = sample_plan();
        let lines = dry_run_listing(&doc, None, None);
        assert_eq!(
            lines,
            vec![
                "phase-1 | Foundation".to_string(),
                "  - task-001 [todo] Create greeting module".to_string(),
                "  - task-002 [todo] Add farewell module".to_string(),
                "phase-2 | Polish".to_string(),
                "  - task-003 [todo] Document modules".to_string(),
            ]
        );
    }

    #[test]
    fn dry_run_honors_caps() {
        let doc = sample_plan();
        let lines = dry_run_listing(&doc, Some(1), None);
        assert_eq!(lines.len(), 3);

        let lines = dry_run_listing(&doc, None, Some(1));
        assert_eq!(
            lines,
            vec![
                "phase-1 | Foundation".to_string(),
                "  - task-001 [todo] Create greeting module".to_string(),
            ]
        );
    }
}
