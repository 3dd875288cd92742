//! Deterministic prompt construction per agent role.
//!
//! Rendering is pure: the same inputs always produce the same prompt text.

use std::path::Path;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::plan::{PlanPhase, PlanTask};
use crate::core::types::AgentRole;

const CONTEXT_TEMPLATE: &str = include_str!("prompts/context.md");
const IMPLEMENTER_TEMPLATE: &str = include_str!("prompts/implementer.md");
const VERIFIER_TEMPLATE: &str = include_str!("prompts/verifier.md");
const REFACTOR_TEMPLATE: &str = include_str!("prompts/refactor.md");
const BUG_FIXER_TEMPLATE: &str = include_str!("prompts/bug_fixer.md");
const COMMIT_MESSAGE_TEMPLATE: &str = include_str!("prompts/commit_message.md");

/// Inputs shared by every role prompt.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub plan_path: &'a Path,
    pub tasks_path: &'a Path,
    pub phase: &'a PlanPhase,
    pub task: &'a PlanTask,
    pub attempt: u32,
    pub max_attempts: u32,
    pub verifier_cycle: u32,
    pub max_verifier_cycles: u32,
    /// Notes carried from the last verifier decision.
    pub notes: &'a [String],
    /// Prior attempt's failure text. Only the implementer prompt renders it.
    pub failure_context: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct CommitPromptInput<'a> {
    pub task_title: &'a str,
    pub changed_files: &'a [String],
    pub diff_stat: &'a str,
    pub diff_patch: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct PhaseContext<'a> {
    id: &'a str,
    name: &'a str,
    goal: &'a str,
    exit_criteria: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
struct TaskContext<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    notes: String,
}

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("context", CONTEXT_TEMPLATE)?;
    env.add_template("implementer", IMPLEMENTER_TEMPLATE)?;
    env.add_template("verifier", VERIFIER_TEMPLATE)?;
    env.add_template("refactor", REFACTOR_TEMPLATE)?;
    env.add_template("bug_fixer", BUG_FIXER_TEMPLATE)?;
    env.add_template("commit_message", COMMIT_MESSAGE_TEMPLATE)?;
    Ok(env)
}

/// Build the prompt for `role`.
pub fn build_agent_prompt(role: AgentRole, input: &PromptInput<'_>) -> Result<String> {
    let env = environment()?;
    let template = env.get_template(role.as_str())?;
    let task_notes = if input.task.notes.is_empty() {
        "None".to_string()
    } else {
        input.task.notes.join(" | ")
    };
    let failure_context = match role {
        AgentRole::Implementer => input
            .failure_context
            .map(str::trim)
            .filter(|text| !text.is_empty()),
        _ => None,
    };
    let rendered = template.render(context! {
        phase => PhaseContext {
            id: &input.phase.id,
            name: &input.phase.name,
            goal: &input.phase.goal,
            exit_criteria: &input.phase.exit_criteria,
        },
        task => TaskContext {
            id: &input.task.id,
            title: &input.task.title,
            description: &input.task.description,
            notes: task_notes,
        },
        attempt => input.attempt,
        max_attempts => input.max_attempts,
        plan_path => input.plan_path.display().to_string(),
        tasks_path => input.tasks_path.display().to_string(),
        verifier_cycle => input.verifier_cycle,
        max_verifier_cycles => input.max_verifier_cycles,
        notes => input.notes,
        failure_context => failure_context,
    })?;
    Ok(rendered)
}

/// Build the prompt asking for a `{subject, body}` commit message.
pub fn build_commit_message_prompt(input: &CommitPromptInput<'_>) -> Result<String> {
    let env = environment()?;
    let template = env.get_template("commit_message")?;
    let rendered = template.render(context! {
        task_title => input.task_title,
        changed_files => input.changed_files,
        diff_stat => non_empty_or(input.diff_stat, "(no diff stat)"),
        diff_patch => non_empty_or(input.diff_patch, "(no patch)"),
    })?;
    Ok(rendered)
}

fn non_empty_or<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = text.trim_end();
    if trimmed.is_empty() { fallback } else { trimmed }
}
