//! Task runner tests against real git repositories with scripted agents.
//!
//! Each test drives the first task of the sample plan through
//! `execute_task_with_retry` and inspects the result, the persisted run
//! record, and the repository history.

use std::fs;

use conductor::core::classify::{FailureEvidence, classify_exhausted_failure};
use conductor::core::types::{AgentRole, AttemptResult, FailureCategory, Sandbox, TaskStatus};
use conductor::io::agent::{AgentPurpose, AgentRequest};
use conductor::io::quality_gates::GateReport;
use conductor::io::run_state::{RunState, load_run_state};
use conductor::task_runner::{MAX_VERIFIER_CYCLES, TaskRequest, TaskRunner, TaskSettings};
use conductor::test_support::{
    COMMIT_MESSAGE, DONE_DECISION, ScriptedAgent, ScriptedGateRunner, ScriptedReply, TestRepo,
    sample_plan,
};

/// Run task-001 with `retry_limit`, after letting `prepare` adjust the record.
fn run_first_task(
    repo: &TestRepo,
    agent: &ScriptedAgent,
    gates: &ScriptedGateRunner,
    settings: TaskSettings,
    retry_limit: u32,
    prepare: impl FnOnce(&mut RunState),
) -> (AttemptResult, RunState) {
    let doc = sample_plan();
    let (paths, mut state) = repo.start_state(&doc, retry_limit).expect("state");
    prepare(&mut state);
    let runner = TaskRunner::new(repo.path(), agent, gates, settings);
    let result = runner
        .execute_task_with_retry(TaskRequest {
            state: &mut state,
            state_path: &paths.state_path,
            phase: &doc.phases[0],
            task: &doc.phases[0].tasks[0],
            retry_limit,
        })
        .expect("execute task");
    let persisted = load_run_state(&paths.state_path).expect("load state");
    assert_eq!(persisted, state, "every transition is persisted");
    (result, persisted)
}

/// Mutating steps write a file named after the role and call index; the
/// verifier answers with `verdict`.
fn step_reply(request: &AgentRequest, index: usize, verdict: &str) -> ScriptedReply {
    match request.purpose {
        AgentPurpose::Step(AgentRole::Verifier) => ScriptedReply::ok(verdict),
        AgentPurpose::Step(role) => ScriptedReply::ok("done")
            .with_write(format!("src/{role}-{index}.txt"), format!("{role}\n")),
        AgentPurpose::CommitMessage => ScriptedReply::ok(COMMIT_MESSAGE),
    }
}

fn skip_gates() -> TaskSettings {
    TaskSettings {
        skip_quality_gates: true,
        ..TaskSettings::default()
    }
}

#[test]
fn implementer_without_changes_fails_before_quality_gates() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::new(|_, _| ScriptedReply::ok("nothing to change"));
    let gates = ScriptedGateRunner::passing();

    let (result, state) =
        run_first_task(&repo, &agent, &gates, TaskSettings::default(), 0, |_| {});

    assert!(!result.success);
    assert_eq!(result.failure_category, Some(FailureCategory::NoChanges));
    assert_eq!(gates.calls(), 0);
    let task = &state.tasks[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 1);
    assert_eq!(
        task.last_error.as_deref(),
        Some("No repository changes detected after implementer")
    );
    let log = fs::read_to_string(task.last_log_path.as_ref().expect("log path")).expect("log");
    assert!(log.contains("Task Failure"));
}

/// Verifies implementer → commit → verifier DONE passes the task with a real commit.
#[test]
fn verifier_done_passes_task_with_commit() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::happy_path();
    let gates = ScriptedGateRunner::passing();

    let (result, state) =
        run_first_task(&repo, &agent, &gates, TaskSettings::default(), 0, |_| {});

    assert!(result.success, "{result:?}");
    let head = repo.git(&["rev-parse", "HEAD"]).expect("head");
    assert_eq!(result.commit_hash.as_deref(), Some(head.as_str()));
    assert_eq!(
        result.changed_files,
        vec!["src/task-001.attempt-1.step-01.implementer.txt"]
    );
    assert_eq!(gates.calls(), 1);

    let task = &state.tasks[0];
    assert_eq!(task.status, TaskStatus::Passed);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.last_commit.as_deref(), Some(head.as_str()));
    assert_eq!(task.last_codex_exit_code, Some(0));
    assert!(task.last_error.is_none());

    assert_eq!(
        repo.commit_subjects().expect("log")[0],
        "feat(greeting): add greeting module"
    );
    assert_eq!(repo.git(&["status", "--porcelain"]).expect("status"), "");

    let requests = agent.requests();
    let purposes: Vec<AgentPurpose> = requests.iter().map(|request| request.purpose).collect();
    assert_eq!(
        purposes,
        vec![
            AgentPurpose::Step(AgentRole::Implementer),
            AgentPurpose::CommitMessage,
            AgentPurpose::Step(AgentRole::Verifier),
        ]
    );
    assert_eq!(requests[0].sandbox, None);
    assert_eq!(requests[1].sandbox, Some(Sandbox::ReadOnly));
    assert!(
        requests[1]
            .output_path
            .to_string_lossy()
            .ends_with("task-001.attempt-1.step-01.implementer.commit.json")
    );
    assert!(
        requests[1]
            .prompt
            .contains("- src/task-001.attempt-1.step-01.implementer.txt")
    );
    assert_eq!(requests[2].sandbox, Some(Sandbox::ReadOnly));
    assert!(requests[2].output_schema_path.is_some());
    assert!(
        requests[2]
            .log_path
            .to_string_lossy()
            .ends_with("task-001.attempt-1.step-02.verifier.log")
    );
}

/// Verifies failing agent calls exhaust the budget and feed attempt 1's error to attempt 2.
#[test]
fn agent_failures_exhaust_retries_with_failure_context() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::new(|_, _| ScriptedReply::exit(9));
    let gates = ScriptedGateRunner::passing();

    let (result, state) = run_first_task(&repo, &agent, &gates, skip_gates(), 1, |_| {});

    assert!(!result.success);
    assert_eq!(result.failure_category, Some(FailureCategory::CodexError));
    assert_eq!(
        result.failure_details.as_deref(),
        Some("codex implementer failed with code 9")
    );
    let task = &state.tasks[0];
    assert_eq!(task.attempts, 2);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.last_codex_exit_code, Some(9));

    let prompts = agent.prompts_for(AgentPurpose::Step(AgentRole::Implementer));
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("previous_failure_analysis"));
    assert!(prompts[1].contains("<previous_failure_analysis>"));
    assert!(prompts[1].contains("codex implementer failed with code 9"));
    assert!(prompts[1].contains("<attempt_count>2/2</attempt_count>"));
}

#[test]
fn quality_gate_failure_records_gate_name() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::happy_path();
    let gates = ScriptedGateRunner::new(vec![GateReport::fail("lint", 2)]);

    let (result, state) =
        run_first_task(&repo, &agent, &gates, TaskSettings::default(), 0, |_| {});

    assert_eq!(result.failure_category, Some(FailureCategory::QualityGate));
    assert_eq!(result.changed_files, Vec::<String>::new());
    let task = &state.tasks[0];
    assert_eq!(task.last_quality_gate.as_deref(), Some("lint"));
    assert_eq!(task.last_error.as_deref(), Some("lint failed with exit code 2"));
    assert!(task.last_commit.is_none());
    assert_eq!(repo.commit_subjects().expect("log").len(), 1);
    assert!(
        agent
            .prompts_for(AgentPurpose::CommitMessage)
            .is_empty()
    );
}

/// Verifies REFACTOR notes reach the refactor prompt and both commits land.
#[test]
fn refactor_notes_flow_into_refactor_step() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::new(|request, index| {
        if index == 2 {
            step_reply(
                request,
                index,
                r#"{"status":"REFACTOR","notes":["extract greeting helper"]}"#,
            )
        } else {
            step_reply(request, index, DONE_DECISION)
        }
    });
    let gates = ScriptedGateRunner::passing();

    let (result, state) =
        run_first_task(&repo, &agent, &gates, TaskSettings::default(), 0, |_| {});

    assert!(result.success, "{result:?}");
    assert_eq!(
        result.changed_files,
        vec!["src/implementer-0.txt", "src/refactor-3.txt"]
    );
    assert_eq!(gates.calls(), 2);
    assert_eq!(repo.commit_subjects().expect("log").len(), 3);
    assert_eq!(state.tasks[0].changed_files, result.changed_files);

    let refactor = agent.prompts_for(AgentPurpose::Step(AgentRole::Refactor));
    assert_eq!(refactor.len(), 1);
    assert!(refactor[0].contains("- extract greeting helper"));

    let verifier = agent.prompts_for(AgentPurpose::Step(AgentRole::Verifier));
    assert_eq!(verifier.len(), 2);
    assert!(verifier[0].contains("<cycle>1 of 5</cycle>"));
    assert!(verifier[1].contains("<cycle>2 of 5</cycle>"));
    assert!(verifier[1].contains("- (No previous notes)"));
}

#[test]
fn endless_issues_hit_the_verifier_ceiling() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::new(|request, index| {
        step_reply(
            request,
            index,
            r#"{"status":"ISSUES","notes":["greeting is still wrong"]}"#,
        )
    });
    let gates = ScriptedGateRunner::passing();

    let (result, state) = run_first_task(&repo, &agent, &gates, skip_gates(), 0, |_| {});

    // Every agent call exited 0 and no gate failed, so the record classifies
    // as a version-control failure.
    assert_eq!(result.failure_category, Some(FailureCategory::GitConflict));
    assert_eq!(state.tasks[0].last_codex_exit_code, Some(0));
    assert_eq!(
        state.tasks[0].last_error.as_deref(),
        Some("Verifier exceeded max cycles (5)")
    );
    let cycles = usize::try_from(MAX_VERIFIER_CYCLES).expect("cycles");
    assert_eq!(
        agent
            .prompts_for(AgentPurpose::Step(AgentRole::Verifier))
            .len(),
        cycles
    );
    let fixes = agent.prompts_for(AgentPurpose::Step(AgentRole::BugFixer));
    assert_eq!(fixes.len(), cycles);
    assert!(fixes[0].contains("- greeting is still wrong"));
    assert_eq!(repo.commit_subjects().expect("log").len(), 1 + 1 + cycles);
}

/// Verifies the exhausted category comes from the persisted record, not the failing step.
#[test]
fn malformed_verifier_response_is_classified_from_task_record() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::new(|request, index| step_reply(request, index, "looks fine to me"));
    let gates = ScriptedGateRunner::passing();

    let (result, state) = run_first_task(&repo, &agent, &gates, skip_gates(), 0, |_| {});

    let task = &state.tasks[0];
    assert_eq!(task.last_codex_exit_code, Some(0));
    assert!(task.last_quality_gate.is_none());
    assert_eq!(
        result.failure_category,
        Some(classify_exhausted_failure(FailureEvidence {
            last_quality_gate: None,
            last_codex_exit_code: task.last_codex_exit_code,
            last_error: task.last_error.as_deref(),
        }))
    );
    assert_eq!(result.failure_category, Some(FailureCategory::GitConflict));
    assert!(
        result
            .failure_details
            .as_deref()
            .is_some_and(|details| details.starts_with("invalid verifier response"))
    );
}

#[test]
fn leaky_commit_subject_is_rejected() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::new(|request, index| match request.purpose {
        AgentPurpose::CommitMessage => {
            ScriptedReply::ok(r#"{"subject":"feat(core): finish task-001","body":""}"#)
        }
        _ => step_reply(request, index, DONE_DECISION),
    });
    let gates = ScriptedGateRunner::passing();

    let (result, state) = run_first_task(&repo, &agent, &gates, skip_gates(), 0, |_| {});

    assert_eq!(result.failure_category, Some(FailureCategory::GitConflict));
    assert!(
        state.tasks[0]
            .last_error
            .as_deref()
            .is_some_and(|err| err.starts_with("invalid commit message"))
    );
    assert_eq!(repo.commit_subjects().expect("log").len(), 1);
}

/// Verifies an interrupted task resumes at the next attempt with its stored error as context.
#[test]
fn resumed_task_continues_budget_with_recorded_failure() {
    let repo = TestRepo::new().expect("repo");
    let agent = ScriptedAgent::happy_path();
    let gates = ScriptedGateRunner::passing();

    let (result, state) = run_first_task(&repo, &agent, &gates, skip_gates(), 1, |state| {
        let task = &mut state.tasks[0];
        task.status = TaskStatus::Running;
        task.attempts = 1;
        task.last_error = Some("lint failed with exit code 1".to_string());
    });

    assert!(result.success, "{result:?}");
    assert_eq!(state.tasks[0].attempts, 2);
    let prompts = agent.prompts_for(AgentPurpose::Step(AgentRole::Implementer));
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("lint failed with exit code 1"));
    assert!(prompts[0].contains("<attempt_count>2/2</attempt_count>"));
}
