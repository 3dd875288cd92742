//! Test-only helpers: fixture repositories, plans, and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;

use crate::core::plan::{PlanDocument, PlanPhase, PlanTask, PlanTaskStatus};
use crate::core::types::AgentRole;
use crate::io::agent::{AgentInvoker, AgentPurpose, AgentRequest, AgentResponse};
use crate::io::quality_gates::{GateReport, GateRequest, GateRunner};
use crate::io::run_state::{
    RunPaths, RunState, ensure_run_directories, ensure_runs_dir, save_run_state,
};

pub const PLAN_REL_PATH: &str = "docs/ideation/PLAN.md";
pub const TASKS_REL_PATH: &str = "docs/ideation/tasks.json";
pub const RUNS_REL_DIR: &str = ".conductor/runs";

fn task(id: &str, title: &str) -> PlanTask {
    PlanTask {
        id: id.to_string(),
        status: PlanTaskStatus::Todo,
        title: title.to_string(),
        description: format!("{title} with tests."),
        notes: Vec::new(),
    }
}

/// Two phases, three `todo` tasks.
pub fn sample_plan() -> PlanDocument {
    PlanDocument {
        idea: "Greeting toolkit".to_string(),
        generated_at: "2026-01-01T00:00:00.000Z".to_string(),
        repo: "greetings".to_string(),
        phases: vec![
            PlanPhase {
                id: "phase-1".to_string(),
                name: "Foundation".to_string(),
                goal: "Core modules exist".to_string(),
                exit_criteria: vec![
                    "greeting module exists".to_string(),
                    "farewell module exists".to_string(),
                ],
                tasks: vec![
                    task("task-001", "Create greeting module"),
                    task("task-002", "Add farewell module"),
                ],
            },
            PlanPhase {
                id: "phase-2".to_string(),
                name: "Polish".to_string(),
                goal: "Modules are documented".to_string(),
                exit_criteria: vec!["README describes modules".to_string()],
                tasks: vec![task("task-003", "Document modules")],
            },
        ],
    }
}

/// Write `document` as pretty JSON, creating parent directories.
pub fn write_plan(path: &Path, document: &PlanDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut payload = serde_json::to_string_pretty(document)?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// A throwaway git repository with one commit on `main`.
pub struct TestRepo {
    temp: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let repo = Self {
            temp: tempfile::tempdir().context("create temp repo")?,
        };
        repo.git(&["init", "-q", "-b", "main"])?;
        repo.git(&["config", "user.email", "dev@example.com"])?;
        repo.git(&["config", "user.name", "Fixture Dev"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("README.md", "# greetings\n")?;
        repo.commit_all("chore(repo): initial commit")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Run git in the repository and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-q", "-m", message])?;
        Ok(())
    }

    /// Commit `document` and a stub PLAN.md under `docs/ideation/`.
    ///
    /// Returns `(plan_path, tasks_path)`.
    pub fn add_plan(&self, document: &PlanDocument) -> Result<(PathBuf, PathBuf)> {
        let plan_path = self.path().join(PLAN_REL_PATH);
        let tasks_path = self.path().join(TASKS_REL_PATH);
        write_plan(&tasks_path, document)?;
        self.write_file(PLAN_REL_PATH, &format!("# {}\n", document.idea))?;
        self.commit_all("docs(plan): add greeting plan")?;
        Ok((plan_path, tasks_path))
    }

    /// Persist a fresh run record for `document` under the runs directory.
    pub fn start_state(
        &self,
        document: &PlanDocument,
        retry_limit: u32,
    ) -> Result<(RunPaths, RunState)> {
        let runs_dir = self.path().join(RUNS_REL_DIR);
        ensure_runs_dir(&runs_dir)?;
        let paths = RunPaths::new(&runs_dir, "test-run");
        let mut state = RunState::initial(
            document,
            "test-run",
            "main",
            &self.path().join(PLAN_REL_PATH),
            &self.path().join(TASKS_REL_PATH),
            retry_limit,
            &paths,
        );
        ensure_run_directories(&state)?;
        save_run_state(&paths.state_path, &mut state)?;
        Ok((paths, state))
    }

    /// Commit subjects, newest first.
    pub fn commit_subjects(&self) -> Result<Vec<String>> {
        Ok(self
            .git(&["log", "--format=%s"])?
            .lines()
            .map(str::to_string)
            .collect())
    }
}

/// One scripted agent reply.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    pub exit_code: i32,
    pub output: String,
    /// Files (relative to the workdir) written before replying.
    pub writes: Vec<(String, String)>,
}

impl ScriptedReply {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
            writes: Vec::new(),
        }
    }

    pub fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            output: String::new(),
            writes: Vec::new(),
        }
    }

    pub fn with_write(mut self, rel: impl Into<String>, contents: impl Into<String>) -> Self {
        self.writes.push((rel.into(), contents.into()));
        self
    }
}

pub const DONE_DECISION: &str = r#"{"status":"DONE","notes":[]}"#;
pub const COMMIT_MESSAGE: &str = r#"{"subject":"feat(greeting): add greeting module","body":""}"#;

type ReplyFn = dyn Fn(&AgentRequest, usize) -> ScriptedReply;

/// Agent invoker driven by a closure; records every request.
///
/// The closure receives the request and the zero-based call index.
pub struct ScriptedAgent {
    reply: Box<ReplyFn>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(reply: impl Fn(&AgentRequest, usize) -> ScriptedReply + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Mutating steps write one new file each (named after the step log), the
    /// verifier accepts, and commit messages are valid.
    pub fn happy_path() -> Self {
        Self::new(|request, index| match request.purpose {
            AgentPurpose::Step(AgentRole::Verifier) => ScriptedReply::ok(DONE_DECISION),
            AgentPurpose::Step(role) => {
                let stem = request.log_path.file_stem().map_or_else(
                    || format!("{role}-{index}"),
                    |stem| stem.to_string_lossy().into_owned(),
                );
                ScriptedReply::ok("done")
                    .with_write(format!("src/{stem}.txt"), format!("{role} {index}\n"))
            }
            AgentPurpose::CommitMessage => ScriptedReply::ok(COMMIT_MESSAGE),
        })
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    /// Prompts sent for `purpose`, in call order.
    pub fn prompts_for(&self, purpose: AgentPurpose) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.purpose == purpose)
            .map(|request| request.prompt.clone())
            .collect()
    }
}

impl AgentInvoker for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let index = self.requests.borrow().len();
        self.requests.borrow_mut().push(request.clone());
        let reply = (self.reply)(request, index);

        for (rel, contents) in &reply.writes {
            let path = request.workdir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&request.output_path, &reply.output)?;

        Ok(AgentResponse {
            exit_code: reply.exit_code,
            stdout: String::new(),
            stderr: String::new(),
            output: reply.output,
        })
    }
}

/// Gate runner that replays queued reports, passing once the queue is empty.
#[derive(Default)]
pub struct ScriptedGateRunner {
    reports: RefCell<VecDeque<GateReport>>,
    calls: Cell<usize>,
}

impl ScriptedGateRunner {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn new(reports: Vec<GateReport>) -> Self {
        Self {
            reports: RefCell::new(reports.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl GateRunner for ScriptedGateRunner {
    fn run(&self, _request: &GateRequest) -> Result<GateReport> {
        self.calls.set(self.calls.get() + 1);
        Ok(self
            .reports
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(GateReport::pass))
    }
}
