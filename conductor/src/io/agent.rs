//! Agent invocation abstraction.
//!
//! The [`AgentInvoker`] trait decouples the task runner from the agent backend
//! (currently `codex exec`). Tests use scripted invokers that return
//! predetermined outputs without spawning processes.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{AgentRole, Sandbox};
use crate::io::artifacts::{append_log, or_empty};
use crate::io::process::run_command;

/// Why the agent is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPurpose {
    Step(AgentRole),
    CommitMessage,
}

impl AgentPurpose {
    pub fn log_title(self) -> String {
        match self {
            Self::Step(role) => format!("Agent {role}"),
            Self::CommitMessage => "Commit Message".to_string(),
        }
    }
}

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub purpose: AgentPurpose,
    /// Repository root the agent works in.
    pub workdir: PathBuf,
    /// Prompt text fed on stdin.
    pub prompt: String,
    /// Step log that receives the exchange.
    pub log_path: PathBuf,
    /// Where the agent writes its final message.
    pub output_path: PathBuf,
    /// Optional JSON Schema constraining the final message.
    pub output_schema_path: Option<PathBuf>,
    pub model: Option<String>,
    pub sandbox: Option<Sandbox>,
    /// Mirror agent output live to the terminal.
    pub mirror_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Final message: the output file's contents, or stdout when it is missing.
    pub output: String,
}

impl AgentResponse {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Abstraction over agent execution backends.
pub trait AgentInvoker {
    /// Run the agent. A non-zero exit is reported in the response, not as an error.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse>;
}

/// Invoker that spawns `<program> exec` (the codex CLI).
#[derive(Debug, Clone)]
pub struct CodexInvoker {
    program: String,
}

impl CodexInvoker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CodexInvoker {
    fn default() -> Self {
        Self::new("codex")
    }
}

/// Arguments passed after the program name.
pub fn codex_args(request: &AgentRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "exec".into(),
        "--full-auto".into(),
        "-C".into(),
        request.workdir.clone().into(),
        "-o".into(),
        request.output_path.clone().into(),
    ];
    if let Some(schema) = &request.output_schema_path {
        args.push("--output-schema".into());
        args.push(schema.clone().into());
    }
    if let Some(model) = &request.model {
        args.push("-m".into());
        args.push(model.into());
    }
    if let Some(sandbox) = request.sandbox {
        args.push("-s".into());
        args.push(sandbox.as_str().into());
    }
    args.push("-".into());
    args
}

impl AgentInvoker for CodexInvoker {
    #[instrument(skip_all, fields(purpose = ?request.purpose))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        info!(workdir = %request.workdir.display(), "starting agent");
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        if request.output_path.exists() {
            fs::remove_file(&request.output_path).with_context(|| {
                format!("remove stale output {}", request.output_path.display())
            })?;
        }

        let args = codex_args(request);
        let mut cmd = Command::new(&self.program);
        cmd.args(&args).current_dir(&request.workdir);
        let output = run_command(cmd, Some(&request.prompt), request.mirror_output)
            .with_context(|| format!("run {} exec", self.program))?;

        let message = match fs::read_to_string(&request.output_path) {
            Ok(contents) => contents,
            Err(err) => {
                debug!(err = %err, "agent output file missing, using stdout");
                output.stdout.clone()
            }
        };

        let rendered_args = args
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        append_log(
            &request.log_path,
            &request.purpose.log_title(),
            &[
                format!("Command: {} {rendered_args}", self.program),
                String::new(),
                "OUTPUT:".to_string(),
                or_empty(&message).to_string(),
                String::new(),
                "STDOUT:".to_string(),
                or_empty(&output.stdout).to_string(),
                String::new(),
                "STDERR:".to_string(),
                or_empty(&output.stderr).to_string(),
                String::new(),
                format!("Exit Code: {}", output.exit_code()),
            ]
            .join("\n"),
        )?;

        if !output.success() {
            warn!(exit_code = output.exit_code(), "agent exited non-zero");
        }
        Ok(AgentResponse {
            exit_code: output.exit_code(),
            stdout: output.stdout,
            stderr: output.stderr,
            output: message,
        })
    }
}
