//! Quality-gate runner: ordered project verification commands.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::artifacts::{append_log, or_empty};
use crate::io::config::QualityGateConfig;
use crate::io::process::run_command;

#[derive(Debug, Clone)]
pub struct GateRequest {
    /// Repository root; gate directories are resolved against it.
    pub workdir: PathBuf,
    /// Step log that receives one section per gate.
    pub log_path: PathBuf,
    /// Mirror gate output live to the terminal.
    pub mirror_output: bool,
}

/// Outcome of a gate sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    pub passed: bool,
    pub failed_gate: Option<String>,
    pub details: String,
}

impl GateReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failed_gate: None,
            details: "all checks passed".to_string(),
        }
    }

    pub fn fail(gate: &str, exit_code: i32) -> Self {
        Self {
            passed: false,
            failed_gate: Some(gate.to_string()),
            details: format!("{gate} failed with exit code {exit_code}"),
        }
    }
}

pub trait GateRunner {
    fn run(&self, request: &GateRequest) -> Result<GateReport>;
}

/// Runs configured gates one by one, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct CommandGateRunner {
    gates: Vec<QualityGateConfig>,
}

impl CommandGateRunner {
    pub fn new(gates: Vec<QualityGateConfig>) -> Self {
        Self { gates }
    }
}

impl GateRunner for CommandGateRunner {
    #[instrument(skip_all, fields(gates = self.gates.len()))]
    fn run(&self, request: &GateRequest) -> Result<GateReport> {
        for gate in &self.gates {
            let (program, args) = gate
                .command
                .split_first()
                .ok_or_else(|| anyhow!("quality gate '{}' has an empty command", gate.name))?;
            let cwd = request.workdir.join(&gate.dir);
            let mut cmd = Command::new(program);
            cmd.args(args).current_dir(&cwd);

            info!(gate = %gate.name, "running quality gate");
            let output = run_command(cmd, None, request.mirror_output)?;

            append_log(
                &request.log_path,
                &format!("Quality Gate: {}", gate.name),
                &[
                    format!("CWD: {}", cwd.display()),
                    format!("Command: {}", gate.command.join(" ")),
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
                warn!(gate = %gate.name, exit_code = output.exit_code(), "quality gate failed");
                return Ok(GateReport::fail(&gate.name, output.exit_code()));
            }
        }
        Ok(GateReport::pass())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn sh(name: &str, script: &str) -> QualityGateConfig {
        QualityGateConfig {
            name: name.to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            dir: PathBuf::from("."),
        }
    }

    fn request(root: &std::path::Path) -> GateRequest {
        GateRequest {
            workdir: root.to_path_buf(),
            log_path: root.join("logs/step.log"),
            mirror_output: false,
        }
    }

    #[test]
    fn passes_when_every_gate_succeeds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandGateRunner::new(vec![sh("format", "echo formatted"), sh("test", "true")]);

        let report = runner.run(&request(temp.path())).expect("run");
        assert_eq!(report, GateReport::pass());

        let log = fs::read_to_string(temp.path().join("logs/step.log")).expect("log");
        assert!(log.contains("Quality Gate: format"));
        assert!(log.contains("formatted"));
        assert!(log.contains("Quality Gate: test"));
        assert!(log.contains("STDERR:\n(empty)"));
    }

    /// Verifies the sequence stops at the first failing gate.
    #[test]
    fn stops_at_first_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandGateRunner::new(vec![
            sh("format", "true"),
            sh("lint", "echo bad style >&2; exit 2"),
            sh("test", "touch ran-tests"),
        ]);

        let report = runner.run(&request(temp.path())).expect("run");
        assert!(!report.passed);
        assert_eq!(report.failed_gate.as_deref(), Some("lint"));
        assert_eq!(report.details, "lint failed with exit code 2");
        assert!(!temp.path().join("ran-tests").exists());

        let log = fs::read_to_string(temp.path().join("logs/step.log")).expect("log");
        assert!(log.contains("bad style"));
        assert!(log.contains("Exit Code: 2"));
        assert!(!log.contains("Quality Gate: test"));
    }

    #[test]
    fn runs_gates_in_their_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("server")).expect("mkdir");
        let mut gate = sh("server-check", "touch marker");
        gate.dir = PathBuf::from("server");

        let report = CommandGateRunner::new(vec![gate])
            .run(&request(temp.path()))
            .expect("run");
        assert!(report.passed);
        assert!(temp.path().join("server/marker").exists());
    }
}
