//! Conductor configuration stored under `.conductor/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config location relative to the repository root.
pub const DEFAULT_CONFIG_PATH: &str = ".conductor/config.toml";

/// Conductor configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Directory (relative to the repository root) holding run state and artifacts.
    pub runs_dir: PathBuf,

    /// Run branches are named `<branch_prefix>/<run-id>`.
    pub branch_prefix: String,

    /// Character budget for the diff patch embedded in the commit-message prompt.
    pub diff_patch_limit_chars: usize,

    pub agent: AgentConfig,

    /// Ordered verification commands; the first failure stops the sequence.
    pub quality_gates: Vec<QualityGateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable (invoked as `<command> exec ...`).
    pub command: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "codex".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityGateConfig {
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory relative to the repository root.
    #[serde(default = "default_gate_dir")]
    pub dir: PathBuf,
}

fn default_gate_dir() -> PathBuf {
    PathBuf::from(".")
}

fn gate(name: &str, command: &[&str], dir: &str) -> QualityGateConfig {
    QualityGateConfig {
        name: name.to_string(),
        command: command.iter().map(|part| part.to_string()).collect(),
        dir: PathBuf::from(dir),
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from(".conductor/runs"),
            branch_prefix: "conductor".to_string(),
            diff_patch_limit_chars: 12_000,
            agent: AgentConfig::default(),
            quality_gates: vec![
                gate("format", &["bun", "run", "format"], "."),
                gate("lint", &["bun", "run", "lint"], "."),
                gate("frontend-check-types", &["bun", "run", "check-types"], "frontend"),
                gate("server-check-types", &["bun", "run", "check-types"], "server"),
                gate("test", &["bun", "run", "test"], "."),
            ],
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runs_dir.as_os_str().is_empty() {
            return Err(anyhow!("runs_dir must not be empty"));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(anyhow!("branch_prefix must not be empty"));
        }
        if self.diff_patch_limit_chars == 0 {
            return Err(anyhow!("diff_patch_limit_chars must be > 0"));
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must not be empty"));
        }
        let mut names = HashSet::new();
        for gate in &self.quality_gates {
            if gate.name.trim().is_empty() {
                return Err(anyhow!("quality_gates entries need a name"));
            }
            if gate.command.is_empty() || gate.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "quality gate '{}' command must be a non-empty array",
                    gate.name
                ));
            }
            if !names.insert(gate.name.as_str()) {
                return Err(anyhow!("duplicate quality gate name '{}'", gate.name));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
