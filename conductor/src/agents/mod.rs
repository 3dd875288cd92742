//! Agent prompts and structured-output schemas.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod prompts;

const VERIFIER_DECISION_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/agents/verifier_decision.schema.json"
));
const COMMIT_MESSAGE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/agents/commit_message.schema.json"
));

/// Structured responses the agent is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSchema {
    VerifierDecision,
    CommitMessage,
}

impl OutputSchema {
    fn file_name(self) -> &'static str {
        match self {
            Self::VerifierDecision => "verifier_decision.schema.json",
            Self::CommitMessage => "commit_message.schema.json",
        }
    }

    fn contents(self) -> &'static str {
        match self {
            Self::VerifierDecision => VERIFIER_DECISION_SCHEMA,
            Self::CommitMessage => COMMIT_MESSAGE_SCHEMA,
        }
    }
}

/// Write `schema` under `<run_dir>/schemas/` and return its path.
pub fn write_output_schema(run_dir: &Path, schema: OutputSchema) -> Result<PathBuf> {
    let dir = run_dir.join("schemas");
    fs::create_dir_all(&dir).with_context(|| format!("create schema dir {}", dir.display()))?;
    let path = dir.join(schema.file_name());
    fs::write(&path, schema.contents())
        .with_context(|| format!("write schema {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_schemas_into_run_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_output_schema(temp.path(), OutputSchema::VerifierDecision).expect("write");
        assert!(path.ends_with("schemas/verifier_decision.schema.json"));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["required"], serde_json::json!(["status", "notes"]));

        let path = write_output_schema(temp.path(), OutputSchema::CommitMessage).expect("write");
        assert!(path.is_file());
    }
}
