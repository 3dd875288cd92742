//! Strict parsers for agent-produced structured text.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde_json::Value;

use crate::core::types::{CommitMessage, VerifierDecision, VerifierStatus};

static CONVENTIONAL_SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(feat|fix|chore|docs|style|refactor|perf|test|build|ci|revert)\([a-z0-9._-]+\)!?: .+",
    )
    .expect("conventional subject regex")
});

static FORBIDDEN_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:task|phase)-\d+|conductor|ralph").expect("forbidden token regex")
});

const TRUNCATION_MARKER: &str = "\n\n[truncated]";

/// Strip a surrounding fenced code block (```` ```json ... ``` ````), if any.
///
/// Unfenced input is returned trimmed, so applying this twice is a no-op.
pub fn extract_json_payload(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() < 3 {
        return trimmed;
    }
    let first_len = lines[0].len();
    let last_len = lines[lines.len() - 1].len();
    let inner_end = trimmed.len() - last_len;
    trimmed[first_len..inner_end].trim()
}

/// Parse the verifier's `{status, notes}` verdict.
pub fn parse_verifier_decision(raw: &str) -> Result<VerifierDecision> {
    let payload = extract_json_payload(raw);
    let value: Value = serde_json::from_str(payload).context("verifier output is not JSON")?;

    let status = value
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_uppercase())
        .ok_or_else(|| anyhow!("verifier output is missing a string status"))?;
    let status = match status.as_str() {
        "DONE" => VerifierStatus::Done,
        "REFACTOR" => VerifierStatus::Refactor,
        "ISSUES" => VerifierStatus::Issues,
        other => bail!("unknown verifier status '{other}' (expected DONE, REFACTOR, or ISSUES)"),
    };

    let notes = match value.get("notes") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(note)) if !note.trim().is_empty() => vec![note.trim().to_string()],
        _ => Vec::new(),
    };

    if status != VerifierStatus::Done && notes.is_empty() {
        bail!("Verifier {} requires notes", status.as_str());
    }

    Ok(VerifierDecision { status, notes })
}

/// Parse and validate a `{subject, body}` commit message.
pub fn parse_conventional_commit(raw: &str) -> Result<CommitMessage> {
    let payload = extract_json_payload(raw);
    let value: Value =
        serde_json::from_str(payload).context("commit message output is not JSON")?;

    let subject = value
        .get("subject")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if subject.is_empty() {
        bail!("commit message subject is missing");
    }
    if !CONVENTIONAL_SUBJECT_RE.is_match(subject) {
        bail!("commit subject is not a conventional commit: '{subject}'");
    }
    if let Some(token) = FORBIDDEN_TOKEN_RE.find(subject) {
        bail!(
            "Commit subject contains forbidden token '{}': '{subject}'",
            token.as_str()
        );
    }

    let body = value
        .get("body")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    Ok(CommitMessage {
        subject: subject.to_string(),
        body: body.to_string(),
    })
}

/// Cap `input` at `max_chars` characters, appending a visible marker when cut.
pub fn truncate_text(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        None => input.to_string(),
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &input[..cut]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_payload() {
        let raw = "```json\n{\"status\":\"DONE\",\"notes\":[]}\n```";
        assert_eq!(extract_json_payload(raw), "{\"status\":\"DONE\",\"notes\":[]}");
    }

    #[test]
    fn unfenced_payload_is_unchanged() {
        let raw = "{\"status\":\"DONE\"}";
        assert_eq!(extract_json_payload(raw), raw);
        assert_eq!(extract_json_payload(extract_json_payload(raw)), raw);
    }

    #[test]
    fn parses_done_without_notes() {
        let decision = parse_verifier_decision(r#"{"status":"DONE","notes":[]}"#).expect("parse");
        assert_eq!(decision.status, VerifierStatus::Done);
        assert!(decision.notes.is_empty());
    }

    #[test]
    fn refactor_requires_notes() {
        let err = parse_verifier_decision(r#"{"status":"REFACTOR","notes":[]}"#).unwrap_err();
        assert!(err.to_string().contains("requires notes"), "{err}");
    }

    #[test]
    fn normalizes_status_and_notes() {
        let decision =
            parse_verifier_decision(r#"{"status":" issues ","notes":["fix null check", 3, "  "]}"#)
                .expect("parse");
        assert_eq!(decision.status, VerifierStatus::Issues);
        assert_eq!(decision.notes, vec!["fix null check".to_string()]);

        let decision =
            parse_verifier_decision("```json\n{\"status\":\"refactor\",\"notes\":\"rename x\"}\n```")
                .expect("parse");
        assert_eq!(decision.status, VerifierStatus::Refactor);
        assert_eq!(decision.notes, vec!["rename x".to_string()]);
    }

    #[test]
    fn rejects_unknown_status_and_bad_json() {
        assert!(parse_verifier_decision(r#"{"status":"MAYBE","notes":["x"]}"#).is_err());
        assert!(parse_verifier_decision("looks good to me").is_err());
        assert!(parse_verifier_decision(r#"{"notes":["x"]}"#).is_err());
    }

    #[test]
    fn accepts_conventional_commit() {
        let message =
            parse_conventional_commit(r#"{"subject":"feat(api): add handler","body":""}"#)
                .expect("parse");
        assert_eq!(message.subject, "feat(api): add handler");
        assert_eq!(message.body, "");
    }

    #[test]
    fn rejects_non_conventional_subjects() {
        assert!(parse_conventional_commit(r#"{"subject":"add handler","body":""}"#).is_err());
        assert!(parse_conventional_commit(r#"{"subject":"feat: add handler","body":""}"#).is_err());
        assert!(parse_conventional_commit(r#"{"body":"x"}"#).is_err());
    }

    #[test]
    fn rejects_bookkeeping_tokens() {
        let err = parse_conventional_commit(r#"{"subject":"feat(api): finish task-001","body":""}"#)
            .unwrap_err();
        assert!(err.to_string().contains("forbidden token"), "{err}");
        assert!(
            parse_conventional_commit(r#"{"subject":"fix(core): Phase-2 cleanup","body":""}"#)
                .is_err()
        );
        assert!(
            parse_conventional_commit(r#"{"subject":"chore(ci): run Conductor","body":""}"#)
                .is_err()
        );
        assert!(
            parse_conventional_commit(r#"{"subject":"feat(api): finish subtask-001","body":""}"#)
                .is_err()
        );
        assert!(
            parse_conventional_commit(
                r#"{"subject":"fix(core): cleanup_phase-2 leftovers","body":""}"#
            )
            .is_err()
        );
    }

    #[test]
    fn truncates_with_marker() {
        assert_eq!(
            truncate_text("abcdefghijklmnopqrstuvwxyz", 5),
            "abcde\n\n[truncated]"
        );
        let text = "abcdefghijklmnopqrstuvwxyz";
        assert_eq!(truncate_text(text, text.len()), text);
        assert_eq!(truncate_text("héllo", 2), "hé\n\n[truncated]");
    }
}
