//! Strict Decision schema enforcement over raw generator output.
//!
//! Generator output is untrusted: it must parse as JSON, conform to the
//! Decision JSON Schema (Draft 2020-12), and deserialize into [`Decision`].
//! Any failure is a [`SchemaViolation`].

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::core::synthesis::truncate_with_notice;
use crate::core::types::Decision;

pub const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

/// Longest raw-output excerpt carried in an error trace.
const RAW_EXCERPT_LIMIT: usize = 2_000;

/// Why raw generator output was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub errors: Vec<String>,
    pub raw_excerpt: String,
}

impl SchemaViolation {
    fn new(errors: Vec<String>, raw: &str) -> Self {
        Self {
            errors,
            raw_excerpt: truncate_with_notice(raw, RAW_EXCERPT_LIMIT),
        }
    }

    /// One-line description for the caller-visible summary.
    pub fn detail(&self) -> String {
        self.errors.join("; ")
    }

    /// Multi-line trace handed to the self-heal reporter.
    pub fn error_trace(&self) -> String {
        format!(
            "schema validation failed for generator output:\n- {}\nraw output:\n{}",
            self.errors.join("\n- "),
            self.raw_excerpt
        )
    }
}

/// Compiled Decision schema, built once and reused across steps.
pub struct DecisionValidator {
    validator: Validator,
}

impl DecisionValidator {
    pub fn new() -> Result<Self> {
        let schema: Value =
            serde_json::from_str(DECISION_SCHEMA).context("parse decision schema json")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile decision schema")?;
        Ok(Self { validator })
    }

    /// Parse and validate raw generator output.
    pub fn parse(&self, raw: &str) -> Result<Decision, SchemaViolation> {
        let value: Value = serde_json::from_str(raw.trim()).map_err(|err| {
            SchemaViolation::new(vec![format!("output is not valid JSON: {err}")], raw)
        })?;

        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(SchemaViolation::new(messages, raw));
        }

        serde_json::from_value(value).map_err(|err| {
            SchemaViolation::new(vec![format!("output does not match Decision: {err}")], raw)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Action;
    use serde_json::{Map, json};

    fn validator() -> DecisionValidator {
        DecisionValidator::new().expect("schema compiles")
    }

    #[test]
    fn accepts_final_decision_without_action() {
        let decision = validator()
            .parse(r#"{"thought":"done","action":null,"is_final":true}"#)
            .expect("valid");
        assert_eq!(decision.thought, "done");
        assert!(decision.action.is_none());
        assert!(decision.is_final);
    }

    #[test]
    fn tolerates_null_observation_field() {
        let decision = validator()
            .parse(r#"{"thought":"done","action":null,"observation":null,"is_final":true}"#)
            .expect("valid");
        assert!(decision.is_final);
    }

    #[test]
    fn generates_reasoning_id_when_absent() {
        let decision = validator()
            .parse(r#"{"thought":"t","action":{"skill_name":"list_dir","params":{}},"is_final":false}"#)
            .expect("valid");
        let action = decision.action.expect("action");
        assert!(!action.reasoning_id.is_empty());
    }

    #[test]
    fn decision_round_trips_field_for_field() {
        let mut params = Map::new();
        params.insert("path".into(), json!("src/main.rs"));
        params.insert("start".into(), json!(0));
        let mut action = Action::new("peek_file", params);
        action.reasoning_id = "r-42".into();
        let original = Decision {
            thought: "peek at main".into(),
            action: Some(action),
            is_final: false,
        };

        let raw = serde_json::to_string(&original).expect("serialize");
        let parsed = validator().parse(&raw).expect("valid");
        assert_eq!(parsed, original);
    }

    #[test]
    fn rejects_non_json() {
        let violation = validator().parse("not-json").unwrap_err();
        assert!(violation.detail().contains("not valid JSON"));
        assert!(violation.error_trace().contains("schema validation failed"));
        assert!(violation.raw_excerpt.contains("not-json"));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let violation = validator().parse(r#"{"thought":"no verdict"}"#).unwrap_err();
        assert!(violation.detail().contains("is_final"));
    }

    #[test]
    fn rejects_wrong_types() {
        let violation = validator()
            .parse(r#"{"thought":1,"action":{"skill_name":""},"is_final":"yes"}"#)
            .unwrap_err();
        assert!(violation.errors.len() >= 2);
    }

    #[test]
    fn long_raw_output_is_truncated_in_trace() {
        let raw = "x".repeat(RAW_EXCERPT_LIMIT + 25);
        let violation = validator().parse(&raw).unwrap_err();
        assert_eq!(
            violation.raw_excerpt,
            format!("{}\n[truncated 25 bytes]", "x".repeat(RAW_EXCERPT_LIMIT))
        );
    }
}
