//! Shared deterministic types for the loop engine.
//!
//! These types define the stable contracts between the step engine, the
//! dispatcher and the outward HTTP surface. They carry no I/O and serialize to
//! the same JSON shapes the generator and callers exchange.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single reasoning request. Immutable per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Natural-language query text.
    #[serde(rename = "query")]
    pub text: String,
    /// Accumulated prior reasoning (free text).
    #[serde(default)]
    pub context: String,
    /// Recursion-nesting counter.
    #[serde(default)]
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_flags: Option<Map<String, Value>>,
    /// Per-request override of the configured mock default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_mode: Option<bool>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: String::new(),
            depth: 0,
            feature_flags: None,
            mock_mode: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_mock_mode(mut self, mock_mode: Option<bool>) -> Self {
        self.mock_mode = mock_mode;
        self
    }

    /// Request-level `mock_mode` wins over the configured default in both directions.
    pub fn effective_mock(&self, default_mock: bool) -> bool {
        self.mock_mode.unwrap_or(default_mock)
    }

    /// Build the next turn's query: same text, depth, flags and mock override,
    /// with `summary` appended to the accumulated context.
    pub fn next_turn(&self, summary: &str) -> Self {
        let context = format!("{}\n{}", self.context, summary).trim().to_string();
        Self {
            text: self.text.clone(),
            context,
            depth: self.depth,
            feature_flags: self.feature_flags.clone(),
            mock_mode: self.mock_mode,
        }
    }
}

/// Structured output of one reasoning step, produced by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub thought: String,
    #[serde(default)]
    pub action: Option<Action>,
    /// `true` means no further reasoning is required, even if an action was requested.
    pub is_final: bool,
}

/// A requested skill invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub skill_name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Correlation id; generated when the generator omits it.
    #[serde(default = "new_reasoning_id")]
    pub reasoning_id: String,
}

impl Action {
    pub fn new(skill_name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            skill_name: skill_name.into(),
            params,
            reasoning_id: new_reasoning_id(),
        }
    }

    /// Unwrap the nested action carried by an `execute_skill` meta-action.
    ///
    /// The inner action inherits the outer `reasoning_id` when it has none.
    pub fn unwrap_meta(&self) -> Result<Action, String> {
        let skill_name = self
            .params
            .get("skill_name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| "execute_skill requires a non-empty params.skill_name".to_string())?;
        let params = match self.params.get("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(format!(
                    "execute_skill params.params must be an object, got {other}"
                ));
            }
        };
        let reasoning_id = self
            .params
            .get("reasoning_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.reasoning_id.clone());
        Ok(Action {
            skill_name: skill_name.to_string(),
            params,
            reasoning_id,
        })
    }
}

pub fn new_reasoning_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Normalized result of executing an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub success: bool,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Observation {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text a caller should see: the observation on success, the error otherwise.
    pub fn display_text(&self) -> &str {
        if self.success {
            return &self.text;
        }
        match self.error.as_deref() {
            Some(err) if !err.is_empty() => err,
            _ if !self.text.is_empty() => &self.text,
            _ => "action failed without an error message",
        }
    }
}

/// The only value returned to callers of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlmSummary {
    pub summary: String,
    pub converged: bool,
}

impl RlmSummary {
    pub fn converged(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            converged: true,
        }
    }

    pub fn diverged(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            converged: false,
        }
    }
}

/// Remediation proposed by the external patch authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchProposal {
    pub patch_id: String,
    #[serde(default)]
    pub proposed_code: String,
    pub requires_hitl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchApplyResult {
    pub success: bool,
    #[serde(default)]
    pub commit_hash: String,
}

/// Named use case that alters finalization behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vertical {
    Research,
    Codegen,
    CodeReview,
    Personal,
}

impl Vertical {
    pub fn as_str(self) -> &'static str {
        match self {
            Vertical::Research => "research",
            Vertical::Codegen => "codegen",
            Vertical::CodeReview => "code_review",
            Vertical::Personal => "personal",
        }
    }

    /// Verticals that run a finalizer at convergence.
    pub fn finalizes(self) -> bool {
        matches!(
            self,
            Vertical::Research | Vertical::Codegen | Vertical::CodeReview
        )
    }

    /// Parse an optional, possibly blank vertical name.
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, UnknownVertical> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => name.parse().map(Some),
        }
    }
}

impl fmt::Display for Vertical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown vertical use case '{0}' (expected research, codegen, code_review or personal)")]
pub struct UnknownVertical(pub String);

impl FromStr for Vertical {
    type Err = UnknownVertical;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Ok(Vertical::Research),
            "codegen" => Ok(Vertical::Codegen),
            "code_review" => Ok(Vertical::CodeReview),
            "personal" => Ok(Vertical::Personal),
            other => Err(UnknownVertical(other.to_string())),
        }
    }
}

/// Faults raised inside the loop. None of them escape the engine: each is
/// rendered into an [`RlmSummary`] or an [`Observation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopFault {
    #[error("Max recursion depth reached (depth {depth} >= {cap}); stopping without generation.")]
    DepthExceeded { depth: u32, cap: u32 },
    #[error("Schema enforcement failed: {0}")]
    SchemaViolation(String),
    #[error("Dispatch denied: {0}")]
    DispatchDenied(String),
    #[error("{0}")]
    DispatchFailure(String),
    #[error("Self-heal unavailable: {0}")]
    SelfHealUnavailable(String),
    #[error("Generation failed: {0}")]
    GeneratorUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_wire_format_uses_query_key_and_defaults() {
        let query: Query = serde_json::from_value(json!({"query": "hi"})).expect("parse");
        assert_eq!(query.text, "hi");
        assert_eq!(query.context, "");
        assert_eq!(query.depth, 0);
        assert_eq!(query.mock_mode, None);
    }

    #[test]
    fn request_mock_override_beats_default() {
        let query = Query::new("q").with_mock_mode(Some(false));
        assert!(!query.effective_mock(true));
        assert!(Query::new("q").effective_mock(true));
        assert!(Query::new("q").with_mock_mode(Some(true)).effective_mock(false));
    }

    #[test]
    fn next_turn_appends_summary_and_keeps_depth() {
        let query = Query::new("q").with_context("first").with_depth(2);
        let next = query.next_turn("  second  ");
        assert_eq!(next.context, "first\n  second");
        assert_eq!(next.depth, 2);

        let from_empty = Query::new("q").next_turn("only");
        assert_eq!(from_empty.context, "only");
    }

    #[test]
    fn unwrap_meta_inherits_reasoning_id() {
        let mut params = Map::new();
        params.insert("skill_name".into(), json!("peek_file"));
        params.insert("params".into(), json!({"path": "README.md"}));
        let mut outer = Action::new("execute_skill", params);
        outer.reasoning_id = "outer-1".into();

        let inner = outer.unwrap_meta().expect("inner");
        assert_eq!(inner.skill_name, "peek_file");
        assert_eq!(inner.reasoning_id, "outer-1");
        assert_eq!(inner.params.get("path"), Some(&json!("README.md")));
    }

    #[test]
    fn unwrap_meta_rejects_missing_skill_name() {
        let outer = Action::new("execute_skill", Map::new());
        let err = outer.unwrap_meta().unwrap_err();
        assert!(err.contains("skill_name"));
    }

    #[test]
    fn vertical_parses_case_insensitively() {
        assert_eq!(" Code_Review ".parse::<Vertical>(), Ok(Vertical::CodeReview));
        assert_eq!(Vertical::parse_optional(Some("  ")), Ok(None));
        assert!("poetry".parse::<Vertical>().is_err());
    }

    #[test]
    fn failure_observation_displays_error() {
        let obs = Observation::failure("Execution timed out");
        assert_eq!(obs.display_text(), "Execution timed out");
        assert_eq!(Observation::ok("fine").display_text(), "fine");
    }
}
