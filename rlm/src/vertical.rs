//! Vertical finalization: use-case side effects applied at convergence.
//!
//! Finalizers write through the sandboxed local write path regardless of the
//! configured dispatch route. Every sub-step failure is reported in the
//! returned text; nothing here returns an error.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::types::{Vertical, new_reasoning_id};
use crate::io::config::VerticalConfig;
use crate::io::skills::code::analyze_snippet;
use crate::io::skills::fs::write_sandboxed;
use crate::io::skills::{SkillContext, TestKind, TestRequest};

const CODEGEN_PREFIX: &str = "codegen_";
const REVIEW_PREFIX: &str = "reviewed_";
const REVIEW_ANALYSIS_LIMIT: usize = 16_384;
const MAX_NAME_ATTEMPTS: u32 = 1_000;

/// Inputs of a converged step the finalizer may use.
#[derive(Debug, Clone)]
pub struct Converged<'a> {
    pub thought: &'a str,
    pub context: &'a str,
    /// Correlation id of the step's action, if one was requested.
    pub reasoning_id: Option<&'a str>,
}

pub struct VerticalFinalizer<'a> {
    config: &'a VerticalConfig,
    skills: &'a SkillContext,
}

impl<'a> VerticalFinalizer<'a> {
    pub fn new(config: &'a VerticalConfig, skills: &'a SkillContext) -> Self {
        Self { config, skills }
    }

    /// Run the finalizer for `vertical`; `None` when it has none.
    #[instrument(skip_all, fields(vertical = %vertical))]
    pub fn finalize(&self, vertical: Vertical, step: &Converged<'_>) -> Option<String> {
        match vertical {
            Vertical::Research | Vertical::Personal => None,
            Vertical::Codegen => Some(self.codegen(step)),
            Vertical::CodeReview => Some(self.code_review(step)),
        }
    }

    fn codegen(&self, step: &Converged<'_>) -> String {
        let rel = self.artifact_path(&self.config.codegen_output_dir, CODEGEN_PREFIX, step);
        match write_sandboxed(&self.skills.project_root, &rel, step.thought, false) {
            Ok(_) => {
                info!(path = %rel, bytes = step.thought.len(), "codegen artifact written");
                format!("[codegen] Wrote {} bytes to {rel}", step.thought.len())
            }
            Err(err) => {
                warn!(err = %err, "codegen write failed");
                format!("[codegen] Write to {rel} failed: {err:#}")
            }
        }
    }

    fn code_review(&self, step: &Converged<'_>) -> String {
        let mut narrative = String::from("[code_review] Code review");

        let mut subject = step.thought.to_string();
        if !step.context.trim().is_empty() {
            subject.push('\n');
            subject.push_str(step.context.trim());
        }
        let _ = write!(narrative, "\n{}", analyze_snippet(&subject, "auto", REVIEW_ANALYSIS_LIMIT));

        let kind = detect_test_kind(&self.skills.project_root);
        let tests = self.skills.test_runner.run(&TestRequest {
            dir: self.skills.project_root.clone(),
            kind,
            timeout: Duration::from_secs(self.config.test_timeout_secs),
            output_limit_bytes: self.skills.output_limit_bytes,
        });
        match tests {
            Ok(outcome) => {
                let _ = write!(narrative, "\n{}", outcome.describe(kind));
            }
            Err(err) => {
                warn!(err = %err, "code review test run failed");
                let _ = write!(narrative, "\n[run_tests] could not run {} tests: {err:#}", kind.as_str());
            }
        }

        let rel = self.artifact_path(&self.config.code_review_output_dir, REVIEW_PREFIX, step);
        match write_sandboxed(&self.skills.project_root, &rel, step.thought, false) {
            Ok(_) => {
                info!(path = %rel, "review artifact written");
                let _ = write!(narrative, "\n[code_review] Wrote {} bytes to {rel}", step.thought.len());
            }
            Err(err) => {
                warn!(err = %err, "review write failed");
                let _ = write!(narrative, "\n[code_review] Write to {rel} failed: {err:#}");
            }
        }
        narrative
    }

    /// `<dir>/<prefix><id>.<ext>`, relative to the project root.
    ///
    /// A taken name gets a `-N` suffix so every converged step writes a new
    /// file even when the generator repeats a reasoning id.
    fn artifact_path(&self, dir: &str, prefix: &str, step: &Converged<'_>) -> String {
        let id = step
            .reasoning_id
            .map(sanitize_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| new_reasoning_id().replace('-', ""));
        let dir = dir.trim_end_matches('/');
        let ext = &self.config.artifact_extension;
        let mut rel = format!("{dir}/{prefix}{id}.{ext}");
        for n in 2..=MAX_NAME_ATTEMPTS {
            if fs::symlink_metadata(self.skills.project_root.join(&rel)).is_err() {
                break;
            }
            rel = format!("{dir}/{prefix}{id}-{n}.{ext}");
        }
        rel
    }
}

fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(64)
        .collect()
}

fn detect_test_kind(root: &Path) -> TestKind {
    if root.join("Cargo.toml").is_file() {
        TestKind::Rust
    } else {
        TestKind::Python
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTestRunner;
    use std::fs;
    use std::sync::Arc;

    fn converged<'a>(thought: &'a str, reasoning_id: Option<&'a str>) -> Converged<'a> {
        Converged {
            thought,
            context: "",
            reasoning_id,
        }
    }

    #[test]
    fn research_and_personal_have_no_side_effects() {
        let temp = tempfile::tempdir().expect("tempdir");
        let skills = SkillContext::new(temp.path(), Arc::new(ScriptedTestRunner::passing("ok")));
        let config = VerticalConfig::default();
        let finalizer = VerticalFinalizer::new(&config, &skills);
        assert!(finalizer.finalize(Vertical::Research, &converged("x", None)).is_none());
        assert!(finalizer.finalize(Vertical::Personal, &converged("x", None)).is_none());
        assert_eq!(fs::read_dir(temp.path()).expect("read").count(), 0);
    }

    #[test]
    fn codegen_writes_thought_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let skills = SkillContext::new(temp.path(), Arc::new(ScriptedTestRunner::passing("ok")));
        let config = VerticalConfig::default();
        let thought = "def test_analyze_code():\n    assert True";
        let outcome = VerticalFinalizer::new(&config, &skills)
            .finalize(Vertical::Codegen, &converged(thought, Some("r-1")))
            .expect("outcome");

        assert_eq!(
            outcome,
            format!("[codegen] Wrote {} bytes to codegen_output/codegen_r-1.py", thought.len())
        );
        let written = fs::read_to_string(temp.path().join("codegen_output/codegen_r-1.py"))
            .expect("artifact");
        assert_eq!(written, thought);
    }

    #[test]
    fn repeated_reasoning_id_gets_a_fresh_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let skills = SkillContext::new(temp.path(), Arc::new(ScriptedTestRunner::passing("ok")));
        let config = VerticalConfig::default();
        let finalizer = VerticalFinalizer::new(&config, &skills);

        let first = finalizer
            .finalize(Vertical::Codegen, &converged("old", Some("dup")))
            .expect("outcome");
        let second = finalizer
            .finalize(Vertical::Codegen, &converged("new", Some("dup")))
            .expect("outcome");

        assert!(first.ends_with("codegen_output/codegen_dup.py"));
        assert!(second.ends_with("codegen_output/codegen_dup-2.py"));
        let dir = temp.path().join("codegen_output");
        assert_eq!(fs::read_to_string(dir.join("codegen_dup.py")).expect("read"), "old");
        assert_eq!(fs::read_to_string(dir.join("codegen_dup-2.py")).expect("read"), "new");
    }

    #[test]
    fn codegen_write_failure_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("codegen_output"), "not a directory").expect("write");
        let skills = SkillContext::new(temp.path(), Arc::new(ScriptedTestRunner::passing("ok")));
        let config = VerticalConfig::default();
        let outcome = VerticalFinalizer::new(&config, &skills)
            .finalize(Vertical::Codegen, &converged("new", Some("r-3")))
            .expect("outcome");
        assert!(outcome.starts_with("[codegen] Write to codegen_output/codegen_r-3.py failed"));
    }

    #[test]
    fn code_review_analyzes_tests_and_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = Arc::new(ScriptedTestRunner::passing("1 passed"));
        let skills = SkillContext::new(temp.path(), runner.clone());
        let config = VerticalConfig::default();
        let step = Converged {
            thought: "Proposed fix: add type hints and docstring.",
            context: "code: def add(a, b): return a + b",
            reasoning_id: None,
        };
        let outcome = VerticalFinalizer::new(&config, &skills)
            .finalize(Vertical::CodeReview, &step)
            .expect("outcome");

        assert!(outcome.contains("[analyze_code] RCA"));
        assert!(outcome.contains("python tests passed"));
        assert!(outcome.contains("Wrote"));
        assert!(outcome.contains("reviewed/reviewed_"));
        assert_eq!(runner.requests().len(), 1);
        let artifacts: Vec<_> = fs::read_dir(temp.path().join("reviewed"))
            .expect("reviewed dir")
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].starts_with("reviewed_") && artifacts[0].ends_with(".py"));
    }

    #[test]
    fn code_review_reports_test_runner_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("Cargo.toml"), "[package]\n").expect("write");
        let skills = SkillContext::new(temp.path(), Arc::new(ScriptedTestRunner::erroring("no cargo")));
        let config = VerticalConfig::default();
        let outcome = VerticalFinalizer::new(&config, &skills)
            .finalize(Vertical::CodeReview, &converged("fn main() {}", Some("r-2")))
            .expect("outcome");
        assert!(outcome.contains("could not run rust tests: no cargo"));
        assert!(outcome.contains("Wrote 12 bytes to reviewed/reviewed_r-2.py"));
    }

    #[test]
    fn sanitize_strips_path_characters() {
        assert_eq!(sanitize_id("../etc/passwd"), "etcpasswd");
    }
}
