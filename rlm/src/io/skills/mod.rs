//! Built-in skills and the allow-list-validated registry.
//!
//! The registry is built once at startup from the configured allow-list and
//! never changes afterwards. Each skill decodes its own typed parameters from
//! the action's JSON params, so a malformed action is a skill error (and
//! therefore a failure observation) rather than a panic.

pub mod code;
pub mod fs;
pub mod personal;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::io::process::run_command_with_timeout;

/// Everything a skill may touch besides its params.
#[derive(Clone)]
pub struct SkillContext {
    /// Sandbox root for writes; base for relative reads.
    pub project_root: PathBuf,
    pub output_limit_bytes: usize,
    pub test_runner: Arc<dyn TestRunner>,
}

impl SkillContext {
    pub fn new(project_root: impl Into<PathBuf>, test_runner: Arc<dyn TestRunner>) -> Self {
        Self {
            project_root: project_root.into(),
            output_limit_bytes: 100_000,
            test_runner,
        }
    }
}

pub type SkillFn = fn(&Map<String, Value>, &SkillContext) -> Result<String>;

struct SkillSpec {
    name: &'static str,
    run: SkillFn,
}

const BUILTIN_SKILLS: &[SkillSpec] = &[
    SkillSpec { name: "peek_file", run: fs::peek_file },
    SkillSpec { name: "list_dir", run: fs::list_dir },
    SkillSpec { name: "read_entire_file_safe", run: fs::read_entire_file_safe },
    SkillSpec { name: "write_file_safe", run: fs::write_file_safe },
    SkillSpec { name: "list_files_recursive", run: fs::list_files_recursive },
    SkillSpec { name: "search_codebase", run: code::search_codebase },
    SkillSpec { name: "analyze_code", run: code::analyze_code },
    SkillSpec { name: "run_tests", run: code::run_tests },
    SkillSpec { name: "track_health", run: personal::track_health },
    SkillSpec { name: "track_health_metrics", run: personal::track_health_metrics },
    SkillSpec { name: "health_reminder", run: personal::health_reminder },
    SkillSpec { name: "manage_finance", run: personal::manage_finance },
    SkillSpec { name: "track_transactions", run: personal::track_transactions },
    SkillSpec { name: "budget_alert", run: personal::budget_alert },
    SkillSpec { name: "post_social", run: personal::post_social },
    SkillSpec { name: "manage_email", run: personal::manage_email },
];

/// Name of the meta-action that wraps another action. Never a registry entry.
pub const EXECUTE_SKILL: &str = "execute_skill";

/// Immutable name → handler map.
pub struct SkillRegistry {
    skills: BTreeMap<&'static str, SkillFn>,
    allow_list_hash: String,
}

impl SkillRegistry {
    /// Register the built-in skills named by `allow_list` (all of them when empty).
    ///
    /// Unknown names are an error so a typo in configuration fails at startup.
    pub fn builtin(allow_list: &[String]) -> Result<Self> {
        let mut skills = BTreeMap::new();
        if allow_list.is_empty() {
            for spec in BUILTIN_SKILLS {
                skills.insert(spec.name, spec.run);
            }
        } else {
            for name in allow_list {
                let name = name.trim();
                let Some(spec) = BUILTIN_SKILLS.iter().find(|spec| spec.name == name) else {
                    bail!("skills.allow_list names unknown skill '{name}'");
                };
                skills.insert(spec.name, spec.run);
            }
        }
        let allow_list_hash = allow_list_hash(skills.keys().copied());
        debug!(count = skills.len(), %allow_list_hash, "skill registry built");
        Ok(Self {
            skills,
            allow_list_hash,
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.skills.keys().map(|name| (*name).to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    pub fn allow_list_hash(&self) -> &str {
        &self.allow_list_hash
    }

    /// Run a registered skill.
    pub fn execute(
        &self,
        name: &str,
        params: &Map<String, Value>,
        ctx: &SkillContext,
    ) -> Result<String> {
        let Some(run) = self.skills.get(name) else {
            bail!("skill '{name}' is not registered (not in allow-list)");
        };
        run(params, ctx)
    }
}

/// Hex SHA-256 of the sorted, newline-joined skill names.
pub fn allow_list_hash<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(names.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

/// Decode a skill's typed params from the action's JSON object.
pub(crate) fn parse_params<T: DeserializeOwned>(
    skill: &str,
    params: &Map<String, Value>,
) -> Result<T> {
    serde_json::from_value(Value::Object(params.clone()))
        .with_context(|| format!("invalid params for {skill}"))
}

/// Which test suite to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Python,
    Rust,
}

impl TestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TestKind::Python => "python",
            TestKind::Rust => "rust",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub dir: PathBuf,
    pub kind: TestKind,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub passed: bool,
    pub timed_out: bool,
    pub output: String,
}

impl TestOutcome {
    pub fn describe(&self, kind: TestKind) -> String {
        let verdict = if self.timed_out {
            "timed out"
        } else if self.passed {
            "passed"
        } else {
            "failed"
        };
        let output = self.output.trim();
        if output.is_empty() {
            return format!("[run_tests] {} tests {verdict}", kind.as_str());
        }
        format!("[run_tests] {} tests {verdict}\n{output}", kind.as_str())
    }
}

/// Runs a project test suite. Tests substitute a scripted runner.
pub trait TestRunner: Send + Sync {
    fn run(&self, request: &TestRequest) -> Result<TestOutcome>;
}

/// Spawns `pytest` or `cargo test` in the requested directory.
pub struct CommandTestRunner;

impl TestRunner for CommandTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestOutcome> {
        let mut cmd = test_command(request.kind);
        cmd.current_dir(&request.dir);
        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .with_context(|| format!("run {} tests in {}", request.kind.as_str(), request.dir.display()))?;
        Ok(TestOutcome {
            passed: output.success(),
            timed_out: output.timed_out,
            output: output.render(),
        })
    }
}

fn test_command(kind: TestKind) -> Command {
    match kind {
        TestKind::Python => {
            let mut cmd = Command::new("python");
            cmd.args(["-m", "pytest", "-q"]);
            cmd
        }
        TestKind::Rust => {
            let mut cmd = Command::new("cargo");
            cmd.args(["test", "--quiet"]);
            cmd
        }
    }
}

/// Resolve a path for reading: absolute paths as given, relative paths under `root`.
pub(crate) fn resolve_read(root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw.trim());
    if path.is_absolute() {
        return path.to_path_buf();
    }
    root.join(path)
}
