//! Engine configuration (`rlm.toml` plus `RLM_*` environment overrides).
//!
//! The configuration is loaded once at startup and then shared immutably by
//! every call. Per-request variation (mock override, vertical override) is
//! passed as parameters, never written back here.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Vertical;

/// Engine configuration (TOML).
///
/// Missing fields default to a safe posture: no dispatch path enabled, no
/// self-heal, no outbound generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Global mock default; a request's `mock_mode` overrides it.
    pub mock_mode: bool,

    /// Sandbox root for local file skills and vertical artifacts.
    pub project_root: PathBuf,

    /// Active vertical use case, if any.
    pub vertical: Option<Vertical>,

    /// Truncate observation text folded into summaries beyond this many bytes.
    pub observation_limit_bytes: usize,

    /// Append JSONL records of dispatches and self-heal reports here.
    pub action_log_path: Option<PathBuf>,

    /// Upper bound the HTTP layer accepts for `max_turns`.
    pub max_turns_limit: u32,

    pub dispatch: DispatchConfig,
    pub self_heal: SelfHealConfig,
    pub generator: GeneratorConfig,
    pub orchestrator: OrchestratorConfig,
    pub verticals: VerticalConfig,
    pub skills: SkillsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Route actions through the orchestrator's ExecuteAction.
    pub via_remote: bool,
    /// Allow in-process execution against the skill registry.
    pub allow_local: bool,
    /// Ask the orchestrator for real (non-mock) execution.
    pub allow_real: bool,
    /// Deadline for a remote ExecuteAction call.
    pub remote_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            via_remote: false,
            allow_local: false,
            allow_real: false,
            remote_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelfHealConfig {
    pub enabled: bool,
    /// Deadline for each ProposePatch / ApplyPatch call.
    pub timeout_secs: u64,
}

impl Default for SelfHealConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Raw generator output returned verbatim for every request. Takes
    /// precedence over the HTTP generator.
    pub stub_json: Option<String>,
    /// Permit calls to the HTTP generator.
    pub allow_outbound: bool,
    /// OpenAI-compatible chat completions endpoint base, e.g. `https://openrouter.ai/api/v1`.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            stub_json: None,
            allow_outbound: false,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openrouter/auto".to_string(),
            api_key_env: "RLM_OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Base URL of the orchestrator's HTTP API. Unset means unavailable.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerticalConfig {
    /// Directory (under `project_root`) for codegen artifacts.
    pub codegen_output_dir: String,
    /// Directory (under `project_root`) for code review artifacts.
    pub code_review_output_dir: String,
    /// File extension for vertical artifacts.
    pub artifact_extension: String,
    /// Deadline for the code review test run.
    pub test_timeout_secs: u64,
}

impl Default for VerticalConfig {
    fn default() -> Self {
        Self {
            codegen_output_dir: "codegen_output".to_string(),
            code_review_output_dir: "reviewed".to_string(),
            artifact_extension: "py".to_string(),
            test_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SkillsConfig {
    /// Skills to register. Empty registers every built-in skill.
    pub allow_list: Vec<String>,
    /// Truncate captured child process output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            allow_list: Vec::new(),
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mock_mode: false,
            project_root: PathBuf::from("."),
            vertical: None,
            observation_limit_bytes: 16_000,
            action_log_path: None,
            max_turns_limit: 20,
            dispatch: DispatchConfig::default(),
            self_heal: SelfHealConfig::default(),
            generator: GeneratorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            verticals: VerticalConfig::default(),
            skills: SkillsConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.observation_limit_bytes == 0 {
            return Err(anyhow!("observation_limit_bytes must be > 0"));
        }
        if self.max_turns_limit == 0 {
            return Err(anyhow!("max_turns_limit must be > 0"));
        }
        if self.dispatch.remote_timeout_secs == 0 {
            return Err(anyhow!("dispatch.remote_timeout_secs must be > 0"));
        }
        if self.self_heal.timeout_secs == 0 {
            return Err(anyhow!("self_heal.timeout_secs must be > 0"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.skills.output_limit_bytes == 0 {
            return Err(anyhow!("skills.output_limit_bytes must be > 0"));
        }
        for (key, dir) in [
            ("verticals.codegen_output_dir", &self.verticals.codegen_output_dir),
            (
                "verticals.code_review_output_dir",
                &self.verticals.code_review_output_dir,
            ),
        ] {
            let path = Path::new(dir);
            if dir.trim().is_empty() || path.is_absolute() || dir.contains("..") {
                return Err(anyhow!(
                    "{key} must be a non-empty relative directory inside project_root"
                ));
            }
        }
        if self.verticals.artifact_extension.trim().is_empty()
            || self.verticals.artifact_extension.contains(['/', '\\', '.'])
        {
            return Err(anyhow!(
                "verticals.artifact_extension must be a bare extension like \"py\""
            ));
        }
        Ok(())
    }

    /// Overlay `RLM_*` variables from `lookup` onto this config.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`; tests pass a map instead
    /// of mutating the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).map(|raw| is_truthy(&raw));

        if let Some(v) = flag("RLM_MOCK_MODE") {
            self.mock_mode = v;
        }
        if let Some(v) = flag("RLM_ALLOW_LOCAL_DISPATCH") {
            self.dispatch.allow_local = v;
        }
        if let Some(v) = flag("RLM_ACTIONS_VIA_REMOTE") {
            self.dispatch.via_remote = v;
        }
        if let Some(v) = flag("RLM_ALLOW_REAL_DISPATCH") {
            self.dispatch.allow_real = v;
        }
        if let Some(v) = flag("RLM_ALLOW_SELF_HEAL") {
            self.self_heal.enabled = v;
        }
        if let Some(v) = flag("RLM_ALLOW_OUTBOUND") {
            self.generator.allow_outbound = v;
        }
        if let Some(raw) = lookup("RLM_VERTICAL_USE_CASE") {
            self.vertical = Vertical::parse_optional(Some(&raw))?;
        }
        if let Some(raw) = lookup("RLM_PROJECT_ROOT").filter(|v| !v.trim().is_empty()) {
            self.project_root = PathBuf::from(raw.trim());
        }
        if let Some(raw) = lookup("RLM_CODEGEN_OUTPUT_DIR").filter(|v| !v.trim().is_empty()) {
            self.verticals.codegen_output_dir = raw.trim().to_string();
        }
        if let Some(raw) = lookup("RLM_CODE_REVIEW_OUTPUT_DIR").filter(|v| !v.trim().is_empty())
        {
            self.verticals.code_review_output_dir = raw.trim().to_string();
        }
        if let Some(raw) = lookup("RLM_STUB_JSON").filter(|v| !v.is_empty()) {
            self.generator.stub_json = Some(raw);
        }
        if let Some(raw) = lookup("RLM_ORCHESTRATOR_URL").filter(|v| !v.trim().is_empty()) {
            self.orchestrator.base_url = Some(raw.trim().to_string());
        }
        if let Some(raw) = lookup("RLM_ACTION_LOG").filter(|v| !v.trim().is_empty()) {
            self.action_log_path = Some(PathBuf::from(raw.trim()));
        }
        Ok(())
    }
}

/// Accepts `1/true/yes/y/on` (case-insensitive, trimmed).
pub fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BridgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = BridgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from `path`, then apply `RLM_*` overrides from the process environment.
pub fn load_config_with_env(path: &Path) -> Result<BridgeConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env_overrides(|name| std::env::var(name).ok())
        .context("apply RLM_* environment overrides")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Render a configuration as the TOML accepted by [`load_config`].
pub fn render_config(cfg: &BridgeConfig) -> Result<String> {
    let mut rendered = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    Ok(rendered)
}

/// Save a validated configuration snapshot to `path`.
///
/// The file is staged next to its destination and renamed into place, so a
/// reader never observes a half-written config.
pub fn save_config(path: &Path, cfg: &BridgeConfig) -> Result<()> {
    cfg.validate()?;
    let rendered = render_config(cfg)?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("config path {} has no file name", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;

    let staging = dir.join(format!(".{}.partial", name.to_string_lossy()));
    let mut file =
        File::create(&staging).with_context(|| format!("create {}", staging.display()))?;
    file.write_all(rendered.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("write {}", staging.display()))?;
    drop(file);
    fs::rename(&staging, path).with_context(|| format!("move config into {}", path.display()))?;
    debug!(path = %path.display(), "config saved");
    Ok(())
}
