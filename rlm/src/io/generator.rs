//! Generator abstraction for decision production.
//!
//! The [`Generator`] trait decouples the step engine from the LLM backend.
//! It returns raw text only; schema enforcement happens in the engine, so a
//! generator that returns garbage is indistinguishable from a misbehaving
//! model. Tests use scripted generators that never touch the network.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use minijinja::{Environment, context};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::types::Vertical;
use crate::io::config::GeneratorConfig;

const GENERATOR_TEMPLATE: &str = include_str!("prompts/generator.md");

/// Input for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub query: String,
    pub context: String,
    pub depth: u32,
    pub vertical: Option<Vertical>,
    /// Registered skill names the generator may request.
    pub skills: Vec<String>,
}

/// Abstraction over decision generators.
pub trait Generator: Send + Sync {
    /// Produce raw output that should conform to the Decision schema.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Returns the same raw output for every request.
pub struct StubGenerator {
    raw: String,
}

impl StubGenerator {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

impl Generator for StubGenerator {
    fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Ok(self.raw.clone())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Refuses every request. Installed when no generator is configured.
pub struct DisabledGenerator {
    reason: String,
}

impl DisabledGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Generator for DisabledGenerator {
    fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Err(anyhow!("generator disabled: {}", self.reason))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// OpenAI-compatible chat completions generator.
pub struct OpenAiGenerator {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
    prompts: Environment<'static>,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig, api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build generator http client")?;
        let mut prompts = Environment::new();
        prompts
            .add_template("generator", GENERATOR_TEMPLATE)
            .context("load generator prompt template")?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            prompts,
        })
    }

    fn render_prompt(&self, request: &GenerationRequest) -> Result<String> {
        let template = self.prompts.get_template("generator")?;
        let rendered = template.render(context! {
            query => request.query.trim(),
            context => Some(request.context.trim()).filter(|s| !s.is_empty()),
            depth => request.depth,
            vertical => request.vertical.map(Vertical::as_str),
            skills => &request.skills,
        })?;
        Ok(rendered)
    }
}

impl Generator for OpenAiGenerator {
    #[instrument(skip_all, fields(model = %self.model, depth = request.depth))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let prompt = self.render_prompt(request)?;
        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": {"type": "json_object"},
            "messages": [{"role": "user", "content": prompt}],
        });

        debug!(url = %self.url, "requesting completion");
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .context("send completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "completion request failed");
            bail!("completion request failed with status {status}: {body}");
        }

        let data: Value = response.json().context("parse completion response")?;
        let content = data
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.pointer("/message/content"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("completion response has no message content"))?;
        Ok(content.to_string())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Pick the generator for a configuration.
///
/// A stub output wins; otherwise the HTTP generator when outbound calls are
/// allowed and an API key is present; otherwise a disabled generator.
pub fn build_generator<F>(config: &GeneratorConfig, lookup: F) -> Result<Arc<dyn Generator>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = &config.stub_json {
        info!("using stub generator");
        return Ok(Arc::new(StubGenerator::new(raw.clone())));
    }
    if !config.allow_outbound {
        return Ok(Arc::new(DisabledGenerator::new(
            "outbound generation is not allowed (generator.allow_outbound)",
        )));
    }
    match lookup(&config.api_key_env).filter(|key| !key.trim().is_empty()) {
        Some(key) => {
            info!(model = %config.model, "using openai-compatible generator");
            Ok(Arc::new(OpenAiGenerator::new(config, key)?))
        }
        None => Ok(Arc::new(DisabledGenerator::new(format!(
            "{} is not set",
            config.api_key_env
        )))),
    }
}
