//! Client side of the remote orchestrator: action execution and patch authority.
//!
//! Every call carries an explicit deadline. Nothing here retries.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::core::types::{PatchApplyResult, PatchProposal};

/// ExecuteAction request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub skill_name: String,
    pub params: Map<String, Value>,
    pub depth: u32,
    pub reasoning_id: String,
    pub mock_mode: bool,
    pub allow_list_hash: String,
    pub timeout_ms: u64,
}

/// ExecuteAction response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default)]
    pub observation: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub error_trace: String,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPatchRequest {
    pub patch_id: String,
    pub approved: bool,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Execution timed out after {ms}ms")]
    Timeout { ms: u128 },
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),
    #[error("orchestrator returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("orchestrator transport error: {0}")]
    Transport(String),
}

/// The three RPCs the engine consumes.
pub trait Orchestrator: Send + Sync {
    fn execute_action(
        &self,
        request: &ActionRequest,
        timeout: Duration,
    ) -> Result<ActionResponse, OrchestratorError>;

    fn propose_patch(
        &self,
        request: &PatchRequest,
        timeout: Duration,
    ) -> Result<PatchProposal, OrchestratorError>;

    fn apply_patch(
        &self,
        request: &ApplyPatchRequest,
        timeout: Duration,
    ) -> Result<PatchApplyResult, OrchestratorError>;
}

/// Installed when no orchestrator URL is configured.
pub struct UnconfiguredOrchestrator;

impl Orchestrator for UnconfiguredOrchestrator {
    fn execute_action(
        &self,
        _request: &ActionRequest,
        _timeout: Duration,
    ) -> Result<ActionResponse, OrchestratorError> {
        Err(not_configured())
    }

    fn propose_patch(
        &self,
        _request: &PatchRequest,
        _timeout: Duration,
    ) -> Result<PatchProposal, OrchestratorError> {
        Err(not_configured())
    }

    fn apply_patch(
        &self,
        _request: &ApplyPatchRequest,
        _timeout: Duration,
    ) -> Result<PatchApplyResult, OrchestratorError> {
        Err(not_configured())
    }
}

fn not_configured() -> OrchestratorError {
    OrchestratorError::Unavailable("orchestrator.base_url is not configured".to_string())
}

/// JSON-over-HTTP orchestrator client.
pub struct HttpOrchestrator {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpOrchestrator {
    pub fn new(base_url: &str) -> Result<Self, OrchestratorError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|err| OrchestratorError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, OrchestratorError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, timeout_ms = timeout.as_millis() as u64, "orchestrator call");
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .map_err(|err| transport_error(err, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OrchestratorError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response.json().map_err(|err| transport_error(err, timeout))
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> OrchestratorError {
    if err.is_timeout() {
        return OrchestratorError::Timeout {
            ms: timeout.as_millis(),
        };
    }
    if err.is_connect() {
        return OrchestratorError::Unavailable(err.to_string());
    }
    OrchestratorError::Transport(err.to_string())
}

impl Orchestrator for HttpOrchestrator {
    #[instrument(skip_all, fields(skill = %request.skill_name, reasoning_id = %request.reasoning_id))]
    fn execute_action(
        &self,
        request: &ActionRequest,
        timeout: Duration,
    ) -> Result<ActionResponse, OrchestratorError> {
        self.post("/v1/execute-action", request, timeout)
    }

    #[instrument(skip_all, fields(component = %request.component))]
    fn propose_patch(
        &self,
        request: &PatchRequest,
        timeout: Duration,
    ) -> Result<PatchProposal, OrchestratorError> {
        self.post("/v1/propose-patch", request, timeout)
    }

    #[instrument(skip_all, fields(patch_id = %request.patch_id))]
    fn apply_patch(
        &self,
        request: &ApplyPatchRequest,
        timeout: Duration,
    ) -> Result<PatchApplyResult, OrchestratorError> {
        self.post("/v1/apply-patch", request, timeout)
    }
}
