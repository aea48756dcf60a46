//! Scripted collaborators for engine tests.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! integration tests under `tests/`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{PatchApplyResult, PatchProposal};
use crate::io::generator::{GenerationRequest, Generator};
use crate::io::orchestrator::{
    ActionRequest, ActionResponse, ApplyPatchRequest, Orchestrator, OrchestratorError, PatchRequest,
};
use crate::io::skills::{TestOutcome, TestRequest, TestRunner};

enum Script {
    Queue(Mutex<VecDeque<String>>),
    Repeat(String),
    Fail(String),
}

/// Generator that replays scripted raw outputs and records every request.
pub struct ScriptedGenerator {
    script: Script,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    /// Return `outputs` in order; errors once they run out.
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Queue(Mutex::new(
            outputs.into_iter().map(Into::into).collect(),
        )))
    }

    /// Return `output` for every request.
    pub fn repeating(output: impl Into<String>) -> Self {
        Self::with_script(Script::Repeat(output.into()))
    }

    /// Fail every request with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(message.into()))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    /// Panic if scripted outputs remain unused.
    pub fn assert_drained(&self) {
        if let Script::Queue(queue) = &self.script {
            let remaining = queue.lock().expect("script lock").len();
            assert_eq!(remaining, 0, "{remaining} scripted generator output(s) unused");
        }
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .expect("script lock")
                .pop_front()
                .ok_or_else(|| anyhow!("scripted generator exhausted")),
            Script::Repeat(output) => Ok(output.clone()),
            Script::Fail(message) => Err(anyhow!("{message}")),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Orchestrator that records every call and answers from configured responses.
///
/// Defaults: actions succeed with `"mock executed skill=<name>"`, proposals
/// return patch `"patch-1"` requiring no human, applies succeed.
#[derive(Default)]
pub struct RecordingOrchestrator {
    action_response: Option<ActionResponse>,
    action_timeout: bool,
    proposal: Option<PatchProposal>,
    patch_failure: bool,
    executed: Mutex<Vec<ActionRequest>>,
    proposals: Mutex<Vec<PatchRequest>>,
    applies: Mutex<Vec<ApplyPatchRequest>>,
}

impl RecordingOrchestrator {
    pub fn with_action_response(mut self, response: ActionResponse) -> Self {
        self.action_response = Some(response);
        self
    }

    /// Every ExecuteAction call times out.
    pub fn with_action_timeout(mut self) -> Self {
        self.action_timeout = true;
        self
    }

    pub fn with_proposal(mut self, proposal: PatchProposal) -> Self {
        self.proposal = Some(proposal);
        self
    }

    /// Every ProposePatch and ApplyPatch call fails.
    pub fn with_patch_failure(mut self) -> Self {
        self.patch_failure = true;
        self
    }

    pub fn executed(&self) -> Vec<ActionRequest> {
        self.executed.lock().expect("executed lock").clone()
    }

    pub fn proposals(&self) -> Vec<PatchRequest> {
        self.proposals.lock().expect("proposals lock").clone()
    }

    pub fn applies(&self) -> Vec<ApplyPatchRequest> {
        self.applies.lock().expect("applies lock").clone()
    }
}

impl Orchestrator for RecordingOrchestrator {
    fn execute_action(
        &self,
        request: &ActionRequest,
        timeout: Duration,
    ) -> Result<ActionResponse, OrchestratorError> {
        self.executed
            .lock()
            .expect("executed lock")
            .push(request.clone());
        if self.action_timeout {
            return Err(OrchestratorError::Timeout {
                ms: timeout.as_millis(),
            });
        }
        Ok(self.action_response.clone().unwrap_or_else(|| ActionResponse {
            success: true,
            observation: format!("mock executed skill={}", request.skill_name),
            error: String::new(),
        }))
    }

    fn propose_patch(
        &self,
        request: &PatchRequest,
        _timeout: Duration,
    ) -> Result<PatchProposal, OrchestratorError> {
        self.proposals
            .lock()
            .expect("proposals lock")
            .push(request.clone());
        if self.patch_failure {
            return Err(OrchestratorError::Unavailable("connection refused".to_string()));
        }
        Ok(self.proposal.clone().unwrap_or_else(|| PatchProposal {
            patch_id: "patch-1".to_string(),
            proposed_code: String::new(),
            requires_hitl: false,
        }))
    }

    fn apply_patch(
        &self,
        request: &ApplyPatchRequest,
        _timeout: Duration,
    ) -> Result<PatchApplyResult, OrchestratorError> {
        self.applies
            .lock()
            .expect("applies lock")
            .push(request.clone());
        if self.patch_failure {
            return Err(OrchestratorError::Unavailable("connection refused".to_string()));
        }
        Ok(PatchApplyResult {
            success: true,
            commit_hash: "abc123".to_string(),
        })
    }
}

/// Test runner with a fixed result that records requests.
pub struct ScriptedTestRunner {
    result: std::result::Result<TestOutcome, String>,
    requests: Mutex<Vec<TestRequest>>,
}

impl ScriptedTestRunner {
    pub fn passing(output: impl Into<String>) -> Self {
        Self::with_result(Ok(TestOutcome {
            passed: true,
            timed_out: false,
            output: output.into(),
        }))
    }

    pub fn failing(output: impl Into<String>) -> Self {
        Self::with_result(Ok(TestOutcome {
            passed: false,
            timed_out: false,
            output: output.into(),
        }))
    }

    /// The suite was killed at its deadline.
    pub fn timing_out(output: impl Into<String>) -> Self {
        Self::with_result(Ok(TestOutcome {
            passed: false,
            timed_out: true,
            output: output.into(),
        }))
    }

    /// The runner itself errors (e.g. the tool is missing).
    pub fn erroring(message: impl Into<String>) -> Self {
        Self::with_result(Err(message.into()))
    }

    fn with_result(result: std::result::Result<TestOutcome, String>) -> Self {
        Self {
            result,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<TestRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestOutcome> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.result.clone().map_err(|message| anyhow!("{message}"))
    }
}
