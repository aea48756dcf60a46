//! Self-heal reporting: hand structural failures to the patch authority.
//!
//! Best-effort by contract. Every orchestrator error is logged at `warn` and
//! swallowed, so the caller's user-visible failure message is never replaced.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::types::{LoopFault, PatchApplyResult};
use crate::io::action_log::{ActionLog, ActionRecord};
use crate::io::config::SelfHealConfig;
use crate::io::orchestrator::{ApplyPatchRequest, Orchestrator, PatchRequest};

/// Component tag sent with every remediation request.
pub const SELF_HEAL_COMPONENT: &str = "python_skill";

/// What happened when a failure was reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfHealOutcome {
    pub patch_id: String,
    pub requires_hitl: bool,
    /// Present when the patch was auto-applied.
    pub applied: Option<PatchApplyResult>,
}

pub struct SelfHealReporter {
    config: SelfHealConfig,
    orchestrator: Arc<dyn Orchestrator>,
    action_log: Arc<ActionLog>,
}

impl SelfHealReporter {
    pub fn new(
        config: SelfHealConfig,
        orchestrator: Arc<dyn Orchestrator>,
        action_log: Arc<ActionLog>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            action_log,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Request a remediation for `error_trace` and auto-apply it unless a
    /// human must approve.
    ///
    /// Returns `None` when self-heal is disabled or the proposal call failed.
    #[instrument(skip_all, fields(component = component, trace_len = error_trace.len()))]
    pub fn report(&self, error_trace: &str, component: &str) -> Option<SelfHealOutcome> {
        if !self.config.enabled {
            info!("self-heal disabled; failure logged only");
            self.record(component, None, false, Some("self-heal disabled".to_string()));
            return None;
        }
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let proposal = match self.orchestrator.propose_patch(
            &PatchRequest {
                error_trace: error_trace.to_string(),
                component: component.to_string(),
            },
            timeout,
        ) {
            Ok(proposal) => proposal,
            Err(err) => {
                let fault = LoopFault::SelfHealUnavailable(err.to_string());
                warn!(err = %fault, "propose patch failed");
                self.record(component, None, false, Some(fault.to_string()));
                return None;
            }
        };
        info!(patch_id = %proposal.patch_id, requires_hitl = proposal.requires_hitl, "patch proposed");

        if proposal.requires_hitl {
            self.record(component, Some(&proposal.patch_id), false, None);
            return Some(SelfHealOutcome {
                patch_id: proposal.patch_id,
                requires_hitl: true,
                applied: None,
            });
        }

        let applied = match self.orchestrator.apply_patch(
            &ApplyPatchRequest {
                patch_id: proposal.patch_id.clone(),
                approved: true,
                component: component.to_string(),
            },
            timeout,
        ) {
            Ok(result) => {
                info!(success = result.success, commit = %result.commit_hash, "patch applied");
                self.record(component, Some(&proposal.patch_id), result.success, None);
                Some(result)
            }
            Err(err) => {
                let fault = LoopFault::SelfHealUnavailable(err.to_string());
                warn!(err = %fault, "apply patch failed");
                self.record(component, Some(&proposal.patch_id), false, Some(fault.to_string()));
                None
            }
        };

        Some(SelfHealOutcome {
            patch_id: proposal.patch_id,
            requires_hitl: false,
            applied,
        })
    }

    fn record(&self, component: &str, patch_id: Option<&str>, applied: bool, error: Option<String>) {
        self.action_log.record(&ActionRecord::SelfHeal {
            component: component.to_string(),
            patch_id: patch_id.map(str::to_string),
            applied,
            error,
        });
    }
}
