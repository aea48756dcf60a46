//! Action dispatch: route one requested action to the orchestrator or the
//! in-process skill registry and normalize the result into an [`Observation`].
//!
//! Dispatch never fails outward. Timeouts, refusals, skill errors and skill
//! panics all become failure observations.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::route::DispatchRoute;
use crate::core::types::{Action, LoopFault, Observation};
use crate::io::action_log::{ActionLog, ActionRecord};
use crate::io::config::DispatchConfig;
use crate::io::orchestrator::{ActionRequest, Orchestrator};
use crate::io::skills::{EXECUTE_SKILL, SkillContext, SkillRegistry};

/// How many `execute_skill` wrappers a single action may carry.
pub const MAX_INDIRECTION_DEPTH: u32 = 1;

pub struct Dispatcher {
    config: DispatchConfig,
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<SkillRegistry>,
    skills: SkillContext,
    action_log: Arc<ActionLog>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        orchestrator: Arc<dyn Orchestrator>,
        registry: Arc<SkillRegistry>,
        skills: SkillContext,
        action_log: Arc<ActionLog>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            registry,
            skills,
            action_log,
        }
    }

    pub fn route(&self) -> DispatchRoute {
        DispatchRoute::select(&self.config)
    }

    /// Execute `action` at reasoning depth `depth`.
    #[instrument(skip_all, fields(skill = %action.skill_name, reasoning_id = %action.reasoning_id, depth = depth))]
    pub fn dispatch(&self, action: &Action, depth: u32) -> Observation {
        let route = self.route();
        debug!(route = route.label(), "dispatch route selected");
        self.dispatch_routed(&route, action, depth, 0)
    }

    fn dispatch_routed(
        &self,
        route: &DispatchRoute,
        action: &Action,
        depth: u32,
        indirection: u32,
    ) -> Observation {
        if action.skill_name == EXECUTE_SKILL {
            if indirection >= MAX_INDIRECTION_DEPTH {
                warn!(indirection, "nested execute_skill rejected");
                return self.finish(
                    route,
                    action,
                    depth,
                    Observation::failure(format!(
                        "execute_skill nesting exceeds {MAX_INDIRECTION_DEPTH} level(s)"
                    )),
                );
            }
            return match action.unwrap_meta() {
                Ok(inner) => {
                    debug!(inner = %inner.skill_name, "unwrapped execute_skill");
                    self.dispatch_routed(route, &inner, depth, indirection + 1)
                }
                Err(reason) => self.finish(route, action, depth, Observation::failure(reason)),
            };
        }

        let observation = match route {
            DispatchRoute::Remote { mock } => self.run_remote(action, depth, *mock),
            DispatchRoute::Local => self.run_local(action),
            DispatchRoute::Denied { reason } => {
                Observation::failure(LoopFault::DispatchDenied(reason.clone()).to_string())
            }
        };
        self.finish(route, action, depth, observation)
    }

    fn run_remote(&self, action: &Action, depth: u32, mock: bool) -> Observation {
        let timeout = Duration::from_secs(self.config.remote_timeout_secs);
        let request = ActionRequest {
            skill_name: action.skill_name.clone(),
            params: action.params.clone(),
            depth,
            reasoning_id: action.reasoning_id.clone(),
            mock_mode: mock,
            allow_list_hash: self.registry.allow_list_hash().to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };
        match self.orchestrator.execute_action(&request, timeout) {
            Ok(response) if response.success => Observation::ok(response.observation),
            Ok(response) => {
                let error = if response.error.trim().is_empty() {
                    "remote execution reported failure".to_string()
                } else {
                    response.error
                };
                Observation {
                    success: false,
                    text: response.observation,
                    error: Some(LoopFault::DispatchFailure(error).to_string()),
                }
            }
            Err(err) => Observation::failure(LoopFault::DispatchFailure(err.to_string()).to_string()),
        }
    }

    /// Run a registry skill in-process. Errors and panics become failures.
    pub fn run_local(&self, action: &Action) -> Observation {
        let registry = &self.registry;
        let skills = &self.skills;
        let result = catch_unwind(AssertUnwindSafe(|| {
            registry.execute(&action.skill_name, &action.params, skills)
        }));
        match result {
            Ok(Ok(text)) => Observation::ok(text),
            Ok(Err(err)) => Observation::failure(format!("{err:#}")),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(skill = %action.skill_name, %message, "skill panicked");
                Observation::failure(format!("skill {} panicked: {message}", action.skill_name))
            }
        }
    }

    fn finish(
        &self,
        route: &DispatchRoute,
        action: &Action,
        depth: u32,
        observation: Observation,
    ) -> Observation {
        if observation.success {
            info!(route = route.label(), skill = %action.skill_name, "action dispatched");
        } else {
            warn!(
                route = route.label(),
                skill = %action.skill_name,
                error = observation.display_text(),
                "action failed"
            );
        }
        self.action_log.record(&ActionRecord::Dispatch {
            skill_name: action.skill_name.clone(),
            reasoning_id: action.reasoning_id.clone(),
            depth,
            route: route.label().to_string(),
            success: observation.success,
            error: observation.error.clone(),
        });
        observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::orchestrator::ActionResponse;
    use crate::test_support::{RecordingOrchestrator, ScriptedTestRunner};
    use serde_json::{Map, Value, json};
    use std::fs;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    fn dispatcher(
        config: DispatchConfig,
        orchestrator: Arc<RecordingOrchestrator>,
        root: &std::path::Path,
    ) -> Dispatcher {
        Dispatcher::new(
            config,
            orchestrator,
            Arc::new(SkillRegistry::builtin(&[]).expect("registry")),
            SkillContext::new(root, Arc::new(ScriptedTestRunner::passing("ok"))),
            Arc::new(ActionLog::disabled()),
        )
    }

    fn local() -> DispatchConfig {
        DispatchConfig {
            allow_local: true,
            ..DispatchConfig::default()
        }
    }

    fn remote(allow_real: bool) -> DispatchConfig {
        DispatchConfig {
            via_remote: true,
            allow_real,
            ..DispatchConfig::default()
        }
    }

    #[test]
    fn local_dispatch_runs_registry_skill() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("hello.txt"), "hello world").expect("write");
        let d = dispatcher(local(), Arc::new(RecordingOrchestrator::default()), temp.path());
        let obs = d.dispatch(
            &Action::new("peek_file", params(json!({"path": "hello.txt", "start": 0, "end": 5}))),
            0,
        );
        assert!(obs.success);
        assert!(obs.text.ends_with("hello"));
    }

    #[test]
    fn local_skill_error_becomes_failure_observation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let d = dispatcher(local(), Arc::new(RecordingOrchestrator::default()), temp.path());
        let obs = d.dispatch(&Action::new("peek_file", params(json!({"path": "missing.txt"}))), 0);
        assert!(!obs.success);
        assert!(obs.display_text().contains("missing.txt"));
    }

    #[test]
    fn unknown_skill_is_a_failure_not_a_fault() {
        let temp = tempfile::tempdir().expect("tempdir");
        let d = dispatcher(local(), Arc::new(RecordingOrchestrator::default()), temp.path());
        let obs = d.dispatch(&Action::new("launch_rockets", Map::new()), 0);
        assert!(!obs.success);
        assert!(obs.display_text().contains("not registered"));
    }

    #[test]
    fn denied_when_no_route_enabled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let d = dispatcher(DispatchConfig::default(), orchestrator.clone(), temp.path());
        let obs = d.dispatch(&Action::new("list_dir", Map::new()), 0);
        assert!(!obs.success);
        assert!(obs.display_text().starts_with("Dispatch denied"));
        assert!(orchestrator.executed().is_empty());
    }

    #[test]
    fn remote_dispatch_sends_mock_flag_and_hash() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(RecordingOrchestrator::default().with_action_response(
            ActionResponse {
                success: true,
                observation: "Observation: mock executed skill=peek_file".to_string(),
                error: String::new(),
            },
        ));
        let d = dispatcher(remote(false), orchestrator.clone(), temp.path());
        let mut action = Action::new("peek_file", params(json!({"path": "README.md"})));
        action.reasoning_id = "r-7".to_string();
        let obs = d.dispatch(&action, 2);

        assert!(obs.success);
        assert!(obs.text.contains("mock executed"));
        let sent = orchestrator.executed();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].mock_mode);
        assert_eq!(sent[0].depth, 2);
        assert_eq!(sent[0].reasoning_id, "r-7");
        assert_eq!(sent[0].timeout_ms, 5_000);
        assert_eq!(sent[0].allow_list_hash.len(), 64);
    }

    #[test]
    fn real_dispatch_clears_mock_flag() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let d = dispatcher(remote(true), orchestrator.clone(), temp.path());
        d.dispatch(&Action::new("peek_file", Map::new()), 0);
        assert!(!orchestrator.executed()[0].mock_mode);
    }

    #[test]
    fn remote_timeout_surfaces_error_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(RecordingOrchestrator::default().with_action_timeout());
        let d = dispatcher(remote(false), orchestrator, temp.path());
        let obs = d.dispatch(&Action::new("peek_file", Map::new()), 0);
        assert!(!obs.success);
        assert!(obs.display_text().contains("Execution timed out"));
    }

    #[test]
    fn remote_reported_failure_keeps_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(RecordingOrchestrator::default().with_action_response(
            ActionResponse {
                success: false,
                observation: String::new(),
                error: "skill not allowed".to_string(),
            },
        ));
        let d = dispatcher(remote(false), orchestrator, temp.path());
        let obs = d.dispatch(&Action::new("peek_file", Map::new()), 0);
        assert_eq!(obs.display_text(), "skill not allowed");
    }

    #[test]
    fn execute_skill_unwraps_one_level_and_inherits_reasoning_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let d = dispatcher(remote(false), orchestrator.clone(), temp.path());
        let mut outer = Action::new(
            EXECUTE_SKILL,
            params(json!({"skill_name": "peek_file", "params": {"path": "README.md"}})),
        );
        outer.reasoning_id = "outer-1".to_string();
        let obs = d.dispatch(&outer, 0);

        assert!(obs.success);
        let sent = orchestrator.executed();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].skill_name, "peek_file");
        assert_eq!(sent[0].reasoning_id, "outer-1");
    }

    #[test]
    fn execute_skill_chains_into_local_skill() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("README.md"), "# Title\n\nBody").expect("write");
        let d = dispatcher(local(), Arc::new(RecordingOrchestrator::default()), temp.path());
        let outer = Action::new(
            EXECUTE_SKILL,
            params(json!({
                "skill_name": "peek_file",
                "params": {"path": "README.md", "start": 0, "end": 7},
                "reasoning_id": "chained-1"
            })),
        );
        let obs = d.dispatch(&outer, 0);
        assert!(obs.success);
        assert!(obs.text.ends_with("# Title"));
    }

    #[test]
    fn nested_execute_skill_beyond_bound_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let d = dispatcher(remote(false), orchestrator.clone(), temp.path());
        let outer = Action::new(
            EXECUTE_SKILL,
            params(json!({
                "skill_name": EXECUTE_SKILL,
                "params": {"skill_name": "peek_file", "params": {}}
            })),
        );
        let obs = d.dispatch(&outer, 0);
        assert!(!obs.success);
        assert!(obs.display_text().contains("nesting exceeds 1"));
        assert!(orchestrator.executed().is_empty());
    }

    #[test]
    fn execute_skill_without_inner_name_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let d = dispatcher(local(), Arc::new(RecordingOrchestrator::default()), temp.path());
        let obs = d.dispatch(&Action::new(EXECUTE_SKILL, Map::new()), 0);
        assert!(!obs.success);
        assert!(obs.display_text().contains("params.skill_name"));
    }
}
