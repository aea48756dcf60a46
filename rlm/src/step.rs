//! One bounded reasoning step.
//!
//! A step is: depth circuit breaker, mock short-circuit, generation, strict
//! schema enforcement, at most one dispatched action, then optional vertical
//! finalization. Every fault is absorbed into the returned [`RlmSummary`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::schema::DecisionValidator;
use crate::core::synthesis::{append_outcome, depth_cap_summary, fold_observation, mock_summary};
use crate::core::types::{LoopFault, Query, RlmSummary, Vertical};
use crate::dispatch::Dispatcher;
use crate::io::action_log::ActionLog;
use crate::io::config::BridgeConfig;
use crate::io::generator::{GenerationRequest, Generator, build_generator};
use crate::io::orchestrator::{HttpOrchestrator, Orchestrator, UnconfiguredOrchestrator};
use crate::io::skills::{CommandTestRunner, SkillContext, SkillRegistry, TestRunner};
use crate::self_heal::{SELF_HEAL_COMPONENT, SelfHealOutcome, SelfHealReporter};
use crate::vertical::{Converged, VerticalFinalizer};

/// Steps at or beyond this depth stop without generating.
pub const MAX_RECURSION_DEPTH: u32 = 5;

/// External collaborators of the engine.
pub struct EngineDeps {
    pub generator: Arc<dyn Generator>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub test_runner: Arc<dyn TestRunner>,
}

pub struct StepEngine {
    config: Arc<BridgeConfig>,
    generator: Arc<dyn Generator>,
    validator: DecisionValidator,
    registry: Arc<SkillRegistry>,
    skills: SkillContext,
    dispatcher: Dispatcher,
    self_heal: SelfHealReporter,
}

impl StepEngine {
    /// Build an engine from explicit collaborators.
    pub fn new(config: Arc<BridgeConfig>, deps: EngineDeps) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(SkillRegistry::builtin(&config.skills.allow_list)?);
        let action_log = Arc::new(ActionLog::new(config.action_log_path.clone()));
        let skills = SkillContext {
            project_root: config.project_root.clone(),
            output_limit_bytes: config.skills.output_limit_bytes,
            test_runner: deps.test_runner,
        };
        let dispatcher = Dispatcher::new(
            config.dispatch.clone(),
            deps.orchestrator.clone(),
            registry.clone(),
            skills.clone(),
            action_log.clone(),
        );
        let self_heal = SelfHealReporter::new(config.self_heal.clone(), deps.orchestrator, action_log);
        info!(
            generator = deps.generator.name(),
            route = dispatcher.route().label(),
            skills = registry.names().len(),
            self_heal = config.self_heal.enabled,
            "step engine ready"
        );
        Ok(Self {
            generator: deps.generator,
            validator: DecisionValidator::new()?,
            registry,
            skills,
            dispatcher,
            self_heal,
            config,
        })
    }

    /// Build an engine with the production generator, orchestrator and test runner.
    ///
    /// Creates blocking HTTP clients; call outside of an async runtime.
    pub fn from_config(config: BridgeConfig) -> Result<Self> {
        let generator = build_generator(&config.generator, |name| std::env::var(name).ok())
            .context("build generator")?;
        let orchestrator: Arc<dyn Orchestrator> = match &config.orchestrator.base_url {
            Some(url) => Arc::new(HttpOrchestrator::new(url).context("build orchestrator client")?),
            None => Arc::new(UnconfiguredOrchestrator),
        };
        Self::new(
            Arc::new(config),
            EngineDeps {
                generator,
                orchestrator,
                test_runner: Arc::new(CommandTestRunner),
            },
        )
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn skill_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn allow_list_hash(&self) -> &str {
        self.registry.allow_list_hash()
    }

    /// Run one step with the configured vertical.
    pub fn step(&self, query: &Query) -> RlmSummary {
        self.step_with_vertical(query, self.config.vertical)
    }

    /// Run one step with an explicit active vertical.
    #[instrument(skip_all, fields(depth = query.depth, vertical = vertical.map(Vertical::as_str)))]
    pub fn step_with_vertical(&self, query: &Query, vertical: Option<Vertical>) -> RlmSummary {
        if query.depth >= MAX_RECURSION_DEPTH {
            warn!(cap = MAX_RECURSION_DEPTH, "depth cap reached");
            return RlmSummary::diverged(depth_cap_summary(query.depth, MAX_RECURSION_DEPTH));
        }
        if query.effective_mock(self.config.mock_mode) {
            debug!("mock short-circuit");
            return RlmSummary::converged(mock_summary(query));
        }

        let request = GenerationRequest {
            query: query.text.clone(),
            context: query.context.clone(),
            depth: query.depth,
            vertical,
            skills: self.registry.names(),
        };
        let raw = match self.generator.generate(&request) {
            Ok(raw) => raw,
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(err = %detail, "generator fault");
                self.self_heal.report(
                    &format!("generator fault at depth {}: {detail}", query.depth),
                    SELF_HEAL_COMPONENT,
                );
                return RlmSummary::diverged(LoopFault::GeneratorUnavailable(detail).to_string());
            }
        };

        let decision = match self.validator.parse(&raw) {
            Ok(decision) => decision,
            Err(violation) => {
                warn!(errors = violation.errors.len(), "generator output rejected by schema");
                self.self_heal
                    .report(&violation.error_trace(), SELF_HEAL_COMPONENT);
                return RlmSummary::diverged(LoopFault::SchemaViolation(violation.detail()).to_string());
            }
        };

        let mut summary = match &decision.action {
            Some(action) => {
                let observation = self.dispatcher.dispatch(action, query.depth);
                fold_observation(&decision.thought, &observation, self.config.observation_limit_bytes)
            }
            None => decision.thought.clone(),
        };

        if !decision.is_final {
            debug!("step not converged");
            return RlmSummary::diverged(summary);
        }

        if let Some(vertical) = vertical.filter(|v| v.finalizes()) {
            let converged = Converged {
                thought: &decision.thought,
                context: &query.context,
                reasoning_id: decision.action.as_ref().map(|a| a.reasoning_id.as_str()),
            };
            let finalizer = VerticalFinalizer::new(&self.config.verticals, &self.skills);
            if let Some(outcome) = finalizer.finalize(vertical, &converged) {
                append_outcome(&mut summary, &outcome);
            }
        }
        info!("step converged");
        RlmSummary::converged(summary)
    }

    /// Report an arbitrary failure to the self-heal flow.
    pub fn report_failure(&self, error_trace: &str) -> Option<SelfHealOutcome> {
        self.self_heal.report(error_trace, SELF_HEAL_COMPONENT)
    }

    pub fn self_heal_enabled(&self) -> bool {
        self.self_heal.enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingOrchestrator, ScriptedGenerator, ScriptedTestRunner};

    fn engine(config: BridgeConfig, generator: Arc<ScriptedGenerator>) -> StepEngine {
        StepEngine::new(
            Arc::new(config),
            EngineDeps {
                generator,
                orchestrator: Arc::new(RecordingOrchestrator::default()),
                test_runner: Arc::new(ScriptedTestRunner::passing("ok")),
            },
        )
        .expect("engine")
    }

    #[test]
    fn depth_cap_stops_before_generation() {
        let generator = Arc::new(ScriptedGenerator::new(Vec::<String>::new()));
        let summary = engine(BridgeConfig::default(), generator.clone())
            .step(&Query::new("deep").with_depth(MAX_RECURSION_DEPTH));
        assert!(!summary.converged);
        assert!(summary.summary.contains("Max recursion depth"));
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn request_mock_false_overrides_mock_default() {
        let generator = Arc::new(ScriptedGenerator::new([r#"{"thought":"real","is_final":true}"#]));
        let config = BridgeConfig {
            mock_mode: true,
            ..BridgeConfig::default()
        };
        let summary = engine(config, generator.clone())
            .step(&Query::new("q").with_mock_mode(Some(false)));
        assert_eq!(summary, RlmSummary::converged("real"));
        generator.assert_drained();
    }

    #[test]
    fn generator_fault_is_absorbed() {
        let generator = Arc::new(ScriptedGenerator::failing("connection refused"));
        let summary = engine(BridgeConfig::default(), generator).step(&Query::new("q"));
        assert!(!summary.converged);
        assert!(summary.summary.to_lowercase().contains("generation failed"));
        assert!(summary.summary.contains("connection refused"));
    }

    #[test]
    fn generator_sees_registered_skills() {
        let generator = Arc::new(ScriptedGenerator::new([r#"{"thought":"t","is_final":true}"#]));
        let config = BridgeConfig {
            skills: crate::io::config::SkillsConfig {
                allow_list: vec!["list_dir".to_string()],
                ..Default::default()
            },
            ..BridgeConfig::default()
        };
        engine(config, generator.clone()).step(&Query::new("q").with_context("prior"));
        let requests = generator.requests();
        assert_eq!(requests[0].skills, vec!["list_dir".to_string()]);
        assert_eq!(requests[0].context, "prior");
    }
}
