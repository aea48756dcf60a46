//! Multi-turn driver: repeat single steps, threading each summary into the
//! next turn's context.

use tracing::{info, instrument};

use crate::core::types::{Query, RlmSummary, Vertical};
use crate::step::StepEngine;

/// Run up to `max_turns` steps, stopping early at the first converged one.
///
/// `vertical_override` replaces the configured vertical for this run only.
/// `on_turn` observes each summary as it is produced (1-indexed turn).
#[instrument(skip_all, fields(max_turns = max_turns))]
pub fn run_multi_turn<F>(
    engine: &StepEngine,
    query: &Query,
    max_turns: u32,
    vertical_override: Option<Vertical>,
    mut on_turn: F,
) -> Vec<RlmSummary>
where
    F: FnMut(u32, &RlmSummary),
{
    let vertical = vertical_override.or(engine.config().vertical);
    let mut summaries = Vec::new();
    let mut current = query.clone();

    for turn in 1..=max_turns {
        let summary = engine.step_with_vertical(&current, vertical);
        on_turn(turn, &summary);
        let converged = summary.converged;
        current = current.next_turn(&summary.summary);
        summaries.push(summary);
        if converged {
            info!(turn, "converged");
            return summaries;
        }
    }
    info!(turns = summaries.len(), "turn budget exhausted");
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::BridgeConfig;
    use crate::step::EngineDeps;
    use crate::test_support::{RecordingOrchestrator, ScriptedGenerator, ScriptedTestRunner};
    use std::sync::Arc;

    fn engine(generator: Arc<ScriptedGenerator>) -> StepEngine {
        StepEngine::new(
            Arc::new(BridgeConfig::default()),
            EngineDeps {
                generator,
                orchestrator: Arc::new(RecordingOrchestrator::default()),
                test_runner: Arc::new(ScriptedTestRunner::passing("ok")),
            },
        )
        .expect("engine")
    }

    #[test]
    fn stops_at_first_converged_turn() {
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"thought":"turn1","action":null,"is_final":false}"#,
            r#"{"thought":"turn2","action":null,"is_final":true}"#,
        ]));
        let mut seen = Vec::new();
        let summaries = run_multi_turn(
            &engine(generator.clone()),
            &Query::new("Analyze error, propose fix"),
            4,
            None,
            |turn, _| seen.push(turn),
        );
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1], RlmSummary::converged("turn2"));
        assert_eq!(seen, vec![1, 2]);
        generator.assert_drained();
    }

    #[test]
    fn context_accumulates_previous_summaries() {
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"thought":"first","is_final":false}"#,
            r#"{"thought":"second","is_final":false}"#,
            r#"{"thought":"third","is_final":true}"#,
        ]));
        run_multi_turn(
            &engine(generator.clone()),
            &Query::new("q").with_context("seed").with_depth(1),
            3,
            None,
            |_, _| {},
        );
        let requests = generator.requests();
        assert_eq!(requests[0].context, "seed");
        assert_eq!(requests[1].context, "seed\nfirst");
        assert_eq!(requests[2].context, "seed\nfirst\nsecond");
        assert!(requests.iter().all(|r| r.depth == 1));
    }

    #[test]
    fn exhausted_budget_returns_every_turn() {
        let generator = Arc::new(ScriptedGenerator::repeating(
            r#"{"thought":"again","is_final":false}"#,
        ));
        let summaries =
            run_multi_turn(&engine(generator), &Query::new("q"), 3, None, |_, _| {});
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|s| !s.converged));
    }

    #[test]
    fn zero_turns_returns_empty() {
        let generator = Arc::new(ScriptedGenerator::new(Vec::<String>::new()));
        let summaries =
            run_multi_turn(&engine(generator.clone()), &Query::new("q"), 0, None, |_, _| {});
        assert!(summaries.is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn vertical_override_reaches_generator() {
        let generator = Arc::new(ScriptedGenerator::new([r#"{"thought":"t","is_final":false}"#]));
        run_multi_turn(
            &engine(generator.clone()),
            &Query::new("q"),
            1,
            Some(Vertical::Personal),
            |_, _| {},
        );
        assert_eq!(generator.requests()[0].vertical, Some(Vertical::Personal));
    }
}
