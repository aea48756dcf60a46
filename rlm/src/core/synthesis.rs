//! Summary synthesis: how thoughts, observations and fixed messages become
//! the caller-visible summary text.

use crate::core::types::{LoopFault, Observation, Query};

/// Fold an observation into the generator's thought.
///
/// Observation text is appended verbatim (bounded by `limit_bytes`) so any
/// content an action produced stays detectable as a substring of the summary.
pub fn fold_observation(thought: &str, observation: &Observation, limit_bytes: usize) -> String {
    let body = truncate_with_notice(observation.display_text(), limit_bytes);
    let label = if observation.success {
        "Observation"
    } else {
        "Observation (failed)"
    };
    if thought.trim().is_empty() {
        return format!("{label}: {body}");
    }
    format!("{thought}\n\n{label}: {body}")
}

/// Append a finalizer outcome to a summary.
pub fn append_outcome(summary: &mut String, outcome: &str) {
    if outcome.trim().is_empty() {
        return;
    }
    if !summary.is_empty() {
        summary.push_str("\n\n");
    }
    summary.push_str(outcome);
}

/// Deterministic summary for the mock short-circuit.
pub fn mock_summary(query: &Query) -> String {
    format!(
        "[mock] MockMode thought: no outbound calls for query '{}' at depth {}.",
        query.text.trim(),
        query.depth
    )
}

pub fn depth_cap_summary(depth: u32, cap: u32) -> String {
    LoopFault::DepthExceeded { depth, cap }.to_string()
}

/// Keep at most `limit` bytes of `text`, cutting on a char boundary.
pub fn truncate_with_notice(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]",
        &text[..end],
        text.len() - end
    )
}
