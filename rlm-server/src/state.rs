//! Shared application state for the HTTP server.

use std::sync::Arc;

use rlm::step::StepEngine;

/// Shared state accessible from all request handlers.
///
/// The engine is immutable after startup, so handlers only ever borrow it
/// from a blocking worker.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<StepEngine>,
}

impl AppState {
    pub fn new(engine: StepEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}
