//! HTTP route handlers.
//!
//! The engine is synchronous and may block on outbound calls, so every
//! engine call runs on a blocking worker.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use rlm::core::types::{Query, RlmSummary, Vertical};
use rlm::looping::run_multi_turn;
use rlm::self_heal::SelfHealOutcome;
use rlm::step::MAX_RECURSION_DEPTH;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::AppState;

const DEFAULT_MAX_TURNS: u32 = 5;

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/rlm", post(rlm_step))
        .route("/rlm-multi-turn", post(rlm_multi_turn))
        .route("/health", get(health))
        .route("/health/config", get(health_config))
        .route("/debug", post(debug_trigger))
}

/// POST /rlm - run one reasoning step.
async fn rlm_step(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> Result<Json<RlmSummary>, ApiError> {
    let engine = state.engine.clone();
    let summary = tokio::task::spawn_blocking(move || engine.step(&query))
        .await
        .map_err(join_error)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct MultiTurnRequest {
    #[serde(flatten)]
    query: Query,
    #[serde(default)]
    max_turns: Option<u32>,
    #[serde(default)]
    vertical_use_case: Option<String>,
}

/// POST /rlm-multi-turn - run steps until convergence or `max_turns`.
async fn rlm_multi_turn(
    State(state): State<AppState>,
    Json(request): Json<MultiTurnRequest>,
) -> Result<Json<Vec<RlmSummary>>, ApiError> {
    let limit = state.engine.config().max_turns_limit;
    let max_turns = request.max_turns.unwrap_or(DEFAULT_MAX_TURNS);
    if max_turns > limit {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("max_turns {max_turns} exceeds limit {limit}"),
        ));
    }
    let vertical = Vertical::parse_optional(request.vertical_use_case.as_deref())
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, err.to_string()))?;

    let engine = state.engine.clone();
    let query = request.query;
    let summaries = tokio::task::spawn_blocking(move || {
        run_multi_turn(&engine, &query, max_turns, vertical, |_, _| {})
    })
    .await
    .map_err(join_error)?;
    info!(turns = summaries.len(), "multi-turn run finished");
    Ok(Json(summaries))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    depth_cap: u32,
}

/// GET /health - liveness.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "operational",
        service: "rlm-server",
        depth_cap: MAX_RECURSION_DEPTH,
    })
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    mock_mode: bool,
    allow_local_dispatch: bool,
    actions_via_remote: bool,
    allow_real_dispatch: bool,
    allow_self_heal: bool,
    vertical_use_case: Option<Vertical>,
    orchestrator_configured: bool,
    skills: Vec<String>,
    allow_list_hash: String,
    max_turns_limit: u32,
}

/// GET /health/config - effective feature flags and registered skills.
async fn health_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let engine = &state.engine;
    let config = engine.config();
    Json(ConfigResponse {
        mock_mode: config.mock_mode,
        allow_local_dispatch: config.dispatch.allow_local,
        actions_via_remote: config.dispatch.via_remote,
        allow_real_dispatch: config.dispatch.allow_real,
        allow_self_heal: engine.self_heal_enabled(),
        vertical_use_case: config.vertical,
        orchestrator_configured: config.orchestrator.base_url.is_some(),
        skills: engine.skill_names(),
        allow_list_hash: engine.allow_list_hash().to_string(),
        max_turns_limit: config.max_turns_limit,
    })
}

#[derive(Debug, Deserialize)]
struct DebugRequest {
    trigger_error: String,
}

#[derive(Debug, Serialize)]
struct DebugResponse {
    reported: bool,
    self_heal: Option<SelfHealOutcome>,
}

/// POST /debug - push an arbitrary error trace through the self-heal flow.
async fn debug_trigger(
    State(state): State<AppState>,
    Json(request): Json<DebugRequest>,
) -> Result<Json<DebugResponse>, ApiError> {
    if request.trigger_error.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "trigger_error must not be empty"));
    }
    let engine = state.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.report_failure(&request.trigger_error))
        .await
        .map_err(join_error)?;
    Ok(Json(DebugResponse {
        reported: outcome.is_some(),
        self_heal: outcome,
    }))
}

fn join_error(err: tokio::task::JoinError) -> ApiError {
    warn!(err = %err, "engine worker failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "engine worker failed")
}
