//! REST endpoints for the query pipeline
//!
//! Pipeline failures that reach the caller are reported in-band as
//! `{status: "error", message}` payloads, matching the responses the
//! chat frontend already understands.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use nlsql_agentic::orchestrator::{QueryOrchestrator, QueryResponse};

/// Flat rate used for the prompt cost estimate endpoint.
const INPUT_COST_PER_1K_TOKENS: f64 = 0.00144;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<QueryOrchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: QueryOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefinementRequest {
    pub feedback: String,
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiQueryResponse {
    #[serde(flatten)]
    pub result: QueryResponse,
    /// Wall-clock seconds spent serving the request, rounded to 2dp.
    pub processing_time: f64,
}

#[derive(Debug, Deserialize)]
pub struct TokenTestRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TokenUsageResponse {
    pub status: String,
    pub token_count: usize,
    pub estimated_input_cost: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub model: String,
}

// ============================================================================
// Router
// ============================================================================

pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/query", post(query_handler))
        .route("/api/refine", post(refine_handler))
        .route("/api/token-usage", post(token_usage_handler))
        .route("/api/health", get(health_handler))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn query_handler(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Json<ApiQueryResponse> {
    let start = Instant::now();

    let result = match state
        .orchestrator
        .query(&request.question, request.conversation_id)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "query failed");
            QueryResponse::error(e.to_string())
        }
    };

    Json(ApiQueryResponse {
        result,
        processing_time: round2(start.elapsed().as_secs_f64()),
    })
}

async fn refine_handler(
    State(state): State<ApiState>,
    Json(request): Json<RefinementRequest>,
) -> Json<ApiQueryResponse> {
    let start = Instant::now();

    let result = match state
        .orchestrator
        .refine(&request.feedback, &request.conversation_id)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "refinement failed");
            QueryResponse::error(e.to_string())
        }
    };

    Json(ApiQueryResponse {
        result,
        processing_time: round2(start.elapsed().as_secs_f64()),
    })
}

/// Rough cost preview: counts whitespace tokens as a stand-in for
/// model tokens and applies the flat input rate.
async fn token_usage_handler(Json(request): Json<TokenTestRequest>) -> Json<TokenUsageResponse> {
    let token_count = request.text.split_whitespace().count();
    let cost = token_count as f64 / 1000.0 * INPUT_COST_PER_1K_TOKENS;

    Json(TokenUsageResponse {
        status: "success".to_string(),
        token_count,
        estimated_input_cost: format!("${:.6}", cost),
        message: format!(
            "Estimate for {} tokens (words). Actual token usage may differ.",
            token_count
        ),
    })
}

async fn health_handler(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.orchestrator.provider_name().to_string(),
        model: state.orchestrator.model_name().to_string(),
    })
}

fn round2(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

// ============================================================================
// Tests
// ============================================================================
