// =============================================================================
// HTTP HANDLERS
// =============================================================================
// Axum handlers, one submodule per resource. Handlers stay thin: extract,
// validate, call a service built from AppState, shape the response.
//
// LEARNING NOTES:
// - Handlers are async functions that return something implementing
//   IntoResponse; AppResult<T> works because AppError implements it too
// - Extractors (State, Path, Query, Json, CurrentUser) run before the body
//   and reject the request on their own when they fail
// =============================================================================

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod orders;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use validator::Validate;

use crate::clock::Clock;
use crate::error::AppResult;
use crate::models::{HealthResponse, ReadinessChecks, ReadinessResponse};
use crate::rate_limit::{self, Decision, LimitClass};
use crate::AppState;

/// Run the derive(Validate) rules of a request body
pub(crate) fn validate<T: Validate>(body: &T) -> AppResult<()> {
    body.validate()?;
    Ok(())
}

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness probe
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe: database and Redis must both answer
///
/// GET /ready
///
/// # Response
/// - 200 OK: ready
/// - 503 Service Unavailable: same body, with the failing check set to false
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let db_healthy = state.db.health_check().await;
    let redis_healthy = redis::cmd("PING")
        .query_async::<_, String>(&mut state.redis.clone())
        .await
        .is_ok();

    let all_healthy = db_healthy && redis_healthy;
    let (status, code) = if all_healthy {
        ("ready", StatusCode::OK)
    } else {
        ("not_ready", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(ReadinessResponse {
            status: status.to_string(),
            checks: ReadinessChecks {
                database: db_healthy,
                redis: redis_healthy,
            },
        }),
    )
}

// =============================================================================
// METRICS ENDPOINT
// =============================================================================
/// Prometheus metrics in text exposition format
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

// =============================================================================
// RATE LIMIT STATUS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ClassStatus {
    pub class: LimitClass,
    #[serde(flatten)]
    pub decision: Decision,
}

#[derive(Debug, Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub client: String,
    pub window_seconds: u64,
    pub limits: Vec<ClassStatus>,
}

/// Where the caller stands in every limit class, without counting anything
///
/// GET /api/v1/rate-limit/status
pub async fn rate_limit_status(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Json<RateLimitStatus> {
    let client = rate_limit::client_key(&state, &request);
    let now_secs = state.clock.now().timestamp().max(0) as u64;

    let classes = [
        LimitClass::Auth,
        LimitClass::Admin,
        LimitClass::Health,
        LimitClass::Read,
        LimitClass::Write,
        LimitClass::Other,
    ];
    let mut limits = Vec::with_capacity(classes.len());
    for class in classes {
        limits.push(ClassStatus {
            class,
            decision: state.limiter.status(&client, class, now_secs).await,
        });
    }

    Json(RateLimitStatus {
        enabled: state.limiter.is_enabled(),
        client,
        window_seconds: rate_limit::WINDOW_SECS,
        limits,
    })
}
