//! API route handlers.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use tracing::{debug, info};

use palisade_core::pipeline::{AdmissionError, AnalysisRequest};

use crate::error::{ApiError, Result};
use crate::models::{
    AnalyzeRequest, AnalyzeResponse, EventsQuery, EventsResponse, HealthResponse, StatsResponse,
};
use crate::session;
use crate::state::AppState;

/// POST /api/analyze - run one text through the analysis pipeline.
pub async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Response> {
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }

    let identity = session::identity_from_headers(&headers);
    debug!(
        text_len = req.text.len(),
        fresh_identity = identity.issued,
        "analyze request"
    );

    let request = AnalysisRequest {
        text: req.text,
        model: req.model,
        minimal_context: req.has_minimal_context.unwrap_or(false),
    };

    let outcome = state
        .pipeline
        .analyze(&identity.id, &request)
        .await
        .map_err(|e| match e {
            AdmissionError::RateLimited { decision } => ApiError::RateLimited {
                tier: decision
                    .violated
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                retry_after: decision.retry_after_secs(),
            },
            AdmissionError::UpstreamRateLimited { retry_after } => {
                ApiError::UpstreamRateLimited { retry_after }
            }
        })?;

    info!(
        request_id = %outcome.request_id,
        security_block = outcome.security_block,
        cached = outcome.cached,
        fallback = outcome.fallback,
        "analyze complete"
    );

    let body: AnalyzeResponse = outcome.into();
    let mut response = Json(body).into_response();
    if identity.issued {
        if let Ok(value) = HeaderValue::from_str(&session::set_cookie_value(&identity.id)) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    Ok(response)
}

/// GET /api/stats - gate, cache, and security event counters.
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let pipeline = &state.pipeline;

    Ok(Json(StatsResponse {
        identities_tracked: pipeline.gate().tracked_identities(),
        admissions_today: pipeline.gate().admissions_today(),
        cache: pipeline.cache().stats(),
        events: pipeline.audit().counts(),
    }))
}

/// GET /api/events - recent security events.
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>> {
    let limit = query.limit.min(500);

    Ok(Json(EventsResponse {
        events: state.pipeline.audit().recent(limit),
        generated_at: Utc::now(),
    }))
}

/// GET /api/health - liveness and configured models.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        primary_model: state.pipeline.primary_model().to_string(),
        backup_model: state.pipeline.backup_model().to_string(),
    })
}
