//! REST handlers for enrollment, the scheduler trigger, and tracking
//! callbacks.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use coursedrip_core::types::RecipientFilter;
use coursedrip_core::DripError;
use coursedrip_sequences::enroll::{BulkEnrollOptions, BulkEnrollReport, EnrollOptions, EnrollOutcome};
use coursedrip_sequences::engine::RunSummary;
use coursedrip_sequences::types::Enrollment;
use coursedrip_sequences::{EnrollmentService, SequenceRunner, TrackingService};

/// Maximum string field length (tags, exit reasons, etc.).
const MAX_FIELD_LEN: usize = 256;

/// Maximum tags accepted in one filter.
const MAX_FILTER_TAGS: usize = 32;

/// Maximum bulk chunk size a caller may request.
const MAX_BATCH_SIZE: usize = 1000;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub enrollment: Arc<EnrollmentService>,
    pub runner: Arc<SequenceRunner>,
    pub tracking: Arc<TrackingService>,
    pub run_secret: Option<String>,
    pub start_time: Instant,
}

#[derive(Deserialize)]
pub struct EnrollRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub re_enroll: bool,
}

#[derive(Serialize)]
pub struct EnrollResponse {
    pub message: &'static str,
    pub enrollment: Enrollment,
}

#[derive(Deserialize)]
pub struct BulkEnrollRequest {
    #[serde(default)]
    pub filter: RecipientFilter,
    #[serde(default)]
    pub options: BulkEnrollOptions,
}

#[derive(Deserialize)]
pub struct ExitRequest {
    pub user_id: Uuid,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct TrackingRequest {
    pub record_id: Uuid,
}

#[derive(Serialize)]
pub struct TrackingResponse {
    pub tracked: bool,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_body(error: &str, message: impl Into<String>) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: error.to_string(),
        message: message.into(),
    })
}

fn map_drip_error(e: DripError) -> ApiError {
    let status = match &e {
        DripError::SequenceNotFound(_)
        | DripError::RecipientNotFound(_)
        | DripError::EnrollmentNotFound { .. } => StatusCode::NOT_FOUND,
        DripError::SequenceInactive(_) | DripError::EmptySequence(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error_body("request_failed", e.to_string()))
}

/// Validate a recipient filter at the API boundary.
fn validate_filter(filter: &RecipientFilter) -> Result<(), &'static str> {
    let tags = filter.required_tags.iter().chain(filter.excluded_tags.iter());
    let mut count = 0usize;
    for tag in tags {
        count += 1;
        if tag.is_empty() {
            return Err("filter tags must not be empty");
        }
        if tag.len() > MAX_FIELD_LEN {
            return Err("filter tag exceeds maximum length");
        }
    }
    if count > MAX_FILTER_TAGS {
        return Err("filter exceeds maximum number of tags");
    }
    Ok(())
}

/// POST /v1/sequences/{id}/enrollments — enroll one user.
pub async fn handle_enroll(
    State(state): State<AppState>,
    Path(sequence_id): Path<Uuid>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<EnrollResponse>, ApiError> {
    let outcome = state
        .enrollment
        .enroll(
            request.user_id,
            sequence_id,
            EnrollOptions {
                re_enroll: request.re_enroll,
            },
        )
        .map_err(map_drip_error)?;

    let message = outcome.user_message();
    let enrollment = match outcome {
        EnrollOutcome::Enrolled(e) | EnrollOutcome::AlreadyEnrolled(e) => e,
    };
    Ok(Json(EnrollResponse {
        message,
        enrollment,
    }))
}

/// POST /v1/sequences/{id}/enrollments/bulk — enroll by filter.
pub async fn handle_bulk_enroll(
    State(state): State<AppState>,
    Path(sequence_id): Path<Uuid>,
    Json(request): Json<BulkEnrollRequest>,
) -> Result<Json<BulkEnrollReport>, ApiError> {
    if let Err(msg) = validate_filter(&request.filter) {
        warn!(error = msg, "bulk enroll validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return Err((StatusCode::BAD_REQUEST, error_body("invalid_filter", msg)));
    }
    if let Some(batch_size) = request.options.batch_size {
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            metrics::counter!("api.validation_errors").increment(1);
            return Err((
                StatusCode::BAD_REQUEST,
                error_body("invalid_batch_size", "batch_size out of range"),
            ));
        }
    }

    let report = state
        .enrollment
        .bulk_enroll(sequence_id, &request.filter, request.options)
        .map_err(map_drip_error)?;
    Ok(Json(report))
}

/// POST /v1/sequences/{id}/exits — out-of-band exit.
pub async fn handle_exit(
    State(state): State<AppState>,
    Path(sequence_id): Path<Uuid>,
    Json(request): Json<ExitRequest>,
) -> Result<Json<Enrollment>, ApiError> {
    if request.reason.is_empty() || request.reason.len() > MAX_FIELD_LEN {
        metrics::counter!("api.validation_errors").increment(1);
        return Err((
            StatusCode::BAD_REQUEST,
            error_body("invalid_reason", "reason must be 1-256 characters"),
        ));
    }

    let enrollment = state
        .enrollment
        .exit(request.user_id, sequence_id, &request.reason)
        .map_err(map_drip_error)?;
    Ok(Json(enrollment))
}

/// POST /v1/scheduler/run — externally-triggered runner pass.
///
/// When a run secret is configured, the `x-run-secret` header must match.
pub async fn handle_run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RunSummary>, ApiError> {
    if let Some(expected) = &state.run_secret {
        let provided = headers
            .get("x-run-secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            warn!("scheduler trigger rejected: bad or missing secret");
            metrics::counter!("api.auth_failures").increment(1);
            return Err((
                StatusCode::UNAUTHORIZED,
                error_body("unauthorized", "missing or invalid run secret"),
            ));
        }
    }

    let summary = state.runner.run_once().await;
    Ok(Json(summary))
}

/// POST /v1/tracking/opens — provider open callback.
pub async fn handle_tracking_open(
    State(state): State<AppState>,
    Json(request): Json<TrackingRequest>,
) -> Json<TrackingResponse> {
    Json(TrackingResponse {
        tracked: state.tracking.record_open(&request.record_id),
    })
}

/// POST /v1/tracking/clicks — provider click callback.
pub async fn handle_tracking_click(
    State(state): State<AppState>,
    Json(request): Json<TrackingRequest>,
) -> Json<TrackingResponse> {
    Json(TrackingResponse {
        tracked: state.tracking.record_click(&request.record_id),
    })
}

/// POST /v1/tracking/replies — inbound-reply attribution callback.
pub async fn handle_tracking_reply(
    State(state): State<AppState>,
    Json(request): Json<TrackingRequest>,
) -> Json<TrackingResponse> {
    Json(TrackingResponse {
        tracked: state.tracking.record_reply(&request.record_id),
    })
}

/// GET /health — health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
