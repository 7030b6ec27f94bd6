//! Operator HTTP API.
//!
//! Transport layer only: every handler resolves to an engine operation. The
//! caller's identity arrives pre-authenticated in the `x-operator-id` header;
//! requests without it are rejected before any handler runs.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use sw_common::EngineError;
use sw_engine::{
    render, BatchMonitor, BatchPlanner, BatchSummary, DispatchScheduler, RescheduleController,
    RescheduleReport,
};
use sw_store::{RecipientFilter, TemplateStore};

const OPERATOR_HEADER: &str = "x-operator-id";

pub struct AppState {
    pub planner: BatchPlanner,
    pub scheduler: Arc<DispatchScheduler>,
    pub monitor: BatchMonitor,
    pub reschedule: RescheduleController,
    pub templates: Arc<dyn TemplateStore>,
    pub per_send_seconds: f64,
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/estimate", get(get_estimate))
        .route("/batches", post(create_batch).get(list_batches))
        .route("/batches/{id}", get(get_batch))
        .route("/batches/{id}/messages", get(get_messages))
        .route("/batches/{id}/reschedule", post(reschedule_batch))
        .route("/batches/{id}/stop", post(stop_batch))
        .route("/templates/{id}", get(get_template))
        .route("/dashboard", get(get_dashboard))
        .layer(middleware::from_fn(require_operator))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
}

// ============================================================================
// Error mapping
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            EngineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            EngineError::EmptyRecipientSet => (StatusCode::BAD_REQUEST, "EMPTY_RECIPIENT_SET"),
            EngineError::TemplateNotFound(_) => (StatusCode::NOT_FOUND, "TEMPLATE_NOT_FOUND"),
            EngineError::BatchNotFound(_) => (StatusCode::NOT_FOUND, "BATCH_NOT_FOUND"),
            EngineError::NothingToResume(_) => (StatusCode::CONFLICT, "NOTHING_TO_RESUME"),
            EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Operator identity
// ============================================================================

/// The auth layer in front of this service resolves the caller and forwards
/// the operator id. No header, no service.
async fn require_operator(request: Request, next: Next) -> Response {
    if operator_id(request.headers()).is_none() {
        let body = ErrorResponse {
            error: "UNAUTHORIZED".to_string(),
            message: format!("missing {OPERATOR_HEADER} header"),
        };
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }
    next.run(request).await
}

fn operator_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct EstimateQuery {
    total_customers: u32,
    batch_size: u32,
    #[serde(default)]
    delay_seconds: f64,
}

async fn get_estimate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EstimateQuery>,
) -> Result<Json<sw_engine::Estimate>, ApiError> {
    let estimate = sw_engine::estimate(
        query.total_customers,
        query.batch_size,
        query.delay_seconds,
        state.per_send_seconds,
    )?;
    Ok(Json(estimate))
}

#[derive(Debug, Deserialize)]
struct CreateBatchRequest {
    template_id: String,
    #[serde(default)]
    filter: RecipientFilter,
    batch_size: u32,
    #[serde(default)]
    delay_seconds: f64,
}

#[derive(Debug, Serialize)]
struct CreateBatchResponse {
    batch_id: String,
    total_count: u32,
    skipped_count: u32,
    estimate: sw_engine::Estimate,
}

async fn create_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<CreateBatchResponse>), ApiError> {
    // Present by construction: the middleware already rejected the request
    // otherwise.
    let requested_by = operator_id(&headers)
        .ok_or_else(|| EngineError::InvalidInput(format!("missing {OPERATOR_HEADER}")))?;

    let outcome = state
        .planner
        .create_batch(
            &request.template_id,
            &request.filter,
            sw_common::PacingConfig {
                batch_size: request.batch_size,
                delay_seconds: request.delay_seconds,
            },
            &requested_by,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBatchResponse {
            batch_id: outcome.batch_id,
            total_count: outcome.total_count,
            skipped_count: outcome.skipped_count,
            estimate: outcome.estimate,
        }),
    ))
}

async fn list_batches(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BatchSummary>>, ApiError> {
    Ok(Json(state.monitor.list_batches().await?))
}

async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchSummary>, ApiError> {
    Ok(Json(state.monitor.batch_summary(&id).await?))
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<sw_common::Message>>, ApiError> {
    Ok(Json(state.monitor.messages(&id).await?))
}

#[derive(Debug, Serialize)]
struct RescheduleResponse {
    report: RescheduleReport,
    batch: BatchSummary,
}

async fn reschedule_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RescheduleResponse>, ApiError> {
    let report = state.reschedule.reschedule(&id).await?;
    let batch = state.monitor.batch_summary(&id).await?;
    Ok(Json(RescheduleResponse { report, batch }))
}

async fn stop_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchSummary>, ApiError> {
    state.scheduler.stop_batch(&id).await?;
    Ok(Json(state.monitor.batch_summary(&id).await?))
}

#[derive(Debug, Serialize)]
struct TemplateResponse {
    id: String,
    name: String,
    body: String,
    placeholders: Vec<String>,
}

async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TemplateResponse>, ApiError> {
    let template = state
        .templates
        .get_template(&id)
        .await
        .map_err(EngineError::from)?
        .ok_or_else(|| EngineError::TemplateNotFound(id))?;

    let placeholders = render::placeholders(&template.body);
    Ok(Json(TemplateResponse {
        id: template.id,
        name: template.name,
        body: template.body,
        placeholders,
    }))
}

async fn get_dashboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<sw_engine::DashboardStats>, ApiError> {
    Ok(Json(state.monitor.dashboard().await?))
}
