//! HTTP handlers over the [`BatchEngine`] facade.
//!
//! Handlers translate path/body into engine requests and wrap the outcome in
//! the response envelope. No business rules live here.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::engine::BatchEngine;
use crate::types::{
    AssociationStatus, BatchFilter, CloseBatchRequest, CreateBatchRequest, GaugeInput, LabResult,
    RecalculateBatchRequest, RecalculationResult, RevisedInputs, VoidBatchRequest,
};

/// Shared state for every route.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<BatchEngine>,
}

impl ApiState {
    pub fn new(engine: Arc<BatchEngine>) -> Self {
        Self { engine }
    }
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CloseBody {
    pub operator: String,
    pub closing: GaugeInput,
}

#[derive(Debug, Deserialize)]
pub struct VoidBody {
    pub operator: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RecalculateBody {
    pub operator: String,
    pub revisions: RevisedInputs,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub approver: String,
    /// Explicit result; the stored pending result is used when absent
    #[serde(default)]
    pub result: Option<RecalculationResult>,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub rejected_by: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct OperatorBody {
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct AssociationStatusBody {
    pub status: AssociationStatus,
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub monitored_tanks: usize,
}

#[derive(Debug, Serialize)]
pub struct MonitoringResponse {
    pub tank_id: String,
    pub monitoring: bool,
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        monitored_tanks: state.engine.monitored_tanks().len(),
    })
}

// ============================================================================
// Batches
// ============================================================================

/// GET /api/v1/batches
pub async fn list_batches(
    State(state): State<ApiState>,
    Query(filter): Query<BatchFilter>,
) -> Response {
    match state.engine.list_batches(&filter).await {
        Ok(page) => ApiResponse::ok(page),
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/batches
pub async fn create_batch(
    State(state): State<ApiState>,
    Json(request): Json<CreateBatchRequest>,
) -> Response {
    match state.engine.create_batch(request).await {
        Ok(batch) => ApiResponse::created(batch),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/batches/:id
pub async fn get_batch(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.engine.get_batch(&id).await {
        Ok(batch) => ApiResponse::ok(batch),
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/batches/:id/close
pub async fn close_batch(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<CloseBody>,
) -> Response {
    let request = CloseBatchRequest {
        batch_id: id,
        operator: body.operator,
        closing: body.closing,
    };
    match state.engine.close_batch(request).await {
        Ok(batch) => ApiResponse::ok(batch),
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/batches/:id/void
pub async fn void_batch(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<VoidBody>,
) -> Response {
    let request = VoidBatchRequest {
        batch_id: id,
        operator: body.operator,
        reason: body.reason,
    };
    match state.engine.void_batch(request).await {
        Ok(batch) => ApiResponse::ok(batch),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/batches/:id/audit
pub async fn batch_audit(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.engine.batch_audit(&id).await {
        Ok(events) => ApiResponse::ok(events),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/audit
pub async fn audit_log(State(state): State<ApiState>) -> Response {
    match state.engine.audit_log().await {
        Ok(events) => ApiResponse::ok(events),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Recalculation
// ============================================================================

/// POST /api/v1/batches/:id/recalculate
pub async fn recalculate_batch(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<RecalculateBody>,
) -> Response {
    let request = RecalculateBatchRequest {
        batch_id: id,
        operator: body.operator,
        revisions: body.revisions,
        reason: body.reason,
    };
    match state.engine.recalculate_batch(request).await {
        Ok(result) => ApiResponse::ok(result),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/batches/:id/recalculation
pub async fn pending_recalculation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.engine.pending_recalculation(&id).await {
        Ok(Some(result)) => ApiResponse::ok(result),
        Ok(None) => ApiErrorResponse::not_found(format!("No pending recalculation for {id}")),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/batches/:id/recalculation/report
///
/// Plain-text comparison of the pending result.
pub async fn recalculation_report(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.engine.pending_recalculation(&id).await {
        Ok(Some(result)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            state.engine.comparison_report(&result),
        )
            .into_response(),
        Ok(None) => ApiErrorResponse::not_found(format!("No pending recalculation for {id}")),
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/batches/:id/recalculation/approve
pub async fn approve_recalculation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> Response {
    match state
        .engine
        .approve_recalculation(&id, body.result, &body.approver)
        .await
    {
        Ok(batch) => ApiResponse::ok(batch),
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/batches/:id/recalculation/reject
pub async fn reject_recalculation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Response {
    match state
        .engine
        .reject_recalculation(&id, &body.reason, &body.rejected_by)
        .await
    {
        Ok(rejection) => ApiResponse::ok(rejection),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/batches/:id/recalculation/rejections
pub async fn recalculation_rejections(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.engine.recalculation_rejections(&id).await {
        Ok(rejections) => ApiResponse::ok(rejections),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Tanks & movement
// ============================================================================

/// GET /api/v1/tanks
pub async fn list_tanks(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.engine.tanks().await)
}

/// GET /api/v1/tanks/:id
pub async fn get_tank(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.engine.tank(&id).await {
        Ok(tank) => ApiResponse::ok(tank),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/monitoring
pub async fn monitored_tanks(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.engine.monitored_tanks())
}

/// POST /api/v1/tanks/:id/monitoring
///
/// The returned stream is dropped; clients follow updates via the SSE
/// endpoint or poll the latest classification.
pub async fn start_monitoring(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.engine.start_monitoring(&id).await {
        Ok(_stream) => ApiResponse::ok(MonitoringResponse {
            tank_id: id,
            monitoring: true,
        }),
        Err(e) => e.into_response(),
    }
}

/// DELETE /api/v1/tanks/:id/monitoring
pub async fn stop_monitoring(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    if state.engine.stop_monitoring(&id) {
        ApiResponse::ok(MonitoringResponse {
            tank_id: id,
            monitoring: false,
        })
    } else {
        ApiErrorResponse::not_found(format!("Tank {id} is not being monitored"))
    }
}

/// GET /api/v1/tanks/:id/movement
pub async fn latest_movement(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.engine.latest_movement(&id) {
        Some(update) => ApiResponse::ok(update),
        None => ApiErrorResponse::not_found(format!("No movement classification for {id}")),
    }
}

/// GET /api/v1/tanks/:id/movement/stream (SSE)
///
/// Starts monitoring if needed; the event stream ends when monitoring stops.
pub async fn movement_stream(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let updates = match state.engine.start_monitoring(&id).await {
        Ok(stream) => stream,
        Err(e) => return e.into_response(),
    };

    let events = updates.map(|update| {
        Ok::<_, Infallible>(
            Event::default()
                .event("movement")
                .json_data(&update)
                .unwrap_or_else(|_| Event::default().event("movement").data("{}")),
        )
    });

    Sse::new(events).keep_alive(KeepAlive::new()).into_response()
}

/// POST /api/v1/tanks/:id/suggestion/dismiss
pub async fn dismiss_suggestion(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    state.engine.dismiss_suggestion(&id);
    ApiResponse::ok(serde_json::json!({ "tank_id": id, "dismissed": true }))
}

/// POST /api/v1/tanks/:id/suggestion/accept
pub async fn accept_suggestion(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<OperatorBody>,
) -> Response {
    match state.engine.accept_suggestion(&id, &body.operator).await {
        Ok(batch) => ApiResponse::created(batch),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Lab reconciliation
// ============================================================================

/// POST /api/v1/lab-results
pub async fn associate_lab_result(
    State(state): State<ApiState>,
    Json(lab): Json<LabResult>,
) -> Response {
    match state.engine.associate_lab_result(lab).await {
        Ok(association) => ApiResponse::created(association),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/tanks/:id/lab-associations
pub async fn lab_associations(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.engine.lab_associations(&id).await {
        Ok(associations) => ApiResponse::ok(associations),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/lab-associations/:id
pub async fn get_association(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.engine.get_association(&id).await {
        Ok(association) => ApiResponse::ok(association),
        Err(e) => e.into_response(),
    }
}

/// PATCH /api/v1/lab-associations/:id
pub async fn update_association_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<AssociationStatusBody>,
) -> Response {
    match state
        .engine
        .update_association_status(&id, body.status, &body.actor)
        .await
    {
        Ok(association) => ApiResponse::ok(association),
        Err(e) => e.into_response(),
    }
}
