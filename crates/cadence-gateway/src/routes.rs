use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use cadence_core::error::CadenceError;
use cadence_core::types::{Contact, ExecutionId};
use cadence_engine::{CadenceGraph, CancelOutcome, RunRequest};

use crate::middleware::Authenticated;
use crate::state::AppState;

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn api_error(e: CadenceError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        CadenceError::Graph(_) | CadenceError::MissingStart => StatusCode::UNPROCESSABLE_ENTITY,
        CadenceError::ExecutionNotFound(_) | CadenceError::NoCredentials(_) => {
            StatusCode::NOT_FOUND
        }
        CadenceError::Auth(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "Request failed");
    }
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

// GET /api/health (no auth)
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
pub struct RunBody {
    pub owner_id: String,
    pub cadence_id: String,
    pub graph: CadenceGraph,
    #[serde(default)]
    pub contact: Option<Contact>,
}

// POST /api/executions
pub async fn run_execution(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunBody>,
) -> ApiResult {
    let request = RunRequest {
        owner_id: body.owner_id,
        cadence_id: body.cadence_id,
        graph: body.graph,
        contact: body.contact,
    };
    let outcome = state
        .engine
        .runner
        .run_execution(request)
        .await
        .map_err(api_error)?;

    let skipped: Vec<serde_json::Value> = outcome
        .skipped
        .iter()
        .map(|s| serde_json::json!({ "node_id": s.node_id, "reason": s.reason }))
        .collect();
    Ok(Json(serde_json::json!({
        "execution_id": outcome.execution_id,
        "sent": outcome.sent,
        "failed": outcome.failed,
        "queued": outcome.queued,
        "skipped": skipped,
    })))
}

// GET /api/executions/{id}
pub async fn execution_status(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let (execution, steps) = state
        .engine
        .store
        .execution_status(&ExecutionId::from_string(&id))
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "execution": execution,
        "steps": steps,
    })))
}

// POST /api/users/{owner}/poll
pub async fn poll_user(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> ApiResult {
    let report = state.engine.poller.poll_user(&owner).await;
    info!(owner = %owner, found = report.found, errors = report.errors.len(), "Manual poll");
    Ok(Json(serde_json::json!({
        "owner_id": report.owner_id,
        "found": report.found,
        "errors": report.errors,
    })))
}

#[derive(Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub cadence_id: Option<String>,
}

// POST /api/cancel by execution id, or by owner, contact and cadence
pub async fn cancel(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelBody>,
) -> ApiResult {
    let controller = &state.engine.controller;
    let cancelled = match body {
        CancelBody {
            execution_id: Some(id),
            ..
        } => match controller
            .cancel(&ExecutionId::from_string(&id))
            .map_err(api_error)?
        {
            CancelOutcome::Cancelled { .. } => 1,
            CancelOutcome::AlreadyCancelled => 0,
        },
        CancelBody {
            owner_id: Some(owner),
            contact_id: Some(contact),
            cadence_id: Some(cadence),
            ..
        } => controller
            .cancel_execution(&owner, &contact, &cadence)
            .map_err(api_error)?,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "expected execution_id or owner_id, contact_id and cadence_id"
                })),
            ))
        }
    };
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}
