//! Job API Handlers
//!
//! Queueing, inspection, cancellation and live streaming of jobs.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
};
use harbor_core::domain::job::Job;
use harbor_core::dto::job::{
    CancelJobRequest, JobStreamEvent, ListJobsQuery, QueueJobRequest, QueueJobResponse,
    ValidateJobResponse,
};
use serde_json::Value;
use uuid::Uuid;

use crate::api::auth::{LoginToken, QueueToken};
use crate::api::error::ApiResult;
use crate::api::ws;
use crate::service::Service;

/// POST /job
pub async fn queue_job(
    State(service): State<Arc<Service>>,
    QueueToken(_token): QueueToken,
    Json(req): Json<QueueJobRequest>,
) -> ApiResult<Json<QueueJobResponse>> {
    tracing::debug!(
        project = %req.job.application.project,
        operation = req.job.operation.kind(),
        "Queueing job"
    );
    Ok(Json(service.queue_job(req).await?))
}

/// POST /job/validate
pub async fn validate_job(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Json(req): Json<QueueJobRequest>,
) -> ApiResult<Json<ValidateJobResponse>> {
    Ok(Json(service.validate_job(req).await?))
}

/// GET /job/{id}
pub async fn get_job(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);
    Ok(Json(service.get_job(id).await?))
}

/// GET /job/list
///
/// Query parameters (all optional): `project`, `application`, `workspace`,
/// `state`, `runner`
pub async fn list_jobs(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(service.list_jobs(query).await?))
}

/// POST /job/{id}/cancel
pub async fn cancel_job(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelJobRequest>,
) -> ApiResult<Json<Job>> {
    Ok(Json(service.cancel_job(id, req.force).await?))
}

/// GET /job/{id}/stream (WebSocket)
///
/// Server-push only; frames sent by the client are ignored.
pub async fn job_stream(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(id): Path<Uuid>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| {
        ws::bridge::<Value, JobStreamEvent, _, _>(socket, move |rx, tx| async move {
            tokio::select! {
                result = service.get_job_stream(id, tx) => result,
                _ = ws::closed(rx) => Ok(()),
            }
        })
    })
}
