//! Task API Handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use harbor_core::domain::task::{Task, TaskRef};
use harbor_core::dto::task::{GetTaskResponse, UpsertTaskRequest};
use uuid::Uuid;

use crate::api::auth::LoginToken;
use crate::api::error::ApiResult;
use crate::service::Service;

/// PUT /task
pub async fn upsert_task(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Json(req): Json<UpsertTaskRequest>,
) -> ApiResult<Json<Task>> {
    Ok(Json(service.upsert_task(req.task).await?))
}

/// GET /task/{id}
pub async fn get_task(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<GetTaskResponse>> {
    Ok(Json(service.get_task(TaskRef::Id(id)).await?))
}

/// GET /task/job/{job_id}
/// Looks a task up by any of its jobs
pub async fn get_task_by_job(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<GetTaskResponse>> {
    Ok(Json(service.get_task(TaskRef::JobId(job_id)).await?))
}

/// GET /task/list
pub async fn list_tasks(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(service.list_tasks().await?))
}

/// POST /task/{id}/cancel
pub async fn cancel_task(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    service.cancel_task(TaskRef::Id(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
