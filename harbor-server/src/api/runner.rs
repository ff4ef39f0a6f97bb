//! Runner API Handlers
//!
//! Registration, adoption and the two runner streams.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
};
use harbor_core::domain::runner::Runner;
use harbor_core::dto::runner::{
    AdoptRunnerRequest, RunnerConfigRequest, RunnerConfigResponse, RunnerJobStreamRequest,
    RunnerJobStreamResponse, RunnerTokenRequest, RunnerTokenResponse,
};

use crate::api::auth::{LoginToken, MaybeToken};
use crate::api::error::ApiResult;
use crate::api::ws;
use crate::service::Service;

/// POST /runner/token
///
/// Blocks until an operator decides on the runner.
pub async fn runner_token(
    State(service): State<Arc<Service>>,
    MaybeToken(token): MaybeToken,
    Json(req): Json<RunnerTokenRequest>,
) -> ApiResult<Json<RunnerTokenResponse>> {
    Ok(Json(service.runner_token(token.as_ref(), req).await?))
}

/// GET /runner/config (WebSocket)
pub async fn runner_config(
    State(service): State<Arc<Service>>,
    MaybeToken(token): MaybeToken,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| {
        ws::bridge::<RunnerConfigRequest, RunnerConfigResponse, _, _>(socket, move |rx, tx| {
            async move { service.runner_config(token, rx, tx).await }
        })
    })
}

/// GET /runner/job-stream (WebSocket)
pub async fn runner_job_stream(
    State(service): State<Arc<Service>>,
    MaybeToken(token): MaybeToken,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| {
        ws::bridge::<RunnerJobStreamRequest, RunnerJobStreamResponse, _, _>(
            socket,
            move |rx, tx| async move { service.runner_job_stream(token, rx, tx).await },
        )
    })
}

/// POST /runner/{id}/adopt
pub async fn adopt_runner(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(id): Path<String>,
    Json(req): Json<AdoptRunnerRequest>,
) -> ApiResult<StatusCode> {
    service.adopt_runner(&id, req.adopt).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /runner/{id}
pub async fn forget_runner(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    service.forget_runner(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /runner/{id}
pub async fn get_runner(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(id): Path<String>,
) -> ApiResult<Json<Runner>> {
    Ok(Json(service.get_runner(&id).await?))
}

/// GET /runner/list
pub async fn list_runners(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
) -> ApiResult<Json<Vec<Runner>>> {
    Ok(Json(service.list_runners().await?))
}
