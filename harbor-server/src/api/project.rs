//! Project and Configuration API Handlers
//!
//! Projects, on-demand runner profiles and runner config variables.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use harbor_core::domain::config::ConfigVar;
use harbor_core::domain::ondemand::OnDemandRunnerConfig;
use harbor_core::domain::project::Project;

use crate::api::auth::LoginToken;
use crate::api::error::ApiResult;
use crate::service::Service;

/// PUT /project
pub async fn put_project(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Json(project): Json<Project>,
) -> ApiResult<Json<Project>> {
    tracing::info!("Saving project: {}", project.name);
    Ok(Json(service.put_project(project).await?))
}

/// GET /project/{name}
pub async fn get_project(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(name): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(service.get_project(&name).await?))
}

/// PUT /ondemand-runner-config
pub async fn put_ondemand_runner_config(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Json(config): Json<OnDemandRunnerConfig>,
) -> ApiResult<Json<OnDemandRunnerConfig>> {
    Ok(Json(service.put_ondemand_runner_config(config).await?))
}

/// PUT /config
/// Upserts runner config variables; an empty value deletes the variable
pub async fn set_config(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Json(vars): Json<Vec<ConfigVar>>,
) -> ApiResult<StatusCode> {
    service.set_config(vars).await?;
    Ok(StatusCode::NO_CONTENT)
}
