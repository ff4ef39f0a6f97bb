//! API Module
//!
//! HTTP and WebSocket layer of the control plane.
//! Each submodule handles endpoints for a specific domain.

pub mod auth;
pub mod error;
pub mod exec;
pub mod health;
pub mod job;
pub mod project;
pub mod runner;
pub mod task;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::service::Service;

/// Create the main API router with all endpoints
pub fn create_router(service: Arc<Service>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/job", post(job::queue_job))
        .route("/job/validate", post(job::validate_job))
        .route("/job/list", get(job::list_jobs))
        .route("/job/{id}", get(job::get_job))
        .route("/job/{id}/cancel", post(job::cancel_job))
        .route("/job/{id}/stream", get(job::job_stream))
        // Runner endpoints
        .route("/runner/token", post(runner::runner_token))
        .route("/runner/config", get(runner::runner_config))
        .route("/runner/job-stream", get(runner::runner_job_stream))
        .route("/runner/list", get(runner::list_runners))
        .route(
            "/runner/{id}",
            get(runner::get_runner).delete(runner::forget_runner),
        )
        .route("/runner/{id}/adopt", post(runner::adopt_runner))
        // Task endpoints
        .route("/task", put(task::upsert_task))
        .route("/task/list", get(task::list_tasks))
        .route("/task/{id}", get(task::get_task))
        .route("/task/{id}/cancel", post(task::cancel_task))
        .route("/task/job/{job_id}", get(task::get_task_by_job))
        // Project and configuration endpoints
        .route("/project", put(project::put_project))
        .route("/project/{name}", get(project::get_project))
        .route(
            "/ondemand-runner-config",
            put(project::put_ondemand_runner_config),
        )
        .route("/config", put(project::set_config))
        // Exec endpoints
        .route("/exec", get(exec::start_exec))
        .route("/exec/{id}/entrypoint", get(exec::connect_exec))
        // Add state and middleware
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}
