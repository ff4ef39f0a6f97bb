//! Exec API Handlers
//!
//! Both sides of an instance exec session attach over WebSockets carrying
//! JSON-encoded [`ExecEvent`] frames.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;

use crate::api::auth::LoginToken;
use crate::api::error::ApiResult;
use crate::api::ws;
use crate::service::{ExecEvent, Service};

#[derive(Debug, Deserialize)]
pub struct StartExecQuery {
    pub instance_id: String,
    /// Whitespace-separated command line
    #[serde(default)]
    pub command: Option<String>,
}

/// GET /exec (WebSocket)
///
/// Opens a session; the first frame is `opened` with the session ID the
/// entrypoint attaches with.
pub async fn start_exec(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Query(query): Query<StartExecQuery>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    let args = query
        .command
        .as_deref()
        .map(|c| c.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let exec = service.start_exec(&query.instance_id, args)?;

    Ok(upgrade.on_upgrade(move |socket| {
        ws::bridge::<ExecEvent, ExecEvent, _, _>(socket, move |rx, tx| exec.relay(rx, tx))
    }))
}

/// GET /exec/{id}/entrypoint (WebSocket)
pub async fn connect_exec(
    State(service): State<Arc<Service>>,
    LoginToken(_token): LoginToken,
    Path(exec_id): Path<u64>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    let exec = service.connect_exec(exec_id)?;

    Ok(upgrade.on_upgrade(move |socket| {
        ws::bridge::<ExecEvent, ExecEvent, _, _>(socket, move |rx, tx| exec.relay(rx, tx))
    }))
}
