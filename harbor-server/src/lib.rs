//! Harbor Server
//!
//! The deployment-orchestration control plane: queues jobs, hands them to
//! runners over streaming connections and orchestrates on-demand runner
//! lifecycles as job graphs.
//!
//! Layers, outermost first:
//! - `api`: axum HTTP and WebSocket endpoints
//! - `service`: job, runner, task, poll and on-demand runner logic
//! - `state`: the transactional, watchable state store

pub mod api;
pub mod auth;
pub mod config;
pub mod logstream;
pub mod service;
pub mod shutdown;
pub mod state;
