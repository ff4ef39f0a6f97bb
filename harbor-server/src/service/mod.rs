//! Service Module
//!
//! Business logic layer of the control plane. [`Service`] owns the
//! collaborators (state store, token authority, log streams) and every
//! background loop it spawns; API handlers only translate transport frames
//! into calls on it.

pub mod error;
mod exec;
mod job;
mod job_stream;
mod ondemand;
mod poll;
mod project;
mod reaper;
mod runner;
mod runner_job;
mod task;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::auth::{MemoryTokenAuthority, TokenAuthority, TokenKind};
use crate::config::ServerConfig;
use crate::logstream::{LogStreamProvider, MemoryLogStreams};
use crate::state::{MemoryStore, StateStore};

pub use error::{Result, ServiceError};
pub use exec::{ClientExec, EntrypointExec, ExecEvent, ExecRegistry};

/// Service context shared by every request handler
pub struct Service {
    store: Arc<dyn StateStore>,
    auth: Arc<dyn TokenAuthority>,
    logs: Arc<dyn LogStreamProvider>,
    execs: ExecRegistry,
    config: ServerConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Service {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn StateStore>,
        auth: Arc<dyn TokenAuthority>,
        logs: Arc<dyn LogStreamProvider>,
    ) -> Self {
        Self {
            store,
            auth,
            logs,
            execs: ExecRegistry::new(),
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Service backed by the in-process store, token authority and log
    /// streams. The bootstrap token, if configured, becomes a login token.
    pub fn in_memory(config: ServerConfig) -> Self {
        let auth = MemoryTokenAuthority::new();
        if let Some(token) = &config.bootstrap_token {
            auth.register(
                token.clone(),
                TokenKind::Login {
                    user: "bootstrap".to_string(),
                },
            );
        }

        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(auth),
            Arc::new(MemoryLogStreams::new()),
        )
    }

    /// Spawns the poll queuer loops and the job reaper
    pub fn start(self: &Arc<Self>) {
        if self.config.poll_enabled {
            let service = self.clone();
            self.tracker.spawn(
                async move { service.poll_loop(poll::ProjectPoll).await }
                    .instrument(tracing::info_span!("poll_loop", handler = "project")),
            );

            let service = self.clone();
            self.tracker.spawn(
                async move { service.poll_loop(poll::ApplicationStatusPoll).await }
                    .instrument(tracing::info_span!("poll_loop", handler = "status_report")),
            );
        }

        let service = self.clone();
        self.tracker.spawn(
            async move { service.reap_loop().await }.instrument(tracing::info_span!("job_reaper")),
        );

        tracing::info!(poll_enabled = self.config.poll_enabled, "Service started");
    }

    /// Stops every background loop and waits for them to exit. Open streams
    /// observe the same token and unwind.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Service closed");
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn authority(&self) -> &dyn TokenAuthority {
        self.auth.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use harbor_core::domain::job::DataSource;
    use harbor_core::domain::project::Project;

    /// In-memory service with a project that has a local data source
    pub(crate) async fn service_with_project(name: &str) -> Arc<Service> {
        let service = Arc::new(Service::in_memory(ServerConfig::default()));
        let mut project = Project::new(name);
        project.data_source = Some(DataSource::Local);
        service.put_project(project).await.unwrap();
        service
    }
}
