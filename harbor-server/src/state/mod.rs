//! State collaborator
//!
//! The durable, transactional and watchable store the services depend on.
//! [`StateStore`] is the boundary; [`MemoryStore`] is the bundled
//! implementation. Every read accepts an optional [`WatchSet`] and every
//! write wakes the watch sets registered on the tables it touched.

mod memory;
mod watch;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harbor_core::domain::config::ConfigVar;
use harbor_core::domain::job::{ApplicationRef, DataSourceRef, Job, JobResult, JobState};
use harbor_core::domain::ondemand::OnDemandRunnerConfig;
use harbor_core::domain::project::{Application, Project};
use harbor_core::domain::runner::Runner;
use harbor_core::domain::status::ErrorStatus;
use harbor_core::domain::task::{Task, TaskRef, TaskState};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use watch::{Table, Versions, WatchSet};

/// State store error type
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl StateError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StateError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Mutation applied to a job record inside the store's transaction
pub type JobMutator = Box<dyn FnOnce(&mut Job) + Send>;

/// Filter for [`StateStore::job_list`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub project: Option<String>,
    pub application: Option<String>,
    pub workspace: Option<String>,
    pub state: Option<JobState>,
    pub runner: Option<String>,
}

impl JobListFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.project
            .as_ref()
            .is_none_or(|p| *p == job.application.project)
            && self
                .application
                .as_ref()
                .is_none_or(|a| *a == job.application.application)
            && self.workspace.as_ref().is_none_or(|w| *w == job.workspace)
            && self.state.is_none_or(|s| s == job.state)
            && self
                .runner
                .as_ref()
                .is_none_or(|r| job.assigned_runner.as_ref() == Some(r))
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    // =========================================================================
    // Jobs
    // =========================================================================

    /// Inserts all jobs or none. Returns the effective ID for each input job,
    /// which differs from the input when singleton de-duplication folded it
    /// into an existing job.
    async fn job_create(&self, jobs: Vec<Job>) -> Result<Vec<Uuid>>;

    async fn job_by_id(&self, id: Uuid, ws: Option<&mut WatchSet>) -> Result<Option<Job>>;

    async fn job_list(&self, filter: &JobListFilter) -> Result<Vec<Job>>;

    /// Blocks until a queued job can be assigned to `runner`, then moves it
    /// to `Waiting`. Returns [`StateError::Cancelled`] once `cancel` fires.
    async fn job_assign_for_runner(
        &self,
        runner: &Runner,
        cancel: &CancellationToken,
    ) -> Result<Job>;

    /// Ack moves a waiting job to `Running`; nack returns it to `Queued`.
    async fn job_ack(&self, id: Uuid, ack: bool) -> Result<Job>;

    async fn job_complete(
        &self,
        id: Uuid,
        result: Option<JobResult>,
        error: Option<ErrorStatus>,
    ) -> Result<Job>;

    async fn job_cancel(&self, id: Uuid, force: bool) -> Result<Job>;

    async fn job_heartbeat(&self, id: Uuid) -> Result<()>;

    async fn job_update_expiry(&self, id: Uuid, expire_time: Option<DateTime<Utc>>) -> Result<()>;

    async fn job_update_ref(&self, id: Uuid, data_source_ref: DataSourceRef) -> Result<()>;

    async fn job_update(&self, id: Uuid, mutate: JobMutator) -> Result<Job>;

    /// Errors queued jobs past their expiry and running jobs whose last
    /// heartbeat is older than `heartbeat_timeout`. Returns affected IDs.
    async fn job_reap(&self, now: DateTime<Utc>, heartbeat_timeout: Duration) -> Result<Vec<Uuid>>;

    // =========================================================================
    // Runners
    // =========================================================================

    /// Creates the runner if unknown, otherwise refreshes labels, kind and
    /// last-seen time. Changed labels reset a non-rejected runner to
    /// `Pending` so it has to be adopted again.
    async fn runner_create(&self, runner: Runner) -> Result<Runner>;

    async fn runner_by_id(&self, id: &str, ws: Option<&mut WatchSet>) -> Result<Option<Runner>>;

    /// `preadopt` only promotes undecided runners; an operator adoption
    /// (`preadopt == false`) always wins.
    async fn runner_adopt(&self, id: &str, preadopt: bool) -> Result<()>;

    async fn runner_reject(&self, id: &str) -> Result<()>;

    async fn runner_online(&self, id: &str) -> Result<()>;

    async fn runner_offline(&self, id: &str) -> Result<()>;

    async fn runner_delete(&self, id: &str) -> Result<()>;

    async fn runner_list(&self) -> Result<Vec<Runner>>;

    // =========================================================================
    // Tasks
    // =========================================================================

    async fn task_put(&self, task: Task) -> Result<()>;

    async fn task_get(&self, task_ref: &TaskRef) -> Result<Option<Task>>;

    async fn task_list(&self) -> Result<Vec<Task>>;

    /// Removes the task record; its jobs are left alone
    async fn task_delete(&self, id: Uuid) -> Result<()>;

    /// Cancels every job of the task
    async fn task_cancel(&self, task_ref: &TaskRef) -> Result<()>;

    async fn task_update_state(&self, task_ref: &TaskRef, state: TaskState) -> Result<()>;

    // =========================================================================
    // Projects and polling
    // =========================================================================

    async fn project_put(&self, project: Project) -> Result<()>;

    async fn project_get(&self, name: &str) -> Result<Option<Project>>;

    /// Project with the earliest scheduled data source poll
    async fn project_poll_peek(
        &self,
        ws: Option<&mut WatchSet>,
    ) -> Result<Option<(Project, DateTime<Utc>)>>;

    /// Reschedules the project's next poll one interval after `now`
    async fn project_poll_complete(&self, project: &str, now: DateTime<Utc>) -> Result<()>;

    /// Application with the earliest scheduled status report
    async fn application_poll_peek(
        &self,
        ws: Option<&mut WatchSet>,
    ) -> Result<Option<(Project, Application, DateTime<Utc>)>>;

    async fn application_poll_complete(
        &self,
        application: &ApplicationRef,
        now: DateTime<Utc>,
    ) -> Result<()>;

    // =========================================================================
    // On-demand runner profiles and runner config
    // =========================================================================

    /// Stores the profile, assigning an ID when it has none
    async fn ondemand_runner_config_put(
        &self,
        config: OnDemandRunnerConfig,
    ) -> Result<OnDemandRunnerConfig>;

    /// Looks a profile up by ID or by name
    async fn ondemand_runner_config_get(
        &self,
        id_or_name: &str,
    ) -> Result<Option<OnDemandRunnerConfig>>;

    async fn ondemand_runner_config_default(&self) -> Result<Vec<OnDemandRunnerConfig>>;

    /// Upserts variables by name and target; an empty value deletes
    async fn config_set(&self, vars: Vec<ConfigVar>) -> Result<()>;

    async fn config_for_runner(
        &self,
        runner: &Runner,
        ws: Option<&mut WatchSet>,
    ) -> Result<Vec<ConfigVar>>;
}
