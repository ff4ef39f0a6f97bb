//! Job domain types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::operation::Operation;
use super::runner::TargetRunner;
use super::status::ErrorStatus;

/// A single schedulable unit of work
///
/// State only moves forward (`Queued` → `Waiting` → `Running` → terminal).
/// Cancellation is recorded in `cancel_time` so a runner can still finish
/// gracefully unless the job was force-cancelled into `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub application: ApplicationRef,
    pub workspace: String,
    pub operation: Operation,
    pub target_runner: TargetRunner,

    /// On-demand runner profile this job was launched with, if any
    #[serde(default)]
    pub ondemand_runner: Option<Uuid>,
    #[serde(default)]
    pub ondemand_runner_task: Option<OnDemandRunnerTask>,

    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    /// Subset of dependencies whose failure does not block this job
    #[serde(default)]
    pub depends_on_allow_failure: Vec<Uuid>,
    /// At most one non-terminal job may carry a given singleton ID
    #[serde(default)]
    pub singleton_id: Option<String>,

    #[serde(default)]
    pub data_source: Option<DataSource>,
    #[serde(default)]
    pub data_source_ref: Option<DataSourceRef>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub config: Option<JobConfig>,
    #[serde(default)]
    pub variable_final_values: HashMap<String, String>,

    /// Task this job belongs to when it is part of an on-demand runner graph
    #[serde(default)]
    pub task: Option<Uuid>,

    pub state: JobState,
    #[serde(default)]
    pub assigned_runner: Option<String>,

    pub queue_time: DateTime<Utc>,
    #[serde(default)]
    pub ack_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub heartbeat_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_time: Option<DateTime<Utc>>,
    /// Jobs not accepted by a runner by this time move to `Error`
    #[serde(default)]
    pub expire_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub result: Option<JobResult>,
    #[serde(default)]
    pub error: Option<ErrorStatus>,
}

impl Job {
    /// A queued job with no optional fields set
    pub fn new(application: ApplicationRef, workspace: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: Uuid::new_v4(),
            application,
            workspace: workspace.into(),
            operation,
            target_runner: TargetRunner::Any,
            ondemand_runner: None,
            ondemand_runner_task: None,
            labels: HashMap::new(),
            depends_on: Vec::new(),
            depends_on_allow_failure: Vec::new(),
            singleton_id: None,
            data_source: None,
            data_source_ref: None,
            variables: HashMap::new(),
            config: None,
            variable_final_values: HashMap::new(),
            task: None,
            state: JobState::Queued,
            assigned_runner: None,
            queue_time: Utc::now(),
            ack_time: None,
            heartbeat_time: None,
            complete_time: None,
            cancel_time: None,
            expire_time: None,
            result: None,
            error: None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel_time.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Job execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for a runner
    Queued,
    /// Assigned to a runner, waiting for its ack
    Waiting,
    /// Acked and executing
    Running,
    Success,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Error)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "Queued"),
            JobState::Waiting => write!(f, "Waiting"),
            JobState::Running => write!(f, "Running"),
            JobState::Success => write!(f, "Success"),
            JobState::Error => write!(f, "Error"),
        }
    }
}

/// The project/application a job operates on. Project-scoped jobs leave
/// `application` empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationRef {
    pub project: String,
    #[serde(default)]
    pub application: String,
}

impl ApplicationRef {
    pub fn new(project: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            application: application.into(),
        }
    }

    pub fn project(project: impl Into<String>) -> Self {
        Self::new(project, "")
    }
}

/// Where a runner fetches the job's configuration from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    Local,
    Git {
        url: String,
        #[serde(default)]
        git_ref: String,
        #[serde(default)]
        path: String,
    },
}

/// The exact revision a runner resolved its data source to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSourceRef {
    Local,
    Git {
        commit: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

/// Configuration the runner reported after loading the project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub source: ConfigSource,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    File,
    Server,
    Unknown,
}

/// Per-job overrides for the on-demand runner that executes it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnDemandRunnerTask {
    /// Launch the runner but do not run the job itself (noop only)
    #[serde(default)]
    pub skip_operation: bool,
    /// Override profile-level environment variables
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
}

/// Result of a successful job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub output: Option<serde_json::Value>,
}
