//! Job DTOs

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{
    ApplicationRef, DataSource, DataSourceRef, Job, JobResult, JobState, OnDemandRunnerTask,
};
use crate::domain::log::LogEntry;
use crate::domain::operation::Operation;
use crate::domain::runner::TargetRunner;
use crate::domain::status::ErrorStatus;

/// Request to queue a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJobRequest {
    pub job: JobTemplate,
    /// Time the job may stay unassigned before it errors, e.g. "10m"
    #[serde(default, with = "humantime_serde")]
    pub expires_in: Option<Duration>,
}

impl QueueJobRequest {
    pub fn new(job: JobTemplate) -> Self {
        Self {
            job,
            expires_in: None,
        }
    }
}

/// The caller-controlled fields of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<Uuid>,
    pub application: ApplicationRef,
    /// Defaults to "default"
    #[serde(default)]
    pub workspace: Option<String>,
    pub operation: Operation,
    #[serde(default)]
    pub target_runner: TargetRunner,
    /// Run on an ephemeral runner
    #[serde(default)]
    pub ondemand_runner: Option<OnDemandRunnerRequest>,
    #[serde(default)]
    pub ondemand_runner_task: Option<OnDemandRunnerTask>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    #[serde(default)]
    pub depends_on_allow_failure: Vec<Uuid>,
    #[serde(default)]
    pub singleton_id: Option<String>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl JobTemplate {
    pub fn new(application: ApplicationRef, operation: Operation) -> Self {
        Self {
            id: None,
            application,
            workspace: None,
            operation,
            target_runner: TargetRunner::Any,
            ondemand_runner: None,
            ondemand_runner_task: None,
            labels: HashMap::new(),
            depends_on: Vec::new(),
            depends_on_allow_failure: Vec::new(),
            singleton_id: None,
            data_source: None,
            variables: HashMap::new(),
        }
    }
}

/// Asks for an on-demand runner. Without a profile the project's default
/// profile is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnDemandRunnerRequest {
    /// Profile ID or name
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJobResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateJobResponse {
    pub valid: bool,
    #[serde(default)]
    pub validation_error: Option<ErrorStatus>,
    /// Whether at least one connected runner could take the job
    pub assignable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub application: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub state: Option<JobState>,
    #[serde(default)]
    pub runner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelJobRequest {
    #[serde(default)]
    pub force: bool,
}

/// Frames sent to a client watching a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStreamEvent {
    Open,
    State {
        previous: Option<JobState>,
        current: JobState,
        job: Box<Job>,
        canceling: bool,
    },
    Download {
        data_source_ref: DataSourceRef,
    },
    Job {
        job: Box<Job>,
    },
    Terminal {
        events: Vec<LogEntry>,
        /// True when replayed from a completed job
        buffered: bool,
    },
    Complete {
        #[serde(default)]
        error: Option<ErrorStatus>,
        #[serde(default)]
        result: Option<JobResult>,
    },
}
