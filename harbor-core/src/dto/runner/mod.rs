//! Runner DTOs
//!
//! Includes the frames of the runner config and job assignment streams.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::config::ConfigVar;
use crate::domain::job::{DataSourceRef, Job, JobConfig, JobResult};
use crate::domain::log::LogEntry;
use crate::domain::runner::RunnerKind;
use crate::domain::status::ErrorStatus;

/// How a runner describes itself on first contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub kind: RunnerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerTokenRequest {
    pub runner: RunnerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerTokenResponse {
    /// Absent when the presented token is already valid for this runner
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptRunnerRequest {
    pub adopt: bool,
}

/// Runner → server on the config stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerConfigRequest {
    Open { runner: RunnerInfo },
}

/// Server → runner on the config stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerConfigResponse {
    Config { config_vars: Vec<ConfigVar> },
}

/// Runner → server on the job stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerJobStreamRequest {
    Request {
        runner_id: String,
        /// Resume a job this runner already acked before disconnecting
        #[serde(default)]
        reattach_job_id: Option<Uuid>,
    },
    Ack,
    Error {
        error: ErrorStatus,
    },
    Heartbeat,
    Download {
        data_source_ref: DataSourceRef,
    },
    ConfigLoad {
        config: JobConfig,
    },
    VariableValuesSet {
        final_values: HashMap<String, String>,
    },
    Terminal {
        events: Vec<LogEntry>,
    },
    Complete {
        #[serde(default)]
        result: Option<JobResult>,
    },
}

impl RunnerJobStreamRequest {
    /// Name of the frame, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerJobStreamRequest::Request { .. } => "request",
            RunnerJobStreamRequest::Ack => "ack",
            RunnerJobStreamRequest::Error { .. } => "error",
            RunnerJobStreamRequest::Heartbeat => "heartbeat",
            RunnerJobStreamRequest::Download { .. } => "download",
            RunnerJobStreamRequest::ConfigLoad { .. } => "config_load",
            RunnerJobStreamRequest::VariableValuesSet { .. } => "variable_values_set",
            RunnerJobStreamRequest::Terminal { .. } => "terminal",
            RunnerJobStreamRequest::Complete { .. } => "complete",
        }
    }
}

/// Server → runner on the job stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerJobStreamResponse {
    Assignment { job: Box<Job> },
    Cancel { force: bool },
}
