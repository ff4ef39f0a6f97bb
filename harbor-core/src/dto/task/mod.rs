//! Task DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::Job;
use crate::domain::task::Task;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertTaskRequest {
    pub task: Task,
}

/// A task with its jobs resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskResponse {
    pub task: Task,
    #[serde(default)]
    pub start_job: Option<Job>,
    #[serde(default)]
    pub task_job: Option<Job>,
    #[serde(default)]
    pub watch_job: Option<Job>,
    #[serde(default)]
    pub stop_job: Option<Job>,
}
