//! Task domain types
//!
//! A task groups the jobs synthesized for one on-demand runner execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Launches the on-demand runner
    pub start_job: Uuid,
    /// The real work, or the watch job when the operation was skipped
    pub task_job: Uuid,
    /// Observes the launched runner until it exits
    pub watch_job: Uuid,
    /// Tears the runner down, always runs
    pub stop_job: Uuid,
    /// ID of the on-demand runner launched for this task
    pub runner_id: String,
    pub job_state: TaskState,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// All jobs that belong to the task, without duplicates
    pub fn job_ids(&self) -> Vec<Uuid> {
        let mut ids = vec![self.start_job, self.watch_job, self.task_job, self.stop_job];
        ids.sort();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Stopped,
}

/// Lookup key for a task: its own ID or the ID of any of its jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "id", rename_all = "snake_case")]
pub enum TaskRef {
    Id(Uuid),
    JobId(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_deduplicates_skipped_task_job() {
        let watch = Uuid::new_v4();
        let task = Task {
            id: Uuid::new_v4(),
            start_job: Uuid::new_v4(),
            task_job: watch,
            watch_job: watch,
            stop_job: Uuid::new_v4(),
            runner_id: "odr-1".to_string(),
            job_state: TaskState::Pending,
            created_at: Utc::now(),
        };
        assert_eq!(task.job_ids().len(), 3);
    }
}
