//! Task Service
//!
//! Tasks group the jobs of one on-demand runner execution.

use harbor_core::domain::job::{Job, JobState};
use harbor_core::domain::operation::Operation;
use harbor_core::domain::task::{Task, TaskRef, TaskState};
use harbor_core::dto::task::GetTaskResponse;
use uuid::Uuid;

use super::{Result, Service, ServiceError};

impl Service {
    pub async fn upsert_task(&self, task: Task) -> Result<Task> {
        self.store.task_put(task.clone()).await?;
        tracing::debug!(task_id = %task.id, "Task stored");
        Ok(task)
    }

    /// Task with its jobs resolved. Jobs that were never queued (a skipped
    /// operation) come back empty.
    pub async fn get_task(&self, task_ref: TaskRef) -> Result<GetTaskResponse> {
        let task = self
            .store
            .task_get(&task_ref)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("task {task_ref:?} not found")))?;

        Ok(GetTaskResponse {
            start_job: self.store.job_by_id(task.start_job, None).await?,
            task_job: self.store.job_by_id(task.task_job, None).await?,
            watch_job: self.store.job_by_id(task.watch_job, None).await?,
            stop_job: self.store.job_by_id(task.stop_job, None).await?,
            task,
        })
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.store.task_list().await?)
    }

    /// Cancels every job of the task and records the progress the
    /// cancellation caused
    pub async fn cancel_task(&self, task_ref: TaskRef) -> Result<()> {
        let task = self
            .store
            .task_get(&task_ref)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("task {task_ref:?} not found")))?;

        self.store.task_cancel(&TaskRef::Id(task.id)).await?;
        tracing::info!(task_id = %task.id, "Task cancel requested");

        for job_id in task.job_ids() {
            self.record_task_progress_by_id(job_id).await;
        }
        Ok(())
    }

    /// Moves the owning task forward when one of its lifecycle jobs
    /// finished. Failures are logged, never returned.
    pub(crate) async fn record_task_progress(&self, job: &Job) {
        let Some(task_id) = job.task else {
            return;
        };

        let state = match (&job.operation, job.state) {
            (Operation::StartTask { .. }, JobState::Success) => TaskState::Running,
            (Operation::StopTask { .. }, state) if state.is_terminal() => TaskState::Stopped,
            _ => return,
        };

        match self
            .store
            .task_update_state(&TaskRef::Id(task_id), state)
            .await
        {
            Ok(()) => tracing::info!(%task_id, ?state, "Task state updated"),
            Err(err) => tracing::warn!(%task_id, error = %err, "Failed to update task state"),
        }
    }

    /// Looks the job up again and records task progress for it
    pub(crate) async fn record_task_progress_by_id(&self, job_id: Uuid) {
        match self.store.job_by_id(job_id, None).await {
            Ok(Some(job)) => self.record_task_progress(&job).await,
            Ok(None) => {}
            Err(err) => tracing::warn!(%job_id, error = %err, "Failed to load job for task tracking"),
        }
    }
}
