//! Task-related API endpoints

use crate::HarborClient;
use crate::error::Result;
use harbor_core::domain::task::Task;
use harbor_core::dto::task::{GetTaskResponse, UpsertTaskRequest};
use uuid::Uuid;

impl HarborClient {
    pub async fn upsert_task(&self, task: Task) -> Result<Task> {
        let response = self
            .put("/task")
            .json(&UpsertTaskRequest { task })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a task with its jobs resolved
    pub async fn get_task(&self, task_id: Uuid) -> Result<GetTaskResponse> {
        let response = self.get(&format!("/task/{}", task_id)).send().await?;

        self.handle_response(response).await
    }

    /// Get the task a job belongs to
    pub async fn get_task_by_job(&self, job_id: Uuid) -> Result<GetTaskResponse> {
        let response = self.get(&format!("/task/job/{}", job_id)).send().await?;

        self.handle_response(response).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let response = self.get("/task/list").send().await?;

        self.handle_response(response).await
    }

    /// Cancel every job of a task
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<()> {
        let response = self.post(&format!("/task/{}/cancel", task_id)).send().await?;

        self.handle_empty_response(response).await
    }
}
