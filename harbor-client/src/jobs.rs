//! Job-related API endpoints

use crate::HarborClient;
use crate::error::Result;
use harbor_core::domain::job::Job;
use harbor_core::dto::job::{
    CancelJobRequest, ListJobsQuery, QueueJobRequest, QueueJobResponse, ValidateJobResponse,
};
use uuid::Uuid;

impl HarborClient {
    /// Queue a job
    ///
    /// Jobs that ask for an on-demand runner are expanded by the server; the
    /// returned ID is the job doing the requested work.
    ///
    /// # Example
    /// ```no_run
    /// # use harbor_client::HarborClient;
    /// # use harbor_core::domain::job::ApplicationRef;
    /// # use harbor_core::domain::operation::Operation;
    /// # use harbor_core::dto::job::{JobTemplate, QueueJobRequest};
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = HarborClient::new("http://localhost:9701").with_token("hbr_...");
    /// let template = JobTemplate::new(ApplicationRef::new("shop", "web"), Operation::Build {
    ///     disable_push: false,
    /// });
    /// let queued = client.queue_job(QueueJobRequest::new(template)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn queue_job(&self, req: QueueJobRequest) -> Result<QueueJobResponse> {
        let response = self.post("/job").json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Validate a job without queueing it
    pub async fn validate_job(&self, req: QueueJobRequest) -> Result<ValidateJobResponse> {
        let response = self.post("/job/validate").json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let response = self.get(&format!("/job/{}", job_id)).send().await?;

        self.handle_response(response).await
    }

    /// List jobs matching every set field of `query`
    pub async fn list_jobs(&self, query: &ListJobsQuery) -> Result<Vec<Job>> {
        let response = self.get("/job/list").query(query).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a job
    ///
    /// A forced cancel errors the job immediately; otherwise the runner is
    /// asked to stop and the job completes when it does.
    pub async fn cancel_job(&self, job_id: Uuid, force: bool) -> Result<Job> {
        let response = self
            .post(&format!("/job/{}/cancel", job_id))
            .json(&CancelJobRequest { force })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
