//! Job Service
//!
//! Queueing, inspection and cancellation of jobs.

use std::collections::HashMap;

use chrono::{TimeDelta, Utc};
use harbor_core::domain::job::Job;
use harbor_core::domain::runner::TargetRunner;
use harbor_core::dto::job::{
    JobTemplate, ListJobsQuery, QueueJobRequest, QueueJobResponse, ValidateJobResponse,
};
use uuid::Uuid;

use super::ondemand::QueuedGraph;
use super::{Result, Service, ServiceError};
use crate::state::JobListFilter;

pub(super) const DEFAULT_WORKSPACE: &str = "default";

impl Service {
    /// Queues one job, expanding it into an on-demand runner task when it
    /// asks for one. Returns the ID of the job doing the requested work.
    pub async fn queue_job(&self, req: QueueJobRequest) -> Result<QueueJobResponse> {
        let ids = self.queue_job_multi(vec![req]).await?;
        let job_id = ids
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Internal("no job was queued".to_string()))?;
        Ok(QueueJobResponse { job_id })
    }

    /// Queues every request or none of them. The returned IDs line up with
    /// the requests.
    pub async fn queue_job_multi(&self, reqs: Vec<QueueJobRequest>) -> Result<Vec<Uuid>> {
        let mut jobs = Vec::new();
        let mut primaries = Vec::with_capacity(reqs.len());
        let mut tasks = Vec::new();

        for req in reqs {
            let graph = match self.queue_job_req_to_jobs(req).await {
                Ok(graph) => graph,
                Err(err) => {
                    self.discard_tasks(&tasks).await;
                    return Err(err);
                }
            };
            primaries.push(jobs.len() + graph.primary);
            jobs.extend(graph.jobs);
            tasks.extend(graph.task);
        }

        let count = jobs.len();
        let submitted: Vec<Uuid> = jobs.iter().map(|job| job.id).collect();
        let ids = match self.store.job_create(jobs).await {
            Ok(ids) => ids,
            Err(err) => {
                self.discard_tasks(&tasks).await;
                return Err(err.into());
            }
        };

        let remapped: HashMap<Uuid, Uuid> = submitted
            .into_iter()
            .zip(ids.iter().copied())
            .filter(|(submitted, effective)| submitted != effective)
            .collect();
        if !remapped.is_empty() {
            self.remap_tasks(tasks, &remapped).await?;
        }

        let primary_ids = primaries
            .into_iter()
            .map(|index| {
                ids.get(index).copied().ok_or_else(|| {
                    tracing::error!(index, "job create returned too few IDs, should not happen");
                    ServiceError::Internal("job create returned too few IDs".to_string())
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(jobs = count, primary = ?primary_ids, "Jobs queued");

        Ok(primary_ids)
    }

    async fn queue_job_req_to_jobs(&self, req: QueueJobRequest) -> Result<QueuedGraph> {
        let ondemand = req.job.ondemand_runner.is_some();
        let profile = self.resolve_ondemand_profile(&req.job).await?;
        let job = self.queue_job_req_to_job(req).await?;

        match profile {
            Some(profile) => self.ondemand_wrap(job, &profile).await,
            None => {
                if ondemand {
                    tracing::debug!(job_id = %job.id, "No on-demand runner profile applies, queueing as-is");
                }
                Ok(QueuedGraph::single(job))
            }
        }
    }

    /// Converts a queue request into a job without expanding on-demand
    /// runner tasks
    async fn queue_job_req_to_job(&self, req: QueueJobRequest) -> Result<Job> {
        let QueueJobRequest {
            job: template,
            expires_in,
        } = req;

        validate_template(&template)?;

        let project_name = &template.application.project;
        let project = self
            .store
            .project_get(project_name)
            .await?
            .ok_or_else(|| {
                ServiceError::FailedPrecondition(format!("project {project_name} does not exist"))
            })?;

        let data_source = template
            .data_source
            .or(project.data_source)
            .ok_or_else(|| {
                ServiceError::FailedPrecondition(format!(
                    "project {project_name} has no data source configured"
                ))
            })?;

        let now = Utc::now();
        let expire_time = match expires_in {
            Some(ttl) => Some(
                TimeDelta::from_std(ttl)
                    .ok()
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .ok_or_else(|| {
                        ServiceError::InvalidArgument("job expiry is too far away".to_string())
                    })?,
            ),
            None => None,
        };

        let workspace = template
            .workspace
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());

        let mut job = Job::new(template.application, workspace, template.operation);
        if let Some(id) = template.id {
            job.id = id;
        }
        job.target_runner = template.target_runner;
        job.ondemand_runner_task = template.ondemand_runner_task;
        job.labels = template.labels;
        job.depends_on = template.depends_on;
        job.depends_on_allow_failure = template.depends_on_allow_failure;
        job.singleton_id = template.singleton_id;
        job.data_source = Some(data_source);
        job.variables = template.variables;
        job.queue_time = now;
        job.expire_time = expire_time;

        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.store
            .job_by_id(id, None)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("job {id} not found")))
    }

    pub async fn list_jobs(&self, query: ListJobsQuery) -> Result<Vec<Job>> {
        let filter = JobListFilter {
            project: query.project,
            application: query.application,
            workspace: query.workspace,
            state: query.state,
            runner: query.runner,
        };
        Ok(self.store.job_list(&filter).await?)
    }

    /// Requests cancellation. Running jobs keep running until their runner
    /// observes the request, unless `force` is set.
    pub async fn cancel_job(&self, id: Uuid, force: bool) -> Result<Job> {
        let job = self.store.job_cancel(id, force).await?;
        tracing::info!(job_id = %id, force, state = %job.state, "Job cancel requested");
        self.record_task_progress(&job).await;
        Ok(job)
    }

    /// Checks a queue request without queueing anything and reports whether
    /// a connected runner could take the job
    pub async fn validate_job(&self, req: QueueJobRequest) -> Result<ValidateJobResponse> {
        let profile = match self.resolve_ondemand_profile(&req.job).await {
            Ok(profile) => profile,
            Err(err) => return Ok(invalid_response(&err)),
        };
        let job = match self.queue_job_req_to_job(req).await {
            Ok(job) => job,
            Err(err) => return Ok(invalid_response(&err)),
        };

        // the first job dispatched for an on-demand task targets the profile
        let target = profile.map_or(job.target_runner, |p| p.target_runner);
        let assignable = self.store.runner_list().await?.iter().any(|runner| {
            runner.online
                && runner.can_receive_work()
                && !runner.kind.is_ondemand()
                && target.matches(runner)
        });

        Ok(ValidateJobResponse {
            valid: true,
            validation_error: None,
            assignable,
        })
    }
}

fn validate_template(template: &JobTemplate) -> Result<()> {
    if template.application.project.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(
            "job must reference a project".to_string(),
        ));
    }

    if template.operation.is_task_lifecycle() {
        return Err(ServiceError::InvalidArgument(format!(
            "{} jobs are created by the server and cannot be queued directly",
            template.operation.kind()
        )));
    }

    if let Some(id) = template
        .depends_on_allow_failure
        .iter()
        .find(|id| !template.depends_on.contains(id))
    {
        return Err(ServiceError::InvalidArgument(format!(
            "allow-failure dependency {id} is not listed in depends_on"
        )));
    }

    if let TargetRunner::Id { id } = &template.target_runner {
        if id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "target runner ID must not be empty".to_string(),
            ));
        }
    }

    if template.singleton_id.as_deref().is_some_and(str::is_empty) {
        return Err(ServiceError::InvalidArgument(
            "singleton ID must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn invalid_response(err: &ServiceError) -> ValidateJobResponse {
    ValidateJobResponse {
        valid: false,
        validation_error: Some(err.to_status()),
        assignable: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::service_with_project;
    use harbor_core::domain::job::{ApplicationRef, DataSource, JobState};
    use harbor_core::domain::operation::Operation;
    use harbor_core::domain::status::ErrorCode;

    fn request(operation: Operation) -> QueueJobRequest {
        QueueJobRequest::new(JobTemplate::new(
            ApplicationRef::new("proj", "web"),
            operation,
        ))
    }

    #[tokio::test]
    async fn test_queue_fills_defaults_from_project() {
        let service = service_with_project("proj").await;

        let resp = service.queue_job(request(Operation::Up)).await.unwrap();
        let job = service.get_job(resp.job_id).await.unwrap();

        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.workspace, DEFAULT_WORKSPACE);
        assert!(matches!(job.data_source, Some(DataSource::Local)));
        assert!(job.expire_time.is_none());
    }

    #[tokio::test]
    async fn test_queue_rejects_bad_requests() {
        let service = service_with_project("proj").await;

        let err = service
            .queue_job(request(Operation::WatchTask {
                start_job_id: Uuid::new_v4(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));

        let mut unknown = request(Operation::Up);
        unknown.job.application = ApplicationRef::new("missing", "web");
        let err = service.queue_job(unknown).await.unwrap_err();
        assert!(matches!(err, ServiceError::FailedPrecondition(_)));

        let mut allow = request(Operation::Up);
        allow.job.depends_on_allow_failure = vec![Uuid::new_v4()];
        let err = service.queue_job(allow).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_singleton_queue_is_deduplicated() {
        let service = service_with_project("proj").await;

        let mut first = request(Operation::Poll);
        first.job.singleton_id = Some("poll/proj".to_string());
        let second = first.clone();

        let a = service.queue_job(first).await.unwrap();
        let b = service.queue_job(second).await.unwrap();

        assert_eq!(a.job_id, b.job_id);
        let jobs = service.list_jobs(ListJobsQuery::default()).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_multi_is_all_or_nothing() {
        let service = service_with_project("proj").await;

        let mut broken = request(Operation::Deploy { artifact_id: None });
        broken.job.depends_on = vec![Uuid::new_v4()];

        let result = service
            .queue_job_multi(vec![request(Operation::Build { disable_push: false }), broken])
            .await;
        assert!(result.is_err());

        let jobs = service.list_jobs(ListJobsQuery::default()).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_queued_job_errors_it() {
        let service = service_with_project("proj").await;
        let resp = service.queue_job(request(Operation::Up)).await.unwrap();

        let job = service.cancel_job(resp.job_id, false).await.unwrap();
        assert_eq!(job.state, JobState::Error);
        assert!(job.cancel_time.is_some());
        assert_eq!(job.error.map(|e| e.code), Some(ErrorCode::Cancelled));
    }

    #[tokio::test]
    async fn test_validate_reports_without_queueing() {
        let service = service_with_project("proj").await;

        let invalid = service
            .validate_job(request(Operation::StopTask {
                params: harbor_core::domain::operation::TaskPluginParams {
                    plugin_type: "docker".to_string(),
                    plugin_config: serde_json::Value::Null,
                },
                state_job_id: Uuid::new_v4(),
            }))
            .await
            .unwrap();
        assert!(!invalid.valid);
        assert!(invalid.validation_error.is_some());

        let valid = service.validate_job(request(Operation::Up)).await.unwrap();
        assert!(valid.valid);
        assert!(!valid.assignable);

        let jobs = service.list_jobs(ListJobsQuery::default()).await.unwrap();
        assert!(jobs.is_empty());
    }
}
