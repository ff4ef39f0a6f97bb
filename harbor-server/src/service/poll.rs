//! Poll queuer
//!
//! A generic loop that finds the next item due for polling, sleeps until it
//! is due, queues the jobs its handler builds and reschedules it. Every
//! queued poll job carries a singleton ID, so a slow runner never sees a
//! pile-up of identical polls.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harbor_core::domain::job::ApplicationRef;
use harbor_core::domain::operation::Operation;
use harbor_core::domain::project::{Application, Project};
use harbor_core::dto::job::{JobTemplate, QueueJobRequest};

use super::job::DEFAULT_WORKSPACE;
use super::{Result, Service};
use crate::state::WatchSet;

#[async_trait]
pub(crate) trait PollHandler: Send + Sync {
    type Item: Send + Sync;

    fn name(&self) -> &'static str;

    /// Next item to poll and when it is due. Registers the tables read on
    /// `ws` so the loop wakes when the schedule changes.
    async fn peek(&self, service: &Service, ws: &mut WatchSet)
        -> Result<Option<(Self::Item, DateTime<Utc>)>>;

    /// Jobs to queue for a due item. May be empty.
    fn poll_job(&self, item: &Self::Item) -> Result<Vec<QueueJobRequest>>;

    /// Schedules the item's next poll
    async fn complete(&self, service: &Service, item: &Self::Item) -> Result<()>;
}

impl Service {
    pub(crate) async fn poll_loop<H: PollHandler>(&self, handler: H) {
        tracing::debug!(handler = handler.name(), "Poll loop started");

        loop {
            let mut ws = WatchSet::new();
            let peeked = match handler.peek(self, &mut ws).await {
                Ok(peeked) => peeked,
                Err(err) => {
                    tracing::warn!(handler = handler.name(), error = %err, "Poll peek failed");
                    if !self.poll_backoff().await {
                        break;
                    }
                    continue;
                }
            };

            let Some((item, due)) = peeked else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ws.changed() => continue,
                }
            };

            let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ws.changed() => continue,
                _ = tokio::time::sleep(wait) => {}
            }

            if let Err(err) = self.poll_once(&handler, &item).await {
                tracing::warn!(handler = handler.name(), error = %err, "Poll failed");
                if !self.poll_backoff().await {
                    break;
                }
            }
        }

        tracing::debug!(handler = handler.name(), "Poll loop stopped");
    }

    /// Queues the item's jobs and reschedules it. The item is rescheduled
    /// even when queueing failed, so it cannot hold the head of the schedule.
    async fn poll_once<H: PollHandler>(&self, handler: &H, item: &H::Item) -> Result<()> {
        let queued = self.queue_poll_jobs(handler, item).await;
        handler.complete(self, item).await?;
        queued
    }

    async fn queue_poll_jobs<H: PollHandler>(&self, handler: &H, item: &H::Item) -> Result<()> {
        let reqs = handler.poll_job(item)?;
        if !reqs.is_empty() {
            let ids = self.queue_job_multi(reqs).await?;
            tracing::debug!(handler = handler.name(), jobs = ?ids, "Poll jobs queued");
        }
        Ok(())
    }

    /// Returns false when the service shut down while backing off
    async fn poll_backoff(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.config.poll_backoff) => true,
        }
    }
}

fn singleton_id(kind: &str, application: &ApplicationRef) -> String {
    format!(
        "{kind}/{DEFAULT_WORKSPACE}/{}/{}",
        application.project, application.application
    )
}

fn poll_request(application: ApplicationRef, operation: Operation) -> QueueJobRequest {
    let mut template = JobTemplate::new(application, operation);
    template.workspace = Some(DEFAULT_WORKSPACE.to_string());
    template.singleton_id = Some(singleton_id(template.operation.kind(), &template.application));
    QueueJobRequest::new(template)
}

/// Queues a data source poll for projects with polling enabled
pub(crate) struct ProjectPoll;

#[async_trait]
impl PollHandler for ProjectPoll {
    type Item = Project;

    fn name(&self) -> &'static str {
        "project"
    }

    async fn peek(
        &self,
        service: &Service,
        ws: &mut WatchSet,
    ) -> Result<Option<(Project, DateTime<Utc>)>> {
        Ok(service.store.project_poll_peek(Some(ws)).await?)
    }

    fn poll_job(&self, project: &Project) -> Result<Vec<QueueJobRequest>> {
        Ok(vec![poll_request(
            ApplicationRef::project(&project.name),
            Operation::Poll,
        )])
    }

    async fn complete(&self, service: &Service, project: &Project) -> Result<()> {
        Ok(service
            .store
            .project_poll_complete(&project.name, Utc::now())
            .await?)
    }
}

/// Queues a status report for applications with status polling enabled
pub(crate) struct ApplicationStatusPoll;

#[async_trait]
impl PollHandler for ApplicationStatusPoll {
    type Item = ApplicationRef;

    fn name(&self) -> &'static str {
        "status_report"
    }

    async fn peek(
        &self,
        service: &Service,
        ws: &mut WatchSet,
    ) -> Result<Option<(ApplicationRef, DateTime<Utc>)>> {
        let peeked = service.store.application_poll_peek(Some(ws)).await?;
        Ok(peeked.map(|(project, app, due)| (app_ref(&project, &app), due)))
    }

    fn poll_job(&self, application: &ApplicationRef) -> Result<Vec<QueueJobRequest>> {
        Ok(vec![poll_request(
            application.clone(),
            Operation::StatusReport {
                deployment_id: None,
                release_id: None,
            },
        )])
    }

    async fn complete(&self, service: &Service, application: &ApplicationRef) -> Result<()> {
        Ok(service
            .store
            .application_poll_complete(application, Utc::now())
            .await?)
    }
}

fn app_ref(project: &Project, app: &Application) -> ApplicationRef {
    ApplicationRef::new(&project.name, &app.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::service::testing::service_with_project;
    use crate::service::ServiceError;
    use harbor_core::domain::job::{DataSource, JobState};
    use harbor_core::domain::project::PollSettings;
    use harbor_core::dto::job::ListJobsQuery;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn polled_project(name: &str, interval: Duration) -> Project {
        let mut project = Project::new(name);
        project.data_source = Some(DataSource::Local);
        project.data_source_poll = Some(PollSettings {
            enabled: true,
            interval,
        });
        project
    }

    #[tokio::test]
    async fn test_project_poll_queues_one_singleton_job() {
        let service = Arc::new(Service::in_memory(ServerConfig::default()));
        service
            .put_project(polled_project("proj", Duration::from_millis(15)))
            .await
            .unwrap();

        service.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let jobs = service.list_jobs(ListJobsQuery::default()).await.unwrap();
        service.close().await;

        let live: Vec<_> = jobs.iter().filter(|j| j.state != JobState::Error).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].operation, Operation::Poll);
        assert_eq!(
            live[0].singleton_id.as_deref(),
            Some("poll/default/proj/")
        );
    }

    #[tokio::test]
    async fn test_status_report_poll_targets_application() {
        let service = Arc::new(Service::in_memory(ServerConfig::default()));
        let mut project = Project::new("proj");
        project.data_source = Some(DataSource::Local);
        project.applications.push(Application {
            name: "web".to_string(),
            status_report_poll: Some(PollSettings {
                enabled: true,
                interval: Duration::from_secs(60),
            }),
        });
        service.put_project(project).await.unwrap();

        service.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let jobs = service.list_jobs(ListJobsQuery::default()).await.unwrap();
        service.close().await;

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].application, ApplicationRef::new("proj", "web"));
        assert!(matches!(jobs[0].operation, Operation::StatusReport { .. }));
    }

    #[tokio::test]
    async fn test_failing_project_does_not_starve_others() {
        let config = ServerConfig {
            poll_backoff: Duration::from_millis(10),
            ..ServerConfig::default()
        };
        let service = Arc::new(Service::in_memory(config));

        // stored behind validation's back: polls enabled, nothing to poll
        let mut broken = polled_project("aaa-broken", Duration::from_millis(15));
        broken.data_source = None;
        service.store.project_put(broken).await.unwrap();
        service
            .put_project(polled_project("good", Duration::from_millis(15)))
            .await
            .unwrap();

        service.start();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let good = service
            .list_jobs(ListJobsQuery {
                project: Some("good".to_string()),
                ..ListJobsQuery::default()
            })
            .await
            .unwrap();
        let broken = service
            .list_jobs(ListJobsQuery {
                project: Some("aaa-broken".to_string()),
                ..ListJobsQuery::default()
            })
            .await
            .unwrap();
        service.close().await;

        assert!(!good.is_empty());
        assert!(broken.is_empty());
    }

    struct CountingHandler {
        peeks: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PollHandler for CountingHandler {
        type Item = ();

        fn name(&self) -> &'static str {
            "counting"
        }

        async fn peek(&self, _: &Service, _: &mut WatchSet) -> Result<Option<((), DateTime<Utc>)>> {
            self.peeks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ServiceError::Internal("boom".to_string()));
            }
            Ok(None)
        }

        fn poll_job(&self, _: &()) -> Result<Vec<QueueJobRequest>> {
            Ok(Vec::new())
        }

        async fn complete(&self, _: &Service, _: &()) -> Result<()> {
            Ok(())
        }
    }

    async fn count_peeks(fail: bool) -> usize {
        let service = service_with_project("proj").await;
        let peeks = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            peeks: peeks.clone(),
            fail,
        };

        let handle = {
            let service = service.clone();
            tokio::spawn(async move { service.poll_loop(handler).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.close().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        peeks.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_idle_loop_does_not_spin() {
        assert_eq!(count_peeks(false).await, 1);
    }

    #[tokio::test]
    async fn test_failed_peek_backs_off() {
        assert_eq!(count_peeks(true).await, 1);
    }
}
