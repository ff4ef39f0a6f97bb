//! In-memory state store
//!
//! All tables live behind one mutex, which makes every operation a
//! transaction. Writes publish a new table version while the lock is held,
//! so a watch registered during a read can never miss a later write.

mod jobs;
mod projects;
mod runners;
mod tasks;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harbor_core::domain::config::ConfigVar;
use harbor_core::domain::job::{ApplicationRef, DataSourceRef, Job, JobResult};
use harbor_core::domain::ondemand::OnDemandRunnerConfig;
use harbor_core::domain::project::{Application, Project};
use harbor_core::domain::runner::Runner;
use harbor_core::domain::status::ErrorStatus;
use harbor_core::domain::task::{Task, TaskRef, TaskState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{JobListFilter, JobMutator, Result, StateError, StateStore, Table, Versions, WatchSet};

use jobs::JobRecord;
use projects::ProjectRecord;

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, JobRecord>,
    next_seq: u64,
    runners: HashMap<String, Runner>,
    tasks: HashMap<Uuid, Task>,
    task_by_job: HashMap<Uuid, Uuid>,
    projects: BTreeMap<String, ProjectRecord>,
    ondemand_configs: BTreeMap<Uuid, OnDemandRunnerConfig>,
    config_vars: Vec<ConfigVar>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    versions: watch::Sender<Versions>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (versions, _) = watch::channel(Versions::default());
        Self {
            tables: Mutex::new(Tables::default()),
            versions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, table: Table) {
        self.versions.send_modify(|v| v.bump(table));
    }

    fn track(&self, ws: Option<&mut WatchSet>, table: Table) {
        if let Some(ws) = ws {
            ws.track(table, self.versions.subscribe());
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn job_create(&self, jobs: Vec<Job>) -> Result<Vec<Uuid>> {
        let mut tables = self.lock();
        let ids = tables.create_jobs(jobs)?;
        self.notify(Table::Jobs);
        Ok(ids)
    }

    async fn job_by_id(&self, id: Uuid, ws: Option<&mut WatchSet>) -> Result<Option<Job>> {
        let tables = self.lock();
        self.track(ws, Table::Jobs);
        Ok(tables.job(id).cloned())
    }

    async fn job_list(&self, filter: &JobListFilter) -> Result<Vec<Job>> {
        let tables = self.lock();
        Ok(tables.list_jobs(filter))
    }

    async fn job_assign_for_runner(
        &self,
        runner: &Runner,
        cancel: &CancellationToken,
    ) -> Result<Job> {
        loop {
            let mut ws = WatchSet::new();
            let next_expiry = {
                let mut tables = self.lock();
                let (assigned, changed) = tables.assign(runner, Utc::now());
                if changed {
                    self.notify(Table::Jobs);
                }
                if let Some(job) = assigned {
                    return Ok(job);
                }
                ws.track(Table::Jobs, self.versions.subscribe());
                tables.next_queued_expiry()
            };

            let expiry_wait = next_expiry
                .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));

            tokio::select! {
                _ = cancel.cancelled() => return Err(StateError::Cancelled),
                _ = ws.changed() => {}
                _ = sleep_or_pending(expiry_wait) => {}
            }
        }
    }

    async fn job_ack(&self, id: Uuid, ack: bool) -> Result<Job> {
        let mut tables = self.lock();
        let job = tables.ack_job(id, ack, Utc::now())?;
        self.notify(Table::Jobs);
        Ok(job)
    }

    async fn job_complete(
        &self,
        id: Uuid,
        result: Option<JobResult>,
        error: Option<ErrorStatus>,
    ) -> Result<Job> {
        let mut tables = self.lock();
        let job = tables.complete_job(id, result, error, Utc::now())?;
        self.notify(Table::Jobs);
        Ok(job)
    }

    async fn job_cancel(&self, id: Uuid, force: bool) -> Result<Job> {
        let mut tables = self.lock();
        let job = tables.cancel_job(id, force, Utc::now())?;
        self.notify(Table::Jobs);
        Ok(job)
    }

    async fn job_heartbeat(&self, id: Uuid) -> Result<()> {
        let mut tables = self.lock();
        tables.heartbeat_job(id, Utc::now())?;
        self.notify(Table::Jobs);
        Ok(())
    }

    async fn job_update_expiry(&self, id: Uuid, expire_time: Option<DateTime<Utc>>) -> Result<()> {
        let mut tables = self.lock();
        tables.job_mut(id)?.expire_time = expire_time;
        self.notify(Table::Jobs);
        Ok(())
    }

    async fn job_update_ref(&self, id: Uuid, data_source_ref: DataSourceRef) -> Result<()> {
        let mut tables = self.lock();
        tables.job_mut(id)?.data_source_ref = Some(data_source_ref);
        self.notify(Table::Jobs);
        Ok(())
    }

    async fn job_update(&self, id: Uuid, mutate: JobMutator) -> Result<Job> {
        let mut tables = self.lock();
        let job = tables.job_mut(id)?;
        let (original_id, original_state) = (job.id, job.state);
        mutate(job);
        if job.id != original_id || job.state != original_state {
            job.id = original_id;
            job.state = original_state;
            return Err(StateError::InvalidArgument(
                "job update may not change id or state".to_string(),
            ));
        }
        let updated = job.clone();
        self.notify(Table::Jobs);
        Ok(updated)
    }

    async fn job_reap(&self, now: DateTime<Utc>, heartbeat_timeout: Duration) -> Result<Vec<Uuid>> {
        let mut tables = self.lock();
        let reaped = tables.reap_jobs(now, heartbeat_timeout);
        if !reaped.is_empty() {
            self.notify(Table::Jobs);
        }
        Ok(reaped)
    }

    async fn runner_create(&self, runner: Runner) -> Result<Runner> {
        let mut tables = self.lock();
        let runner = tables.upsert_runner(runner, Utc::now());
        self.notify(Table::Runners);
        Ok(runner)
    }

    async fn runner_by_id(&self, id: &str, ws: Option<&mut WatchSet>) -> Result<Option<Runner>> {
        let tables = self.lock();
        self.track(ws, Table::Runners);
        Ok(tables.runners.get(id).cloned())
    }

    async fn runner_adopt(&self, id: &str, preadopt: bool) -> Result<()> {
        let mut tables = self.lock();
        tables.adopt_runner(id, preadopt)?;
        self.notify(Table::Runners);
        Ok(())
    }

    async fn runner_reject(&self, id: &str) -> Result<()> {
        let mut tables = self.lock();
        tables.reject_runner(id)?;
        self.notify(Table::Runners);
        Ok(())
    }

    async fn runner_online(&self, id: &str) -> Result<()> {
        let mut tables = self.lock();
        tables.set_runner_online(id, true, Utc::now())?;
        self.notify(Table::Runners);
        Ok(())
    }

    async fn runner_offline(&self, id: &str) -> Result<()> {
        let mut tables = self.lock();
        tables.set_runner_online(id, false, Utc::now())?;
        self.notify(Table::Runners);
        Ok(())
    }

    async fn runner_delete(&self, id: &str) -> Result<()> {
        let mut tables = self.lock();
        tables
            .runners
            .remove(id)
            .ok_or_else(|| StateError::not_found("runner", id))?;
        self.notify(Table::Runners);
        Ok(())
    }

    async fn runner_list(&self) -> Result<Vec<Runner>> {
        let tables = self.lock();
        Ok(tables.list_runners())
    }

    async fn task_put(&self, task: Task) -> Result<()> {
        let mut tables = self.lock();
        tables.put_task(task);
        self.notify(Table::Tasks);
        Ok(())
    }

    async fn task_get(&self, task_ref: &TaskRef) -> Result<Option<Task>> {
        let tables = self.lock();
        Ok(tables.get_task(task_ref).cloned())
    }

    async fn task_list(&self) -> Result<Vec<Task>> {
        let tables = self.lock();
        Ok(tables.list_tasks())
    }

    async fn task_delete(&self, id: Uuid) -> Result<()> {
        let mut tables = self.lock();
        tables.delete_task(id)?;
        self.notify(Table::Tasks);
        Ok(())
    }

    async fn task_cancel(&self, task_ref: &TaskRef) -> Result<()> {
        let mut tables = self.lock();
        tables.cancel_task(task_ref, Utc::now())?;
        self.notify(Table::Jobs);
        Ok(())
    }

    async fn task_update_state(&self, task_ref: &TaskRef, state: TaskState) -> Result<()> {
        let mut tables = self.lock();
        tables.update_task_state(task_ref, state)?;
        self.notify(Table::Tasks);
        Ok(())
    }

    async fn project_put(&self, project: Project) -> Result<()> {
        let mut tables = self.lock();
        tables.put_project(project, Utc::now())?;
        self.notify(Table::Projects);
        Ok(())
    }

    async fn project_get(&self, name: &str) -> Result<Option<Project>> {
        let tables = self.lock();
        Ok(tables.projects.get(name).map(|r| r.project.clone()))
    }

    async fn project_poll_peek(
        &self,
        ws: Option<&mut WatchSet>,
    ) -> Result<Option<(Project, DateTime<Utc>)>> {
        let tables = self.lock();
        self.track(ws, Table::Projects);
        Ok(tables.peek_project_poll())
    }

    async fn project_poll_complete(&self, project: &str, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.lock();
        tables.complete_project_poll(project, now)?;
        self.notify(Table::Projects);
        Ok(())
    }

    async fn application_poll_peek(
        &self,
        ws: Option<&mut WatchSet>,
    ) -> Result<Option<(Project, Application, DateTime<Utc>)>> {
        let tables = self.lock();
        self.track(ws, Table::Projects);
        Ok(tables.peek_application_poll())
    }

    async fn application_poll_complete(
        &self,
        application: &ApplicationRef,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.lock();
        tables.complete_application_poll(application, now)?;
        self.notify(Table::Projects);
        Ok(())
    }

    async fn ondemand_runner_config_put(
        &self,
        config: OnDemandRunnerConfig,
    ) -> Result<OnDemandRunnerConfig> {
        let mut tables = self.lock();
        let config = tables.put_ondemand_config(config)?;
        self.notify(Table::OnDemandConfigs);
        Ok(config)
    }

    async fn ondemand_runner_config_get(
        &self,
        id_or_name: &str,
    ) -> Result<Option<OnDemandRunnerConfig>> {
        let tables = self.lock();
        Ok(tables.get_ondemand_config(id_or_name).cloned())
    }

    async fn ondemand_runner_config_default(&self) -> Result<Vec<OnDemandRunnerConfig>> {
        let tables = self.lock();
        Ok(tables.default_ondemand_configs())
    }

    async fn config_set(&self, vars: Vec<ConfigVar>) -> Result<()> {
        let mut tables = self.lock();
        tables.set_config_vars(vars);
        self.notify(Table::ConfigVars);
        Ok(())
    }

    async fn config_for_runner(
        &self,
        runner: &Runner,
        ws: Option<&mut WatchSet>,
    ) -> Result<Vec<ConfigVar>> {
        let tables = self.lock();
        self.track(ws, Table::ConfigVars);
        Ok(tables.config_vars_for(runner))
    }
}

async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use harbor_core::domain::job::JobState;
    use harbor_core::domain::operation::Operation;
    use harbor_core::domain::project::PollSettings;
    use harbor_core::domain::runner::{AdoptionState, RunnerKind, TargetRunner};
    use harbor_core::domain::status::ErrorCode;
    use std::collections::HashMap;

    fn app() -> ApplicationRef {
        ApplicationRef::new("proj", "web")
    }

    fn noop_job() -> Job {
        Job::new(app(), "default", Operation::Noop)
    }

    fn runner(id: &str) -> Runner {
        let mut runner = Runner::new(id, HashMap::new(), RunnerKind::Remote);
        runner.adoption_state = AdoptionState::Adopted;
        runner
    }

    async fn assign_now(store: &MemoryStore, runner: &Runner) -> Option<Job> {
        let cancel = CancellationToken::new();
        tokio::time::timeout(
            Duration::from_millis(50),
            store.job_assign_for_runner(runner, &cancel),
        )
        .await
        .ok()
        .map(|r| r.expect("assignment should not fail"))
    }

    #[tokio::test]
    async fn test_job_create_is_atomic() {
        let store = MemoryStore::new();
        let first = noop_job();
        let mut second = noop_job();
        second.depends_on = vec![Uuid::new_v4()];

        let result = store.job_create(vec![first.clone(), second]).await;
        assert!(matches!(result, Err(StateError::NotFound { .. })));
        assert!(store.job_by_id(first.id, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_singleton_replaces_queued_job() {
        let store = MemoryStore::new();
        let mut first = noop_job();
        first.singleton_id = Some("poll/proj".to_string());
        let mut second = Job::new(app(), "default", Operation::Poll);
        second.singleton_id = Some("poll/proj".to_string());

        let first_ids = store.job_create(vec![first.clone()]).await.unwrap();
        let second_ids = store.job_create(vec![second]).await.unwrap();

        assert_eq!(first_ids, vec![first.id]);
        assert_eq!(second_ids, vec![first.id]);

        let jobs = store.job_list(&JobListFilter::default()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, first.id);
        assert_eq!(jobs[0].operation, Operation::Poll);
    }

    #[tokio::test]
    async fn test_singleton_leaves_running_job_alone() {
        let store = MemoryStore::new();
        let r = runner("r1");
        let mut first = noop_job();
        first.singleton_id = Some("key".to_string());
        store.job_create(vec![first.clone()]).await.unwrap();
        assign_now(&store, &r).await.unwrap();
        store.job_ack(first.id, true).await.unwrap();

        let mut second = Job::new(app(), "default", Operation::Poll);
        second.singleton_id = Some("key".to_string());
        let ids = store.job_create(vec![second]).await.unwrap();

        assert_eq!(ids, vec![first.id]);
        let job = store.job_by_id(first.id, None).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.operation, Operation::Noop);
    }

    #[tokio::test]
    async fn test_assignment_is_fifo_and_respects_dependencies() {
        let store = MemoryStore::new();
        let r = runner("r1");
        let first = noop_job();
        let mut second = noop_job();
        second.depends_on = vec![first.id];
        store.job_create(vec![first.clone(), second.clone()]).await.unwrap();

        let assigned = assign_now(&store, &r).await.unwrap();
        assert_eq!(assigned.id, first.id);
        assert_eq!(assigned.state, JobState::Waiting);
        assert_eq!(assigned.assigned_runner.as_deref(), Some("r1"));

        // second waits for first to finish
        assert!(assign_now(&store, &r).await.is_none());

        store.job_ack(first.id, true).await.unwrap();
        store.job_complete(first.id, None, None).await.unwrap();
        assert_eq!(assign_now(&store, &r).await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_failed_dependency_errors_dependent() {
        let store = MemoryStore::new();
        let r = runner("r1");
        let first = noop_job();
        let mut dependent = noop_job();
        dependent.depends_on = vec![first.id];
        let mut tolerant = noop_job();
        tolerant.depends_on = vec![first.id];
        tolerant.depends_on_allow_failure = vec![first.id];
        store
            .job_create(vec![first.clone(), dependent.clone(), tolerant.clone()])
            .await
            .unwrap();

        assign_now(&store, &r).await.unwrap();
        store.job_ack(first.id, true).await.unwrap();
        let failure = ErrorStatus::new(ErrorCode::Internal, "boom");
        store.job_complete(first.id, None, Some(failure)).await.unwrap();

        assert_eq!(assign_now(&store, &r).await.unwrap().id, tolerant.id);
        let dependent = store.job_by_id(dependent.id, None).await.unwrap().unwrap();
        assert_eq!(dependent.state, JobState::Error);
    }

    #[tokio::test]
    async fn test_ondemand_runner_only_takes_targeted_jobs() {
        let store = MemoryStore::new();
        let mut odr = runner("odr-1");
        odr.kind = RunnerKind::Odr {
            profile_id: Uuid::new_v4(),
        };
        let untargeted = noop_job();
        let mut targeted = noop_job();
        targeted.target_runner = TargetRunner::id("odr-1");
        store
            .job_create(vec![untargeted, targeted.clone()])
            .await
            .unwrap();

        assert_eq!(assign_now(&store, &odr).await.unwrap().id, targeted.id);
        assert!(assign_now(&store, &odr).await.is_none());
    }

    #[tokio::test]
    async fn test_assignment_wakes_on_new_job() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let r = runner("r1");
        let cancel = CancellationToken::new();

        let waiter = {
            let store = store.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { store.job_assign_for_runner(&r, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let job = noop_job();
        store.job_create(vec![job.clone()]).await.unwrap();

        let assigned = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(assigned.id, job.id);
    }

    #[tokio::test]
    async fn test_assignment_honors_cancellation() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = store.job_assign_for_runner(&runner("r1"), &cancel).await;
        assert!(matches!(result, Err(StateError::Cancelled)));
    }

    #[tokio::test]
    async fn test_nack_requeues() {
        let store = MemoryStore::new();
        let r = runner("r1");
        let job = noop_job();
        store.job_create(vec![job.clone()]).await.unwrap();
        assign_now(&store, &r).await.unwrap();

        let requeued = store.job_ack(job.id, false).await.unwrap();
        assert_eq!(requeued.state, JobState::Queued);
        assert!(requeued.assigned_runner.is_none());
        assert!(store.job_complete(job.id, None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_semantics() {
        let store = MemoryStore::new();
        let r = runner("r1");
        let queued = noop_job();
        let running = noop_job();
        store
            .job_create(vec![running.clone(), queued.clone()])
            .await
            .unwrap();
        assign_now(&store, &r).await.unwrap();
        store.job_ack(running.id, true).await.unwrap();

        let canceled = store.job_cancel(queued.id, false).await.unwrap();
        assert_eq!(canceled.state, JobState::Error);
        assert!(canceled.cancel_time.is_some());

        let soft = store.job_cancel(running.id, false).await.unwrap();
        assert_eq!(soft.state, JobState::Running);
        assert!(soft.is_canceled());

        let forced = store.job_cancel(running.id, true).await.unwrap();
        assert_eq!(forced.state, JobState::Error);
        assert_eq!(forced.cancel_time, soft.cancel_time);
    }

    #[tokio::test]
    async fn test_reap_expired_and_silent_jobs() {
        let store = MemoryStore::new();
        let r = runner("r1");
        let running = noop_job();
        let mut expiring = noop_job();
        expiring.target_runner = TargetRunner::id("nobody");
        expiring.expire_time = Some(Utc::now() + TimeDelta::seconds(1));
        store
            .job_create(vec![running.clone(), expiring.clone()])
            .await
            .unwrap();
        assign_now(&store, &r).await.unwrap();
        store.job_ack(running.id, true).await.unwrap();

        let later = Utc::now() + TimeDelta::seconds(120);
        let mut reaped = store
            .job_reap(later, Duration::from_secs(60))
            .await
            .unwrap();
        reaped.sort();
        let mut expected = vec![running.id, expiring.id];
        expected.sort();
        assert_eq!(reaped, expected);

        let expired = store.job_by_id(expiring.id, None).await.unwrap().unwrap();
        assert_eq!(
            expired.error.map(|e| e.code),
            Some(ErrorCode::DeadlineExceeded)
        );
    }

    #[tokio::test]
    async fn test_runner_adoption() {
        let store = MemoryStore::new();
        store
            .runner_create(Runner::new("r1", HashMap::new(), RunnerKind::Remote))
            .await
            .unwrap();

        store.runner_adopt("r1", true).await.unwrap();
        let r = store.runner_by_id("r1", None).await.unwrap().unwrap();
        assert_eq!(r.adoption_state, AdoptionState::Preadopted);

        store.runner_reject("r1").await.unwrap();
        assert!(store.runner_adopt("r1", true).await.is_err());

        // re-registering never resets the decision
        store
            .runner_create(Runner::new("r1", HashMap::new(), RunnerKind::Remote))
            .await
            .unwrap();
        let r = store.runner_by_id("r1", None).await.unwrap().unwrap();
        assert_eq!(r.adoption_state, AdoptionState::Rejected);

        store.runner_adopt("r1", false).await.unwrap();
        let r = store.runner_by_id("r1", None).await.unwrap().unwrap();
        assert_eq!(r.adoption_state, AdoptionState::Adopted);
    }

    #[tokio::test]
    async fn test_relabel_resets_adoption() {
        let store = MemoryStore::new();
        let labels = HashMap::from([("env".to_string(), "prod".to_string())]);
        store
            .runner_create(Runner::new("r1", labels.clone(), RunnerKind::Remote))
            .await
            .unwrap();
        store.runner_adopt("r1", false).await.unwrap();

        // same labels keep the decision
        let r = store
            .runner_create(Runner::new("r1", labels, RunnerKind::Remote))
            .await
            .unwrap();
        assert_eq!(r.adoption_state, AdoptionState::Adopted);

        let relabeled = HashMap::from([("env".to_string(), "dev".to_string())]);
        let r = store
            .runner_create(Runner::new("r1", relabeled, RunnerKind::Remote))
            .await
            .unwrap();
        assert_eq!(r.adoption_state, AdoptionState::Pending);
        assert_eq!(r.labels["env"], "dev");
    }

    #[tokio::test]
    async fn test_runner_watch_fires_on_adoption() {
        let store = MemoryStore::new();
        store
            .runner_create(Runner::new("r1", HashMap::new(), RunnerKind::Remote))
            .await
            .unwrap();

        let mut ws = WatchSet::new();
        store.runner_by_id("r1", Some(&mut ws)).await.unwrap();
        store.runner_adopt("r1", false).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), ws.changed())
            .await
            .expect("adoption should wake the watcher");
    }

    #[tokio::test]
    async fn test_project_poll_schedule() {
        let store = MemoryStore::new();
        let mut project = Project::new("proj");
        project.data_source_poll = Some(PollSettings {
            enabled: true,
            interval: Duration::from_secs(30),
        });
        let before = Utc::now();
        store.project_put(project).await.unwrap();

        let (peeked, due) = store.project_poll_peek(None).await.unwrap().unwrap();
        assert_eq!(peeked.name, "proj");
        assert!(due >= before && due <= Utc::now());

        let now = Utc::now();
        store.project_poll_complete("proj", now).await.unwrap();
        let (_, due) = store.project_poll_peek(None).await.unwrap().unwrap();
        assert_eq!(due, now + TimeDelta::seconds(30));
    }

    #[tokio::test]
    async fn test_disabled_poll_is_never_due() {
        let store = MemoryStore::new();
        let mut project = Project::new("proj");
        project.data_source_poll = Some(PollSettings {
            enabled: false,
            interval: Duration::from_secs(30),
        });
        store.project_put(project).await.unwrap();
        assert!(store.project_poll_peek(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_task_lookup_by_job() {
        let store = MemoryStore::new();
        let task = Task {
            id: Uuid::new_v4(),
            start_job: Uuid::new_v4(),
            task_job: Uuid::new_v4(),
            watch_job: Uuid::new_v4(),
            stop_job: Uuid::new_v4(),
            runner_id: "odr-1".to_string(),
            job_state: TaskState::Pending,
            created_at: Utc::now(),
        };
        store.task_put(task.clone()).await.unwrap();

        let found = store
            .task_get(&TaskRef::JobId(task.watch_job))
            .await
            .unwrap();
        assert_eq!(found, Some(task.clone()));

        store
            .task_update_state(&TaskRef::Id(task.id), TaskState::Running)
            .await
            .unwrap();
        let found = store.task_get(&TaskRef::Id(task.id)).await.unwrap().unwrap();
        assert_eq!(found.job_state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_config_vars_filter_by_target() {
        let store = MemoryStore::new();
        store
            .config_set(vec![
                ConfigVar {
                    name: "GLOBAL".to_string(),
                    value: "1".to_string(),
                    target: None,
                },
                ConfigVar {
                    name: "ONLY_R2".to_string(),
                    value: "2".to_string(),
                    target: Some(TargetRunner::id("r2")),
                },
            ])
            .await
            .unwrap();

        let vars = store.config_for_runner(&runner("r1"), None).await.unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "GLOBAL");

        store
            .config_set(vec![ConfigVar {
                name: "GLOBAL".to_string(),
                value: String::new(),
                target: None,
            }])
            .await
            .unwrap();
        assert!(store.config_for_runner(&runner("r1"), None).await.unwrap().is_empty());
    }
}
