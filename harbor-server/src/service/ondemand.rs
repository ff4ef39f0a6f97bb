//! On-demand runner tasks
//!
//! A job that asks for an ephemeral runner is expanded into four jobs that
//! share one task record:
//!
//! ```text
//!   start ──┬──────────┐
//!           ▼          ▼
//!         watch      source (absent when skipped)
//!           └────┬─────┘
//!                ▼
//!              stop
//! ```
//!
//! `stop` tolerates failure of everything it depends on so the runner is
//! always torn down.

use std::collections::HashMap;

use chrono::Utc;
use harbor_core::domain::job::Job;
use harbor_core::domain::ondemand::OnDemandRunnerConfig;
use harbor_core::domain::operation::{Operation, TaskLaunchInfo, TaskPluginParams};
use harbor_core::domain::runner::TargetRunner;
use harbor_core::domain::task::{Task, TaskRef, TaskState};
use harbor_core::dto::job::JobTemplate;
use rand::seq::SliceRandom;
use uuid::Uuid;

use super::{Result, Service, ServiceError};

/// Jobs produced from one queue request, inserted together
#[derive(Debug)]
pub(crate) struct QueuedGraph {
    pub(crate) jobs: Vec<Job>,
    /// Index of the job doing the requested work
    pub(crate) primary: usize,
    /// Task record already written for the jobs
    pub(crate) task: Option<Task>,
}

impl QueuedGraph {
    pub(crate) fn single(job: Job) -> Self {
        Self {
            jobs: vec![job],
            primary: 0,
            task: None,
        }
    }
}

impl Service {
    /// Stores an on-demand runner profile
    pub async fn put_ondemand_runner_config(
        &self,
        config: OnDemandRunnerConfig,
    ) -> Result<OnDemandRunnerConfig> {
        if config.oci_url.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "on-demand runner profile needs an OCI image".to_string(),
            ));
        }
        if config.plugin_type.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "on-demand runner profile needs a plugin type".to_string(),
            ));
        }

        let config = self.store.ondemand_runner_config_put(config).await?;
        tracing::info!(profile = %config.name, id = %config.id, "On-demand runner profile stored");
        Ok(config)
    }

    /// The profile a queue request should run under, if any. A request
    /// naming no profile falls back to the default profiles when it targets
    /// any runner; several defaults are chosen between at random.
    pub(crate) async fn resolve_ondemand_profile(
        &self,
        template: &JobTemplate,
    ) -> Result<Option<OnDemandRunnerConfig>> {
        let Some(request) = &template.ondemand_runner else {
            return Ok(None);
        };

        if let Some(name) = &request.profile {
            let profile = self
                .store
                .ondemand_runner_config_get(name)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("on-demand runner profile {name} not found"))
                })?;
            return Ok(Some(profile));
        }

        if !template.target_runner.is_any() {
            return Ok(None);
        }

        let defaults = self.store.ondemand_runner_config_default().await?;
        if defaults.len() > 1 {
            tracing::info!(
                count = defaults.len(),
                "Several default on-demand runner profiles, choosing one at random"
            );
        }
        Ok(choose_default(defaults))
    }

    /// Expands `source` into the start/watch/source/stop graph. The task
    /// record is written before any job so every job can reference it.
    pub(crate) async fn ondemand_wrap(
        &self,
        mut source: Job,
        profile: &OnDemandRunnerConfig,
    ) -> Result<QueuedGraph> {
        let skip = source
            .ondemand_runner_task
            .as_ref()
            .is_some_and(|t| t.skip_operation);
        if skip && !source.operation.is_noop() {
            return Err(ServiceError::InvalidArgument(format!(
                "only noop jobs may skip their operation, got {}",
                source.operation.kind()
            )));
        }

        let task_id = Uuid::new_v4();
        let runner_id = format!("odr-{}", Uuid::new_v4().simple());
        let token = self.auth.issue_login_token(&runner_id);
        let env = self.ondemand_env(&runner_id, &token, profile, &source);

        let params = TaskPluginParams {
            plugin_type: profile.plugin_type.clone(),
            plugin_config: profile.plugin_config.clone(),
        };

        let mut start = self.task_job(
            &source,
            task_id,
            profile,
            Operation::StartTask {
                params: params.clone(),
                info: TaskLaunchInfo {
                    oci_url: profile.oci_url.clone(),
                    environment_variables: env,
                    entrypoint: Vec::new(),
                    arguments: Vec::new(),
                },
            },
        );
        start.expire_time = source.expire_time;

        let mut watch = self.task_job(
            &source,
            task_id,
            profile,
            Operation::WatchTask {
                start_job_id: start.id,
            },
        );
        watch.depends_on = vec![start.id];

        let mut stop = self.task_job(
            &source,
            task_id,
            profile,
            Operation::StopTask {
                params,
                state_job_id: start.id,
            },
        );
        stop.depends_on = vec![start.id, watch.id];
        if !skip {
            stop.depends_on.push(source.id);
        }
        stop.depends_on_allow_failure = stop.depends_on.clone();

        source.target_runner = TargetRunner::id(&runner_id);
        source.depends_on.push(start.id);
        source.task = Some(task_id);
        source.ondemand_runner = Some(profile.id);

        let task = Task {
            id: task_id,
            start_job: start.id,
            task_job: if skip { watch.id } else { source.id },
            watch_job: watch.id,
            stop_job: stop.id,
            runner_id: runner_id.clone(),
            job_state: TaskState::Pending,
            created_at: Utc::now(),
        };

        self.store.task_put(task.clone()).await.map_err(|err| {
            ServiceError::FailedPrecondition(format!("failed to record on-demand runner task: {err}"))
        })?;
        if self.store.task_get(&TaskRef::Id(task_id)).await?.is_none() {
            tracing::error!(%task_id, "Task missing right after it was written, should not happen");
            return Err(ServiceError::Internal(format!(
                "task {task_id} missing after write"
            )));
        }

        tracing::info!(
            %task_id,
            runner_id = %runner_id,
            profile = %profile.name,
            skip,
            "On-demand runner task created"
        );

        let graph = if skip {
            QueuedGraph {
                jobs: vec![start, watch, stop],
                primary: 1,
                task: Some(task),
            }
        } else {
            QueuedGraph {
                jobs: vec![start, watch, source, stop],
                primary: 2,
                task: Some(task),
            }
        };
        Ok(graph)
    }

    /// Removes the task records of a batch whose jobs were never stored
    pub(crate) async fn discard_tasks(&self, tasks: &[Task]) {
        for task in tasks {
            match self.store.task_delete(task.id).await {
                Ok(()) => tracing::debug!(task_id = %task.id, "Discarded task of unqueued jobs"),
                Err(err) => tracing::warn!(task_id = %task.id, error = %err, "Failed to discard task"),
            }
        }
    }

    /// Points task records at the jobs that singleton folding kept in
    /// place of the submitted ones
    pub(crate) async fn remap_tasks(
        &self,
        tasks: Vec<Task>,
        remapped: &HashMap<Uuid, Uuid>,
    ) -> Result<()> {
        for mut task in tasks {
            let mut changed = false;
            for id in [
                &mut task.start_job,
                &mut task.task_job,
                &mut task.watch_job,
                &mut task.stop_job,
            ] {
                if let Some(effective) = remapped.get(&*id) {
                    *id = *effective;
                    changed = true;
                }
            }
            if changed {
                tracing::debug!(task_id = %task.id, "Task jobs folded into existing jobs");
                self.store.task_put(task).await?;
            }
        }
        Ok(())
    }

    /// One of the lifecycle jobs, dispatched to the runners that can launch
    /// on-demand runners of this profile
    fn task_job(
        &self,
        source: &Job,
        task_id: Uuid,
        profile: &OnDemandRunnerConfig,
        operation: Operation,
    ) -> Job {
        let mut job = Job::new(source.application.clone(), source.workspace.clone(), operation);
        job.target_runner = profile.target_runner.clone();
        job.data_source = source.data_source.clone();
        job.task = Some(task_id);
        job.ondemand_runner = Some(profile.id);
        job
    }

    /// Server connection settings first, then the profile, then the
    /// job's own overrides
    fn ondemand_env(
        &self,
        runner_id: &str,
        token: &str,
        profile: &OnDemandRunnerConfig,
        source: &Job,
    ) -> HashMap<String, String> {
        let mut env = HashMap::from([
            (
                "HARBOR_SERVER_ADDR".to_string(),
                self.config.advertise_addr.clone(),
            ),
            (
                "HARBOR_SERVER_TLS".to_string(),
                self.config.advertise_tls.to_string(),
            ),
            (
                "HARBOR_SERVER_TLS_SKIP_VERIFY".to_string(),
                self.config.advertise_tls_skip_verify.to_string(),
            ),
            ("HARBOR_SERVER_TOKEN".to_string(), token.to_string()),
            ("HARBOR_RUNNER_ID".to_string(), runner_id.to_string()),
        ]);
        env.extend(profile.environment_variables.clone());
        if let Some(task) = &source.ondemand_runner_task {
            env.extend(task.environment_variables.clone());
        }
        env
    }
}

fn choose_default(mut defaults: Vec<OnDemandRunnerConfig>) -> Option<OnDemandRunnerConfig> {
    match defaults.len() {
        0 => None,
        1 => defaults.pop(),
        _ => defaults.choose(&mut rand::thread_rng()).cloned(),
    }
}
