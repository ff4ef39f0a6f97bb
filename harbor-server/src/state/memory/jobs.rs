use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use harbor_core::domain::job::{Job, JobResult, JobState};
use harbor_core::domain::runner::{Runner, TargetRunner};
use harbor_core::domain::status::{ErrorCode, ErrorStatus};
use uuid::Uuid;

use super::Tables;
use crate::state::{JobListFilter, Result, StateError};

pub(super) struct JobRecord {
    /// Insertion order, used for FIFO assignment
    pub(super) seq: u64,
    pub(super) job: Job,
}

impl Tables {
    pub(super) fn job(&self, id: Uuid) -> Option<&Job> {
        self.jobs.get(&id).map(|r| &r.job)
    }

    pub(super) fn job_mut(&mut self, id: Uuid) -> Result<&mut Job> {
        self.jobs
            .get_mut(&id)
            .map(|r| &mut r.job)
            .ok_or_else(|| StateError::not_found("job", id))
    }

    pub(super) fn list_jobs(&self, filter: &JobListFilter) -> Vec<Job> {
        let mut records: Vec<&JobRecord> = self
            .jobs
            .values()
            .filter(|r| filter.matches(&r.job))
            .collect();
        records.sort_by_key(|r| r.seq);
        records.into_iter().map(|r| r.job.clone()).collect()
    }

    /// Validates the whole batch before touching any table
    pub(super) fn create_jobs(&mut self, jobs: Vec<Job>) -> Result<Vec<Uuid>> {
        let mut batch_ids = HashSet::new();
        for job in &jobs {
            if self.jobs.contains_key(&job.id) || !batch_ids.insert(job.id) {
                return Err(StateError::AlreadyExists {
                    kind: "job",
                    id: job.id.to_string(),
                });
            }
        }
        for job in &jobs {
            if let Some(missing) = job
                .depends_on
                .iter()
                .find(|dep| !batch_ids.contains(*dep) && !self.jobs.contains_key(*dep))
            {
                return Err(StateError::not_found("job dependency", missing));
            }
        }

        // Maps IDs folded into an existing singleton job onto that job
        let mut remapped: HashMap<Uuid, Uuid> = HashMap::new();
        let mut effective = Vec::with_capacity(jobs.len());

        for mut job in jobs {
            remap_ids(&mut job.depends_on, &remapped);
            remap_ids(&mut job.depends_on_allow_failure, &remapped);
            let incoming_id = job.id;

            let existing = job
                .singleton_id
                .as_deref()
                .and_then(|key| self.active_singleton(key));

            match existing {
                Some(existing_id) => {
                    let Some(record) = self.jobs.get_mut(&existing_id) else {
                        return Err(StateError::not_found("job", existing_id));
                    };
                    if record.job.state == JobState::Queued {
                        job.id = existing_id;
                        job.queue_time = record.job.queue_time;
                        record.job = job;
                    }
                    remapped.insert(incoming_id, existing_id);
                    effective.push(existing_id);
                }
                None => {
                    self.next_seq += 1;
                    self.jobs.insert(
                        incoming_id,
                        JobRecord {
                            seq: self.next_seq,
                            job,
                        },
                    );
                    effective.push(incoming_id);
                }
            }
        }

        Ok(effective)
    }

    fn active_singleton(&self, key: &str) -> Option<Uuid> {
        self.jobs
            .values()
            .find(|r| !r.job.is_terminal() && r.job.singleton_id.as_deref() == Some(key))
            .map(|r| r.job.id)
    }

    /// Errors queued jobs that expired or whose dependency failed, repeating
    /// until no more jobs are affected. Returns the errored IDs.
    pub(super) fn settle_queued(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut settled = Vec::new();
        loop {
            let mut decisions: Vec<(Uuid, ErrorStatus)> = Vec::new();
            for record in self.jobs.values() {
                let job = &record.job;
                if job.state != JobState::Queued {
                    continue;
                }
                if job.expire_time.is_some_and(|at| at <= now) {
                    decisions.push((
                        job.id,
                        ErrorStatus::new(
                            ErrorCode::DeadlineExceeded,
                            "job expired before it was assigned",
                        ),
                    ));
                } else if let Some(dep) = self.failed_dependency(job) {
                    decisions.push((
                        job.id,
                        ErrorStatus::new(
                            ErrorCode::FailedPrecondition,
                            format!("dependency {dep} failed"),
                        ),
                    ));
                }
            }

            if decisions.is_empty() {
                return settled;
            }
            for (id, status) in decisions {
                if let Some(record) = self.jobs.get_mut(&id) {
                    fail_job(&mut record.job, status, now);
                    settled.push(id);
                }
            }
        }
    }

    fn failed_dependency(&self, job: &Job) -> Option<Uuid> {
        job.depends_on.iter().copied().find(|dep| {
            !job.depends_on_allow_failure.contains(dep)
                && self
                    .jobs
                    .get(dep)
                    .is_some_and(|r| r.job.state == JobState::Error)
        })
    }

    fn dependencies_satisfied(&self, job: &Job) -> bool {
        job.depends_on.iter().all(|dep| match self.jobs.get(dep) {
            None => true,
            Some(r) => {
                r.job.state == JobState::Success
                    || (r.job.is_terminal() && job.depends_on_allow_failure.contains(dep))
            }
        })
    }

    /// Picks the oldest assignable job for `runner` and moves it to
    /// `Waiting`. The flag reports whether any job changed.
    pub(super) fn assign(&mut self, runner: &Runner, now: DateTime<Utc>) -> (Option<Job>, bool) {
        let changed = !self.settle_queued(now).is_empty();

        let candidate = self
            .jobs
            .values()
            .filter(|r| r.job.state == JobState::Queued && !r.job.is_canceled())
            .filter(|r| runner_accepts(runner, &r.job))
            .filter(|r| self.dependencies_satisfied(&r.job))
            .min_by_key(|r| r.seq)
            .map(|r| r.job.id);

        let Some(record) = candidate.and_then(|id| self.jobs.get_mut(&id)) else {
            return (None, changed);
        };
        record.job.state = JobState::Waiting;
        record.job.assigned_runner = Some(runner.id.clone());
        (Some(record.job.clone()), true)
    }

    pub(super) fn next_queued_expiry(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .values()
            .filter(|r| r.job.state == JobState::Queued)
            .filter_map(|r| r.job.expire_time)
            .min()
    }

    pub(super) fn ack_job(&mut self, id: Uuid, ack: bool, now: DateTime<Utc>) -> Result<Job> {
        let job = self.job_mut(id)?;
        if job.state != JobState::Waiting {
            return Err(StateError::InvalidState(format!(
                "job {id} is {}, expected Waiting",
                job.state
            )));
        }
        if ack {
            job.state = JobState::Running;
            job.ack_time = Some(now);
            job.heartbeat_time = Some(now);
        } else {
            job.state = JobState::Queued;
            job.assigned_runner = None;
        }
        Ok(job.clone())
    }

    pub(super) fn complete_job(
        &mut self,
        id: Uuid,
        result: Option<JobResult>,
        error: Option<ErrorStatus>,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let job = self.job_mut(id)?;
        if job.state != JobState::Running {
            return Err(StateError::InvalidState(format!(
                "job {id} is {}, expected Running",
                job.state
            )));
        }
        match error {
            Some(error) => fail_job(job, error, now),
            None => {
                job.state = JobState::Success;
                job.result = result;
                job.complete_time = Some(now);
            }
        }
        Ok(job.clone())
    }

    /// Terminal jobs are left untouched. Jobs no runner has acked are
    /// errored at once; running jobs only get errored when forced.
    pub(super) fn cancel_job(&mut self, id: Uuid, force: bool, now: DateTime<Utc>) -> Result<Job> {
        let job = self.job_mut(id)?;
        match job.state {
            JobState::Success | JobState::Error => {}
            JobState::Queued | JobState::Waiting => {
                job.cancel_time.get_or_insert(now);
                fail_job(job, ErrorStatus::new(ErrorCode::Cancelled, "job canceled"), now);
            }
            JobState::Running => {
                job.cancel_time.get_or_insert(now);
                if force {
                    fail_job(
                        job,
                        ErrorStatus::new(ErrorCode::Cancelled, "job force canceled"),
                        now,
                    );
                }
            }
        }
        Ok(job.clone())
    }

    pub(super) fn heartbeat_job(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let job = self.job_mut(id)?;
        if job.state != JobState::Running {
            return Err(StateError::InvalidState(format!(
                "job {id} is {}, heartbeats need Running",
                job.state
            )));
        }
        job.heartbeat_time = Some(now);
        Ok(())
    }

    pub(super) fn reap_jobs(&mut self, now: DateTime<Utc>, heartbeat_timeout: Duration) -> Vec<Uuid> {
        let mut reaped = self.settle_queued(now);
        let timeout = TimeDelta::from_std(heartbeat_timeout).unwrap_or(TimeDelta::MAX);

        for record in self.jobs.values_mut() {
            let job = &mut record.job;
            let status = match job.state {
                JobState::Waiting if job.expire_time.is_some_and(|at| at <= now) => {
                    ErrorStatus::new(ErrorCode::DeadlineExceeded, "job expired before it was acked")
                }
                JobState::Running => {
                    let last_seen = job.heartbeat_time.or(job.ack_time).unwrap_or(job.queue_time);
                    if now.signed_duration_since(last_seen) <= timeout {
                        continue;
                    }
                    ErrorStatus::new(ErrorCode::DeadlineExceeded, "runner heartbeat timed out")
                }
                _ => continue,
            };
            fail_job(job, status, now);
            reaped.push(job.id);
        }

        reaped
    }
}

/// On-demand runners only ever run the jobs addressed to them by ID
fn runner_accepts(runner: &Runner, job: &Job) -> bool {
    if runner.kind.is_ondemand() && !matches!(job.target_runner, TargetRunner::Id { .. }) {
        return false;
    }
    job.target_runner.matches(runner)
}

fn fail_job(job: &mut Job, status: ErrorStatus, now: DateTime<Utc>) {
    job.state = JobState::Error;
    job.error = Some(status);
    job.complete_time = Some(now);
}

fn remap_ids(ids: &mut [Uuid], remapped: &HashMap<Uuid, Uuid>) {
    for id in ids.iter_mut() {
        if let Some(target) = remapped.get(id) {
            *id = *target;
        }
    }
}
