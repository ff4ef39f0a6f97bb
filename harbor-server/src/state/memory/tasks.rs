use chrono::{DateTime, Utc};
use harbor_core::domain::task::{Task, TaskRef, TaskState};
use uuid::Uuid;

use super::Tables;
use crate::state::{Result, StateError};

impl Tables {
    pub(super) fn put_task(&mut self, task: Task) {
        if let Some(previous) = self.tasks.get(&task.id) {
            for job_id in previous.job_ids() {
                self.task_by_job.remove(&job_id);
            }
        }
        for job_id in task.job_ids() {
            self.task_by_job.insert(job_id, task.id);
        }
        self.tasks.insert(task.id, task);
    }

    pub(super) fn delete_task(&mut self, id: Uuid) -> Result<()> {
        let task = self
            .tasks
            .remove(&id)
            .ok_or_else(|| StateError::not_found("task", id))?;
        for job_id in task.job_ids() {
            if self.task_by_job.get(&job_id) == Some(&id) {
                self.task_by_job.remove(&job_id);
            }
        }
        Ok(())
    }

    fn task_id(&self, task_ref: &TaskRef) -> Option<Uuid> {
        match task_ref {
            TaskRef::Id(id) => self.tasks.contains_key(id).then_some(*id),
            TaskRef::JobId(job_id) => self.task_by_job.get(job_id).copied(),
        }
    }

    pub(super) fn get_task(&self, task_ref: &TaskRef) -> Option<&Task> {
        self.task_id(task_ref).and_then(|id| self.tasks.get(&id))
    }

    pub(super) fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub(super) fn cancel_task(&mut self, task_ref: &TaskRef, now: DateTime<Utc>) -> Result<()> {
        let task = self
            .get_task(task_ref)
            .cloned()
            .ok_or_else(|| StateError::not_found("task", task_ref_id(task_ref)))?;
        for job_id in task.job_ids() {
            if self.jobs.contains_key(&job_id) {
                self.cancel_job(job_id, false, now)?;
            }
        }
        Ok(())
    }

    pub(super) fn update_task_state(&mut self, task_ref: &TaskRef, state: TaskState) -> Result<()> {
        let id = self
            .task_id(task_ref)
            .ok_or_else(|| StateError::not_found("task", task_ref_id(task_ref)))?;
        if let Some(task) = self.tasks.get_mut(&id) {
            task.job_state = state;
        }
        Ok(())
    }
}

fn task_ref_id(task_ref: &TaskRef) -> Uuid {
    match task_ref {
        TaskRef::Id(id) | TaskRef::JobId(id) => *id,
    }
}
