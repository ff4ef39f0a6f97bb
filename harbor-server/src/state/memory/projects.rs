use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use harbor_core::domain::job::ApplicationRef;
use harbor_core::domain::project::{Application, Project};

use super::Tables;
use crate::state::{Result, StateError};

pub(super) struct ProjectRecord {
    pub(super) project: Project,
    /// Next data source poll, `None` when polling is off
    pub(super) next_poll: Option<DateTime<Utc>>,
    /// Next status report per application name
    pub(super) app_next_poll: HashMap<String, DateTime<Utc>>,
}

impl Tables {
    /// Newly enabled schedules are due immediately; schedules that were
    /// already running keep their next due time.
    pub(super) fn put_project(&mut self, project: Project, now: DateTime<Utc>) -> Result<()> {
        if project.name.is_empty() {
            return Err(StateError::InvalidArgument(
                "project name must not be empty".to_string(),
            ));
        }

        let previous = self.projects.remove(&project.name);
        let next_poll = project
            .poll_interval()
            .map(|_| previous.as_ref().and_then(|p| p.next_poll).unwrap_or(now));
        let app_next_poll = project
            .applications
            .iter()
            .filter(|app| app.poll_interval().is_some())
            .map(|app| {
                let due = previous
                    .as_ref()
                    .and_then(|p| p.app_next_poll.get(&app.name).copied())
                    .unwrap_or(now);
                (app.name.clone(), due)
            })
            .collect();

        self.projects.insert(
            project.name.clone(),
            ProjectRecord {
                project,
                next_poll,
                app_next_poll,
            },
        );
        Ok(())
    }

    pub(super) fn peek_project_poll(&self) -> Option<(Project, DateTime<Utc>)> {
        self.projects
            .values()
            .filter_map(|r| r.next_poll.map(|due| (r, due)))
            .min_by_key(|(_, due)| *due)
            .map(|(r, due)| (r.project.clone(), due))
    }

    pub(super) fn complete_project_poll(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let record = self
            .projects
            .get_mut(name)
            .ok_or_else(|| StateError::not_found("project", name))?;
        record.next_poll = record
            .project
            .poll_interval()
            .and_then(|interval| next_due(now, interval));
        Ok(())
    }

    pub(super) fn peek_application_poll(&self) -> Option<(Project, Application, DateTime<Utc>)> {
        self.projects
            .values()
            .flat_map(|r| {
                r.project.applications.iter().filter_map(move |app| {
                    r.app_next_poll.get(&app.name).map(|due| (r, app, *due))
                })
            })
            .min_by_key(|(_, _, due)| *due)
            .map(|(r, app, due)| (r.project.clone(), app.clone(), due))
    }

    pub(super) fn complete_application_poll(
        &mut self,
        application: &ApplicationRef,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = self
            .projects
            .get_mut(&application.project)
            .ok_or_else(|| StateError::not_found("project", &application.project))?;
        let interval = record
            .project
            .applications
            .iter()
            .find(|app| app.name == application.application)
            .ok_or_else(|| StateError::not_found("application", &application.application))?
            .poll_interval();

        match interval.and_then(|interval| next_due(now, interval)) {
            Some(due) => {
                record
                    .app_next_poll
                    .insert(application.application.clone(), due);
            }
            None => {
                record.app_next_poll.remove(&application.application);
            }
        }
        Ok(())
    }
}

fn next_due(now: DateTime<Utc>, interval: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}
