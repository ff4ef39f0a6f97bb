//! Project and runner configuration management

use harbor_core::domain::config::ConfigVar;
use harbor_core::domain::project::Project;

use super::{Result, Service, ServiceError};

impl Service {
    /// Creates or replaces a project. Enabling a poll schedule makes the
    /// first poll due immediately.
    pub async fn put_project(&self, project: Project) -> Result<Project> {
        validate_project(&project)?;
        self.store.project_put(project.clone()).await?;
        tracing::info!(project = %project.name, polling = project.poll_interval().is_some(), "Project stored");
        Ok(project)
    }

    pub async fn get_project(&self, name: &str) -> Result<Project> {
        self.store
            .project_get(name)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("project {name} not found")))
    }

    /// Upserts runner configuration variables; an empty value deletes one
    pub async fn set_config(&self, vars: Vec<ConfigVar>) -> Result<()> {
        if let Some(var) = vars.iter().find(|v| v.name.trim().is_empty()) {
            return Err(ServiceError::InvalidArgument(format!(
                "config variable name must not be empty (value {:?})",
                var.value
            )));
        }
        let count = vars.len();
        self.store.config_set(vars).await?;
        tracing::info!(count, "Runner config updated");
        Ok(())
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_project(project: &Project) -> Result<()> {
    if project.name.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(
            "Project name cannot be empty".to_string(),
        ));
    }

    let zero_interval = project
        .data_source_poll
        .iter()
        .chain(project.applications.iter().filter_map(|a| a.status_report_poll.as_ref()))
        .any(|poll| poll.enabled && poll.interval.is_zero());
    if zero_interval {
        return Err(ServiceError::InvalidArgument(
            "Poll interval must be greater than 0".to_string(),
        ));
    }

    let polling = project
        .data_source_poll
        .iter()
        .chain(project.applications.iter().filter_map(|a| a.status_report_poll.as_ref()))
        .any(|poll| poll.enabled);
    if polling && project.data_source.is_none() {
        return Err(ServiceError::InvalidArgument(
            "Polling requires a data source".to_string(),
        ));
    }

    let mut names: Vec<&str> = project.applications.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    if names.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(ServiceError::InvalidArgument(
            "Application names must be unique within a project".to_string(),
        ));
    }

    Ok(())
}
