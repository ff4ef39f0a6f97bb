//! Project domain types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::job::DataSource;

/// A project and the applications it contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// Default data source for jobs that do not set one
    #[serde(default)]
    pub data_source: Option<DataSource>,
    /// Periodically queue a poll job for this project
    #[serde(default)]
    pub data_source_poll: Option<PollSettings>,
    #[serde(default)]
    pub applications: Vec<Application>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_source: None,
            data_source_poll: None,
            applications: Vec::new(),
        }
    }

    /// Poll interval when data source polling is enabled
    pub fn poll_interval(&self) -> Option<Duration> {
        self.data_source_poll
            .as_ref()
            .filter(|p| p.enabled)
            .map(|p| p.interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    /// Periodically queue a status report job for this application
    #[serde(default)]
    pub status_report_poll: Option<PollSettings>,
}

impl Application {
    pub fn poll_interval(&self) -> Option<Duration> {
        self.status_report_poll
            .as_ref()
            .filter(|p| p.enabled)
            .map(|p| p.interval)
    }
}

/// Polling schedule, e.g. `{ "enabled": true, "interval": "30s" }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_parsing() {
        let project: Project = serde_json::from_value(serde_json::json!({
            "name": "web",
            "data_source_poll": { "enabled": true, "interval": "15ms" }
        }))
        .unwrap();
        assert_eq!(project.poll_interval(), Some(Duration::from_millis(15)));
    }

    #[test]
    fn test_disabled_poll_has_no_interval() {
        let mut project = Project::new("web");
        project.data_source_poll = Some(PollSettings {
            enabled: false,
            interval: Duration::from_secs(5),
        });
        assert_eq!(project.poll_interval(), None);
    }
}
