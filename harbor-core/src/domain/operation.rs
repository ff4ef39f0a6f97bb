//! Job operations
//!
//! The closed set of work a job can carry. Runners match on the variant to
//! pick an executor; the server only inspects it for validation, singleton
//! keys and on-demand runner wrapping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The operation a job performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Noop,
    Build {
        #[serde(default)]
        disable_push: bool,
    },
    Push {
        #[serde(default)]
        artifact_id: Option<String>,
    },
    Deploy {
        #[serde(default)]
        artifact_id: Option<String>,
    },
    Release {
        #[serde(default)]
        deployment_id: Option<String>,
        #[serde(default)]
        prune: bool,
    },
    Destroy {
        #[serde(default)]
        deployment_id: Option<String>,
    },
    Up,
    Init,
    Validate,
    Auth,
    Docs,
    ConfigSync,
    Poll,
    StatusReport {
        #[serde(default)]
        deployment_id: Option<String>,
        #[serde(default)]
        release_id: Option<String>,
    },
    Exec {
        instance_id: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Logs {
        #[serde(default)]
        deployment_id: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
    },
    StartTask {
        params: TaskPluginParams,
        info: TaskLaunchInfo,
    },
    StopTask {
        params: TaskPluginParams,
        /// The start job whose recorded state identifies what to tear down
        state_job_id: Uuid,
    },
    WatchTask {
        start_job_id: Uuid,
    },
    PipelineStep {
        pipeline: String,
        step: String,
    },
}

impl Operation {
    /// Short, stable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Noop => "noop",
            Operation::Build { .. } => "build",
            Operation::Push { .. } => "push",
            Operation::Deploy { .. } => "deploy",
            Operation::Release { .. } => "release",
            Operation::Destroy { .. } => "destroy",
            Operation::Up => "up",
            Operation::Init => "init",
            Operation::Validate => "validate",
            Operation::Auth => "auth",
            Operation::Docs => "docs",
            Operation::ConfigSync => "config_sync",
            Operation::Poll => "poll",
            Operation::StatusReport { .. } => "status_report",
            Operation::Exec { .. } => "exec",
            Operation::Logs { .. } => "logs",
            Operation::StartTask { .. } => "start_task",
            Operation::StopTask { .. } => "stop_task",
            Operation::WatchTask { .. } => "watch_task",
            Operation::PipelineStep { .. } => "pipeline_step",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Operation::Noop)
    }

    /// Task lifecycle operations are synthesized by the server and never
    /// accepted directly from a queue request.
    pub fn is_task_lifecycle(&self) -> bool {
        matches!(
            self,
            Operation::StartTask { .. } | Operation::StopTask { .. } | Operation::WatchTask { .. }
        )
    }
}

/// Plugin that launches and stops on-demand runner processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPluginParams {
    pub plugin_type: String,
    #[serde(default)]
    pub plugin_config: serde_json::Value,
}

/// What the task plugin should launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLaunchInfo {
    pub oci_url: String,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_tagged_serialization() {
        let op = Operation::Release {
            deployment_id: Some("d1".to_string()),
            prune: true,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "release");
        assert_eq!(json["prune"], true);

        let parsed: Operation = serde_json::from_str(r#"{"kind":"noop"}"#).unwrap();
        assert!(parsed.is_noop());
    }

    #[test]
    fn test_task_lifecycle_detection() {
        let op = Operation::WatchTask {
            start_job_id: Uuid::new_v4(),
        };
        assert!(op.is_task_lifecycle());
        assert!(!Operation::Build { disable_push: false }.is_task_lifecycle());
        assert_eq!(op.kind(), "watch_task");
    }
}
