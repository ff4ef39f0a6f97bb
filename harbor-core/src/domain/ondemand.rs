//! On-demand runner profiles

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::runner::TargetRunner;

/// Describes how to launch an ephemeral runner for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnDemandRunnerConfig {
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    pub name: String,
    /// Runner that executes the start/watch/stop jobs for this profile
    #[serde(default)]
    pub target_runner: TargetRunner,
    /// Image the launched runner runs
    pub oci_url: String,
    /// Task plugin used to launch it (e.g. "docker", "kubernetes")
    pub plugin_type: String,
    #[serde(default)]
    pub plugin_config: serde_json::Value,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    /// Default profiles are used when a job asks for an on-demand runner
    /// without naming one
    #[serde(default)]
    pub default: bool,
}
