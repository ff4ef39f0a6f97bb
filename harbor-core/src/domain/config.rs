//! Runner configuration variables

use serde::{Deserialize, Serialize};

use super::runner::TargetRunner;

/// A variable streamed to runners over their config stream. Without a
/// target it applies to every runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVar {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub target: Option<TargetRunner>,
}
