//! Runner domain model
//!
//! Represents a runner process that receives job assignments from the server.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A runner known to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    /// Unique identifier chosen by the runner
    pub id: String,

    /// Labels used for job targeting
    #[serde(default)]
    pub labels: HashMap<String, String>,

    pub kind: RunnerKind,

    /// Authorization state decided by an operator (or self-assigned on config)
    pub adoption_state: AdoptionState,

    /// Whether the runner currently holds an open config stream
    pub online: bool,

    /// When this runner first contacted the server
    pub first_seen: DateTime<Utc>,

    /// Last time the runner connected
    pub last_seen: DateTime<Utc>,
}

impl Runner {
    /// A never-before-seen runner awaiting an adoption decision
    pub fn new(id: impl Into<String>, labels: HashMap<String, String>, kind: RunnerKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            labels,
            kind,
            adoption_state: AdoptionState::Pending,
            online: false,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Whether this runner may be handed work
    pub fn can_receive_work(&self) -> bool {
        matches!(
            self.adoption_state,
            AdoptionState::Preadopted | AdoptionState::Adopted
        )
    }
}

/// How a runner was started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerKind {
    /// Long-lived runner started by an operator
    Remote,
    /// Runner embedded in a client invocation
    Local,
    /// Ephemeral runner launched from an on-demand runner profile
    Odr { profile_id: Uuid },
}

impl RunnerKind {
    pub fn is_ondemand(&self) -> bool {
        matches!(self, RunnerKind::Odr { .. })
    }
}

/// Adoption state of a runner
///
/// `Pending` runners wait for an operator; `Preadopted` runners authorized
/// themselves with a valid token. `Rejected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdoptionState {
    Pending,
    Preadopted,
    Adopted,
    Rejected,
}

impl std::fmt::Display for AdoptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdoptionState::Pending => write!(f, "Pending"),
            AdoptionState::Preadopted => write!(f, "Preadopted"),
            AdoptionState::Adopted => write!(f, "Adopted"),
            AdoptionState::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Which runner(s) a job may be assigned to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetRunner {
    #[default]
    Any,
    Id {
        id: String,
    },
    Labels {
        labels: HashMap<String, String>,
    },
}

impl TargetRunner {
    pub fn id(id: impl Into<String>) -> Self {
        TargetRunner::Id { id: id.into() }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TargetRunner::Any)
    }

    /// Whether the target selects the given runner. Labels match when every
    /// requested label is present on the runner with the same value.
    pub fn matches(&self, runner: &Runner) -> bool {
        match self {
            TargetRunner::Any => true,
            TargetRunner::Id { id } => *id == runner.id,
            TargetRunner::Labels { labels } => labels
                .iter()
                .all(|(k, v)| runner.labels.get(k).is_some_and(|rv| rv == v)),
        }
    }
}
