use chrono::{DateTime, Utc};
use harbor_core::domain::config::ConfigVar;
use harbor_core::domain::ondemand::OnDemandRunnerConfig;
use harbor_core::domain::runner::{AdoptionState, Runner};
use uuid::Uuid;

use super::Tables;
use crate::state::{Result, StateError};

impl Tables {
    fn runner_mut(&mut self, id: &str) -> Result<&mut Runner> {
        self.runners
            .get_mut(id)
            .ok_or_else(|| StateError::not_found("runner", id))
    }

    /// A label change sends an undecided or adopted runner back to
    /// `Pending`. Rejection survives relabeling.
    pub(super) fn upsert_runner(&mut self, runner: Runner, now: DateTime<Utc>) -> Runner {
        match self.runners.get_mut(&runner.id) {
            Some(existing) => {
                if existing.labels != runner.labels
                    && existing.adoption_state != AdoptionState::Rejected
                {
                    existing.adoption_state = AdoptionState::Pending;
                }
                existing.labels = runner.labels;
                existing.kind = runner.kind;
                existing.last_seen = now;
                existing.clone()
            }
            None => {
                self.runners.insert(runner.id.clone(), runner.clone());
                runner
            }
        }
    }

    pub(super) fn adopt_runner(&mut self, id: &str, preadopt: bool) -> Result<()> {
        let runner = self.runner_mut(id)?;
        if !preadopt {
            runner.adoption_state = AdoptionState::Adopted;
            return Ok(());
        }
        match runner.adoption_state {
            AdoptionState::Pending => runner.adoption_state = AdoptionState::Preadopted,
            AdoptionState::Preadopted | AdoptionState::Adopted => {}
            AdoptionState::Rejected => {
                return Err(StateError::InvalidState(format!(
                    "runner {id} was rejected"
                )));
            }
        }
        Ok(())
    }

    pub(super) fn reject_runner(&mut self, id: &str) -> Result<()> {
        self.runner_mut(id)?.adoption_state = AdoptionState::Rejected;
        Ok(())
    }

    pub(super) fn set_runner_online(&mut self, id: &str, online: bool, now: DateTime<Utc>) -> Result<()> {
        let runner = self.runner_mut(id)?;
        runner.online = online;
        runner.last_seen = now;
        Ok(())
    }

    pub(super) fn list_runners(&self) -> Vec<Runner> {
        let mut runners: Vec<Runner> = self.runners.values().cloned().collect();
        runners.sort_by(|a, b| a.id.cmp(&b.id));
        runners
    }

    // =========================================================================
    // On-demand runner profiles
    // =========================================================================

    pub(super) fn put_ondemand_config(
        &mut self,
        mut config: OnDemandRunnerConfig,
    ) -> Result<OnDemandRunnerConfig> {
        if config.name.is_empty() {
            return Err(StateError::InvalidArgument(
                "on-demand runner profile needs a name".to_string(),
            ));
        }
        if config.id.is_nil() {
            config.id = Uuid::new_v4();
        }
        if self
            .ondemand_configs
            .values()
            .any(|c| c.name == config.name && c.id != config.id)
        {
            return Err(StateError::AlreadyExists {
                kind: "on-demand runner profile",
                id: config.name,
            });
        }
        self.ondemand_configs.insert(config.id, config.clone());
        Ok(config)
    }

    pub(super) fn get_ondemand_config(&self, id_or_name: &str) -> Option<&OnDemandRunnerConfig> {
        if let Ok(id) = Uuid::parse_str(id_or_name) {
            if let Some(config) = self.ondemand_configs.get(&id) {
                return Some(config);
            }
        }
        self.ondemand_configs.values().find(|c| c.name == id_or_name)
    }

    pub(super) fn default_ondemand_configs(&self) -> Vec<OnDemandRunnerConfig> {
        let mut defaults: Vec<OnDemandRunnerConfig> = self
            .ondemand_configs
            .values()
            .filter(|c| c.default)
            .cloned()
            .collect();
        defaults.sort_by(|a, b| a.name.cmp(&b.name));
        defaults
    }

    // =========================================================================
    // Runner config variables
    // =========================================================================

    pub(super) fn set_config_vars(&mut self, vars: Vec<ConfigVar>) {
        for var in vars {
            self.config_vars
                .retain(|v| !(v.name == var.name && v.target == var.target));
            if !var.value.is_empty() {
                self.config_vars.push(var);
            }
        }
    }

    pub(super) fn config_vars_for(&self, runner: &Runner) -> Vec<ConfigVar> {
        let mut vars: Vec<ConfigVar> = self
            .config_vars
            .iter()
            .filter(|v| v.target.as_ref().is_none_or(|t| t.matches(runner)))
            .cloned()
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        vars
    }
}
