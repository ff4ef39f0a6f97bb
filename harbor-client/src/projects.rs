//! Project and configuration API endpoints

use crate::HarborClient;
use crate::error::Result;
use harbor_core::domain::config::ConfigVar;
use harbor_core::domain::ondemand::OnDemandRunnerConfig;
use harbor_core::domain::project::Project;

impl HarborClient {
    /// Create or replace a project
    pub async fn put_project(&self, project: &Project) -> Result<Project> {
        let response = self.put("/project").json(project).send().await?;

        self.handle_response(response).await
    }

    pub async fn get_project(&self, name: &str) -> Result<Project> {
        let response = self.get(&format!("/project/{}", name)).send().await?;

        self.handle_response(response).await
    }

    /// Create or replace an on-demand runner profile. The server assigns an
    /// ID when the profile has none.
    pub async fn put_ondemand_runner_config(
        &self,
        config: &OnDemandRunnerConfig,
    ) -> Result<OnDemandRunnerConfig> {
        let response = self
            .put("/ondemand-runner-config")
            .json(config)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Set runner config variables; an empty value deletes a variable
    pub async fn set_config(&self, vars: &[ConfigVar]) -> Result<()> {
        let response = self.put("/config").json(vars).send().await?;

        self.handle_empty_response(response).await
    }
}
