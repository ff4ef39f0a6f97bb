//! Runner-related API endpoints

use crate::HarborClient;
use crate::error::Result;
use harbor_core::domain::runner::Runner;
use harbor_core::dto::runner::{
    AdoptRunnerRequest, RunnerInfo, RunnerTokenRequest, RunnerTokenResponse,
};

impl HarborClient {
    /// Request a runner token
    ///
    /// Blocks until an operator adopts or rejects the runner. The response
    /// carries no token when the client's current token is already valid
    /// for this runner.
    pub async fn runner_token(&self, runner: RunnerInfo) -> Result<RunnerTokenResponse> {
        let response = self
            .post("/runner/token")
            .json(&RunnerTokenRequest { runner })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Adopt (`true`) or reject (`false`) a runner
    pub async fn adopt_runner(&self, runner_id: &str, adopt: bool) -> Result<()> {
        let response = self
            .post(&format!("/runner/{}/adopt", runner_id))
            .json(&AdoptRunnerRequest { adopt })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Forget a runner; it must register again
    pub async fn forget_runner(&self, runner_id: &str) -> Result<()> {
        let response = self.delete(&format!("/runner/{}", runner_id)).send().await?;

        self.handle_empty_response(response).await
    }

    pub async fn get_runner(&self, runner_id: &str) -> Result<Runner> {
        let response = self.get(&format!("/runner/{}", runner_id)).send().await?;

        self.handle_response(response).await
    }

    pub async fn list_runners(&self) -> Result<Vec<Runner>> {
        let response = self.get("/runner/list").send().await?;

        self.handle_response(response).await
    }
}
