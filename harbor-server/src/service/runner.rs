//! Runner Service
//!
//! Registration, adoption and the runner config stream.
//!
//! A runner is unknown until its first `runner_token` or `runner_config`
//! call creates its record. From there an operator adopts or rejects it;
//! the config stream pre-adopts runners that arrive with a valid token.
//! Rejection is final.

use harbor_core::domain::config::ConfigVar;
use harbor_core::domain::runner::{AdoptionState, Runner};
use harbor_core::dto::runner::{
    RunnerConfigRequest, RunnerConfigResponse, RunnerInfo, RunnerTokenRequest, RunnerTokenResponse,
};
use tokio::sync::mpsc;

use super::{Result, Service, ServiceError};
use crate::auth::{Token, TokenKind, label_hash};
use crate::state::{StateError, WatchSet};

impl Service {
    /// Returns a runner token once an operator adopted the runner. Blocks
    /// until a decision is made. A token already valid for this runner and
    /// its labels short-circuits with no new token.
    pub async fn runner_token(
        &self,
        token: Option<&Token>,
        req: RunnerTokenRequest,
    ) -> Result<RunnerTokenResponse> {
        let info = req.runner;
        validate_runner_info(&info)?;

        if let Some(token) = token {
            if token.authorizes_runner(&info.id, &info.labels) {
                tracing::debug!(runner_id = %info.id, "Runner token still valid");
                return Ok(RunnerTokenResponse { token: None });
            }
            if let TokenKind::Runner {
                runner_id: Some(token_runner),
                ..
            } = &token.kind
            {
                if *token_runner != info.id {
                    tracing::warn!(runner_id = %info.id, token_runner = %token_runner, "Runner token issued for another runner");
                    return Err(ServiceError::PermissionDenied(format!(
                        "token does not authorize runner {}",
                        info.id
                    )));
                }
            }
            // a label mismatch falls through: the upsert below resets adoption
        }

        let hash = label_hash(&info.labels);
        self.store
            .runner_create(Runner::new(info.id.clone(), info.labels, info.kind))
            .await?;
        tracing::info!(runner_id = %info.id, "Runner awaiting adoption");

        loop {
            let mut ws = WatchSet::new();
            let runner = self
                .store
                .runner_by_id(&info.id, Some(&mut ws))
                .await?
                .ok_or_else(|| {
                    ServiceError::Aborted(format!(
                        "runner {} was forgotten while awaiting adoption",
                        info.id
                    ))
                })?;

            match runner.adoption_state {
                AdoptionState::Adopted => {
                    let token = self.auth.issue_runner_token(Some(&info.id), hash);
                    tracing::info!(runner_id = %info.id, "Runner token issued");
                    return Ok(RunnerTokenResponse { token: Some(token) });
                }
                AdoptionState::Rejected => {
                    tracing::warn!(runner_id = %info.id, "Rejected runner requested a token");
                    return Err(ServiceError::PermissionDenied(format!(
                        "runner {} was rejected",
                        info.id
                    )));
                }
                AdoptionState::Pending | AdoptionState::Preadopted => {}
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(ServiceError::Cancelled),
                _ = ws.changed() => {}
            }
        }
    }

    /// Operator decision on a runner. Rejection is final for the record.
    pub async fn adopt_runner(&self, id: &str, adopt: bool) -> Result<()> {
        if adopt {
            self.store.runner_adopt(id, false).await?;
            tracing::info!(runner_id = %id, "Runner adopted");
        } else {
            self.store.runner_reject(id).await?;
            tracing::warn!(runner_id = %id, "Runner rejected");
        }
        Ok(())
    }

    /// Deletes the runner record outright
    pub async fn forget_runner(&self, id: &str) -> Result<()> {
        self.store.runner_delete(id).await?;
        tracing::info!(runner_id = %id, "Runner forgotten");
        Ok(())
    }

    pub async fn get_runner(&self, id: &str) -> Result<Runner> {
        self.store
            .runner_by_id(id, None)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("runner {id} not found")))
    }

    pub async fn list_runners(&self) -> Result<Vec<Runner>> {
        Ok(self.store.runner_list().await?)
    }

    /// Config stream of a connected runner. The first frame must open the
    /// stream; after that the runner receives its config variables now and
    /// whenever they change. The runner is online while the stream is open.
    pub async fn runner_config(
        &self,
        token: Option<Token>,
        mut rx: mpsc::UnboundedReceiver<RunnerConfigRequest>,
        tx: mpsc::Sender<RunnerConfigResponse>,
    ) -> Result<()> {
        let RunnerConfigRequest::Open { runner: info } = rx.recv().await.ok_or_else(|| {
            ServiceError::Aborted("config stream closed before it was opened".to_string())
        })?;
        validate_runner_info(&info)?;
        authorize_runner(token.as_ref(), &info)?;

        let runner = self
            .store
            .runner_create(Runner::new(info.id.clone(), info.labels, info.kind))
            .await?;
        if runner.adoption_state == AdoptionState::Rejected {
            tracing::warn!(runner_id = %runner.id, "Rejected runner opened a config stream");
            return Err(rejected(&runner.id));
        }

        match self.store.runner_adopt(&runner.id, true).await {
            Ok(()) => {}
            Err(StateError::InvalidState(_)) => return Err(rejected(&runner.id)),
            Err(err) => return Err(err.into()),
        }
        self.store.runner_online(&runner.id).await?;
        tracing::info!(runner_id = %runner.id, "Runner connected");

        let result = self.runner_config_loop(&runner.id, &mut rx, &tx).await;

        match self.store.runner_offline(&runner.id).await {
            Ok(()) | Err(StateError::NotFound { .. }) => {}
            Err(err) => tracing::warn!(runner_id = %runner.id, error = %err, "Failed to mark runner offline"),
        }
        tracing::info!(runner_id = %runner.id, "Runner disconnected");

        result
    }

    async fn runner_config_loop(
        &self,
        runner_id: &str,
        rx: &mut mpsc::UnboundedReceiver<RunnerConfigRequest>,
        tx: &mpsc::Sender<RunnerConfigResponse>,
    ) -> Result<()> {
        let mut sent: Option<Vec<ConfigVar>> = None;

        loop {
            let mut ws = WatchSet::new();
            let runner = self
                .store
                .runner_by_id(runner_id, Some(&mut ws))
                .await?
                .ok_or_else(|| ServiceError::Aborted(format!("runner {runner_id} was forgotten")))?;
            if runner.adoption_state == AdoptionState::Rejected {
                tracing::warn!(runner_id, "Runner rejected while connected");
                return Err(rejected(runner_id));
            }

            let vars = self.store.config_for_runner(&runner, Some(&mut ws)).await?;
            if sent.as_ref() != Some(&vars) {
                tracing::debug!(runner_id, count = vars.len(), "Sending runner config");
                tx.send(RunnerConfigResponse::Config {
                    config_vars: vars.clone(),
                })
                .await
                .map_err(|_| ServiceError::Aborted("runner disconnected".to_string()))?;
                sent = Some(vars);
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(ServiceError::Unavailable("server shutting down".to_string())),
                _ = ws.changed() => {}
                msg = rx.recv() => match msg {
                    Some(msg) => tracing::debug!(runner_id, ?msg, "Ignoring config stream frame"),
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Runner tokens must match the runner's ID and labels; login tokens may
/// register any runner
fn authorize_runner(token: Option<&Token>, info: &RunnerInfo) -> Result<()> {
    match token {
        Some(token) if token.is_login() => Ok(()),
        Some(token) if token.authorizes_runner(&info.id, &info.labels) => Ok(()),
        Some(token) if token.is_runner() => {
            tracing::warn!(runner_id = %info.id, "Runner token does not match runner ID or labels");
            Err(ServiceError::PermissionDenied(
                "runner token does not match this runner, re-adoption required".to_string(),
            ))
        }
        Some(_) => Err(ServiceError::PermissionDenied(
            "token kind cannot register runners".to_string(),
        )),
        None => Err(ServiceError::Unauthenticated(
            "runner token required".to_string(),
        )),
    }
}

fn rejected(runner_id: &str) -> ServiceError {
    ServiceError::PermissionDenied(format!("runner {runner_id} was rejected"))
}

// =============================================================================
// Validation
// =============================================================================

fn validate_runner_info(info: &RunnerInfo) -> Result<()> {
    if info.id.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(
            "Runner ID cannot be empty".to_string(),
        ));
    }

    if info.id.len() > 255 {
        return Err(ServiceError::InvalidArgument(
            "Runner ID is too long (max 255 characters)".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::service_with_project;
    use harbor_core::domain::runner::{RunnerKind, TargetRunner};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn info(id: &str) -> RunnerInfo {
        RunnerInfo {
            id: id.to_string(),
            labels: HashMap::from([("env".to_string(), "test".to_string())]),
            kind: RunnerKind::Remote,
        }
    }

    fn login() -> Token {
        Token::new(TokenKind::Login {
            user: "operator".to_string(),
        })
    }

    #[tokio::test]
    async fn test_runner_token_waits_for_adoption() {
        let service = service_with_project("proj").await;

        let waiter = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .runner_token(None, RunnerTokenRequest { runner: info("r1") })
                    .await
            })
        };

        // the record shows up once the request is pending
        let mut attempts = 0;
        while service.get_runner("r1").await.is_err() {
            attempts += 1;
            assert!(attempts < 100, "runner never registered");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.adopt_runner("r1", true).await.unwrap();

        let resp = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let raw = resp.token.unwrap();
        let token = service.authority().decode(&raw).unwrap();
        assert!(token.authorizes_runner("r1", &info("r1").labels));

        // presenting the token again needs no new one
        let again = service
            .runner_token(Some(&token), RunnerTokenRequest { runner: info("r1") })
            .await
            .unwrap();
        assert!(again.token.is_none());
    }

    #[tokio::test]
    async fn test_runner_token_rejected() {
        let service = service_with_project("proj").await;
        let waiter = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .runner_token(None, RunnerTokenRequest { runner: info("r1") })
                    .await
            })
        };

        let mut attempts = 0;
        while service.get_runner("r1").await.is_err() {
            attempts += 1;
            assert!(attempts < 100, "runner never registered");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.adopt_runner("r1", false).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_runner_config_preadopts_and_streams_config() {
        let service = service_with_project("proj").await;
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, mut resp_rx) = mpsc::channel(8);

        let stream = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.runner_config(Some(login()), req_rx, resp_tx).await })
        };
        req_tx
            .send(RunnerConfigRequest::Open { runner: info("r1") })
            .unwrap();

        let first = resp_rx.recv().await.unwrap();
        assert_eq!(first, RunnerConfigResponse::Config { config_vars: vec![] });

        let runner = service.get_runner("r1").await.unwrap();
        assert_eq!(runner.adoption_state, AdoptionState::Preadopted);
        assert!(runner.online);

        service
            .set_config(vec![ConfigVar {
                name: "FOO".to_string(),
                value: "bar".to_string(),
                target: Some(TargetRunner::id("r1")),
            }])
            .await
            .unwrap();
        let RunnerConfigResponse::Config { config_vars } =
            tokio::time::timeout(Duration::from_secs(1), resp_rx.recv())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(config_vars.len(), 1);

        drop(req_tx);
        stream.await.unwrap().unwrap();
        assert!(!service.get_runner("r1").await.unwrap().online);
    }

    #[tokio::test]
    async fn test_rejected_runner_cannot_open_config_stream() {
        let service = service_with_project("proj").await;
        service
            .store
            .runner_create(Runner::new("r1", HashMap::new(), RunnerKind::Remote))
            .await
            .unwrap();
        service.adopt_runner("r1", false).await.unwrap();

        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, _resp_rx) = mpsc::channel(8);
        req_tx
            .send(RunnerConfigRequest::Open { runner: info("r1") })
            .unwrap();

        let result = service.runner_config(Some(login()), req_rx, resp_tx).await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_mismatched_runner_token_is_denied() {
        let service = service_with_project("proj").await;
        let raw = service.authority().issue_runner_token(Some("r1"), 42);
        let token = service.authority().decode(&raw).unwrap();

        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, _resp_rx) = mpsc::channel(8);
        req_tx
            .send(RunnerConfigRequest::Open { runner: info("r1") })
            .unwrap();

        let result = service.runner_config(Some(token), req_rx, resp_tx).await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_relabeled_runner_needs_new_adoption() {
        let service = service_with_project("proj").await;
        let prod = HashMap::from([("env".to_string(), "prod".to_string())]);
        service
            .store
            .runner_create(Runner::new("r1", prod, RunnerKind::Remote))
            .await
            .unwrap();
        service.adopt_runner("r1", true).await.unwrap();

        let waiter = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .runner_token(None, RunnerTokenRequest { runner: info("r1") })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "relabeled runner got a token without adoption");
        let runner = service.get_runner("r1").await.unwrap();
        assert_eq!(runner.adoption_state, AdoptionState::Pending);
        assert_eq!(runner.labels, info("r1").labels);

        service.adopt_runner("r1", true).await.unwrap();
        let resp = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let token = service.authority().decode(&resp.token.unwrap()).unwrap();
        assert!(token.authorizes_runner("r1", &info("r1").labels));
    }

    #[tokio::test]
    async fn test_token_for_other_runner_leaves_record_alone() {
        let service = service_with_project("proj").await;
        service
            .store
            .runner_create(Runner::new("r1", info("r1").labels, RunnerKind::Remote))
            .await
            .unwrap();
        service.adopt_runner("r1", false).await.unwrap();

        let raw = service
            .authority()
            .issue_runner_token(Some("r2"), label_hash(&info("r1").labels));
        let token = service.authority().decode(&raw).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            service.runner_token(Some(&token), RunnerTokenRequest { runner: info("r1") }),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));

        let runner = service.get_runner("r1").await.unwrap();
        assert_eq!(runner.adoption_state, AdoptionState::Rejected);
    }

    #[tokio::test]
    async fn test_stale_labels_keep_rejection() {
        let service = service_with_project("proj").await;
        service
            .store
            .runner_create(Runner::new("r1", HashMap::new(), RunnerKind::Remote))
            .await
            .unwrap();
        service.adopt_runner("r1", false).await.unwrap();

        let raw = service
            .authority()
            .issue_runner_token(Some("r1"), label_hash(&HashMap::new()));
        let token = service.authority().decode(&raw).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            service.runner_token(Some(&token), RunnerTokenRequest { runner: info("r1") }),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));
        assert_eq!(
            service.get_runner("r1").await.unwrap().adoption_state,
            AdoptionState::Rejected
        );
    }
}
