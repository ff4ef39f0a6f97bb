//! Runner job stream
//!
//! One stream per runner connection carries exactly one job:
//!
//! 1. the runner asks for work (or to reattach to a job it already acked)
//! 2. the server blocks until a job is assigned and sends it
//! 3. the runner acks or errors; anything else nacks the job
//! 4. the runner streams progress until it completes or errors the job,
//!    while the server relays cancellation requests
//!
//! A nack requeues a freshly assigned job. A reattached job is already
//! committed, so a nack force-cancels it instead.

use harbor_core::domain::job::{Job, JobState};
use harbor_core::domain::log::LogEntry;
use harbor_core::domain::runner::{AdoptionState, Runner};
use harbor_core::dto::runner::{RunnerJobStreamRequest, RunnerJobStreamResponse};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use super::{Result, Service, ServiceError};
use crate::auth::Token;
use crate::logstream::LogWriter;
use crate::state::WatchSet;

type Requests = mpsc::UnboundedReceiver<RunnerJobStreamRequest>;
type Responses = mpsc::Sender<RunnerJobStreamResponse>;

enum Flow {
    Continue,
    Done,
}

impl Service {
    pub async fn runner_job_stream(
        &self,
        token: Option<Token>,
        mut rx: Requests,
        tx: Responses,
    ) -> Result<()> {
        let first = rx.recv().await.ok_or_else(|| {
            ServiceError::Aborted("job stream closed before a request was sent".to_string())
        })?;
        let RunnerJobStreamRequest::Request {
            runner_id,
            reattach_job_id,
        } = first
        else {
            return Err(ServiceError::FailedPrecondition(format!(
                "first job stream frame must be a request, got {}",
                first.kind()
            )));
        };

        let runner = self
            .store
            .runner_by_id(&runner_id, None)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("runner {runner_id} not found")))?;
        authorize_job_stream(token.as_ref(), &runner)?;
        check_adopted(&runner)?;

        let span = tracing::info_span!("runner_job_stream", runner_id = %runner.id);
        async move {
            match reattach_job_id {
                Some(job_id) => {
                    let job = self.reattach_job(&runner, job_id).await?;
                    self.run_assigned_job(job, true, &mut rx, &tx).await
                }
                None => {
                    let job = self.assign_job(&runner, &mut rx).await?;
                    self.run_assigned_job(job, false, &mut rx, &tx).await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Blocks until a job is assigned to the runner or the runner goes away
    async fn assign_job(&self, runner: &Runner, rx: &mut Requests) -> Result<Job> {
        let cancel = self.shutdown.child_token();
        tracing::debug!("Waiting for a job assignment");

        let job = tokio::select! {
            result = self.store.job_assign_for_runner(runner, &cancel) => result?,
            _ = wait_disconnected(rx) => {
                return Err(ServiceError::Aborted("runner disconnected before assignment".to_string()));
            }
        };

        // the runner may have been rejected while it was waiting
        let current = self.store.runner_by_id(&runner.id, None).await?;
        if let Err(err) = current.as_ref().map_or_else(
            || Err(ServiceError::Aborted(format!("runner {} was forgotten", runner.id))),
            check_adopted,
        ) {
            tracing::warn!(job_id = %job.id, "Runner lost adoption during assignment, requeueing job");
            self.store.job_ack(job.id, false).await?;
            return Err(err);
        }

        tracing::info!(job_id = %job.id, operation = job.operation.kind(), "Job assigned");
        Ok(job)
    }

    async fn reattach_job(&self, runner: &Runner, job_id: Uuid) -> Result<Job> {
        let job = self.get_job(job_id).await?;
        if job.assigned_runner.as_deref() != Some(runner.id.as_str()) {
            tracing::warn!(%job_id, "Reattach to a job assigned elsewhere");
            return Err(ServiceError::FailedPrecondition(format!(
                "job {job_id} is not assigned to runner {}",
                runner.id
            )));
        }
        if job.state != JobState::Running {
            return Err(ServiceError::FailedPrecondition(format!(
                "job {job_id} is {}, only running jobs can be reattached",
                job.state
            )));
        }
        tracing::info!(%job_id, "Runner reattached to job");
        Ok(job)
    }

    async fn run_assigned_job(
        &self,
        job: Job,
        reattach: bool,
        rx: &mut Requests,
        tx: &Responses,
    ) -> Result<()> {
        let job_id = job.id;

        if tx
            .send(RunnerJobStreamResponse::Assignment {
                job: Box::new(job.clone()),
            })
            .await
            .is_err()
        {
            self.nack(job_id, reattach).await;
            return Err(ServiceError::Aborted(
                "runner disconnected before the assignment was sent".to_string(),
            ));
        }

        let reply = tokio::select! {
            msg = rx.recv() => msg,
            _ = self.shutdown.cancelled() => None,
        };
        match reply {
            Some(RunnerJobStreamRequest::Ack) => {}
            Some(RunnerJobStreamRequest::Error { error }) => {
                tracing::warn!(%job_id, error = %error, "Runner refused job");
                self.nack(job_id, reattach).await;
                return Ok(());
            }
            Some(other) => {
                tracing::warn!(%job_id, frame = other.kind(), "Expected ack");
                self.nack(job_id, reattach).await;
                return Err(ServiceError::FailedPrecondition(format!(
                    "expected ack or error, got {}",
                    other.kind()
                )));
            }
            None => {
                tracing::info!(%job_id, "Runner went away before acking");
                self.nack(job_id, reattach).await;
                return Err(ServiceError::Aborted("runner disconnected before ack".to_string()));
            }
        }

        if !reattach {
            self.store.job_ack(job_id, true).await?;
            tracing::info!(%job_id, "Job acked");
        }

        let mut writer = match self.logs.start_writer(job_id) {
            Ok(writer) => Some(writer),
            Err(err) => {
                tracing::warn!(%job_id, error = %err, "Job output will not be recorded");
                None
            }
        };

        let outcome = self.follow_job(job_id, rx, tx, &mut writer).await;

        // keep what the runner already sent
        while let Ok(msg) = rx.try_recv() {
            if let RunnerJobStreamRequest::Terminal { events } = msg {
                write_events(&mut writer, events);
            }
        }
        if let Some(mut writer) = writer {
            if let Err(err) = writer.close() {
                tracing::warn!(%job_id, error = %err, "Failed to close job output");
            }
        }

        self.record_task_progress_by_id(job_id).await;
        outcome
    }

    /// Relays cancellation to the runner and applies its events until the
    /// job reaches a terminal event
    async fn follow_job(
        &self,
        job_id: Uuid,
        rx: &mut Requests,
        tx: &Responses,
        writer: &mut Option<Box<dyn LogWriter>>,
    ) -> Result<()> {
        let mut cancel_sent: Option<bool> = None;

        loop {
            let mut ws = WatchSet::new();
            let Some(job) = self.store.job_by_id(job_id, Some(&mut ws)).await? else {
                tracing::error!(%job_id, "Job disappeared while running, should not happen");
                return Err(ServiceError::Internal(format!("job {job_id} disappeared")));
            };

            if job.is_canceled() || job.is_terminal() {
                let force = job.state == JobState::Error;
                if cancel_sent != Some(force) {
                    tracing::info!(%job_id, force, "Relaying cancel to runner");
                    tx.send(RunnerJobStreamResponse::Cancel { force })
                        .await
                        .map_err(|_| ServiceError::Aborted("runner disconnected".to_string()))?;
                    cancel_sent = Some(force);
                }
            }

            tokio::select! {
                _ = ws.changed() => {}
                _ = self.shutdown.cancelled() => {
                    return Err(ServiceError::Unavailable("server shutting down".to_string()));
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        tracing::info!(%job_id, "Runner disconnected, job stays running until it reattaches or times out");
                        return Err(ServiceError::Aborted("runner disconnected".to_string()));
                    };
                    if let Flow::Done = self.handle_job_event(job_id, msg, writer).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_job_event(
        &self,
        job_id: Uuid,
        msg: RunnerJobStreamRequest,
        writer: &mut Option<Box<dyn LogWriter>>,
    ) -> Result<Flow> {
        tracing::debug!(%job_id, frame = msg.kind(), "Job event");

        match msg {
            RunnerJobStreamRequest::Heartbeat => {
                if let Err(err) = self.store.job_heartbeat(job_id).await {
                    tracing::debug!(%job_id, error = %err, "Heartbeat ignored");
                }
            }
            RunnerJobStreamRequest::Download { data_source_ref } => {
                self.store.job_update_ref(job_id, data_source_ref).await?;
            }
            RunnerJobStreamRequest::ConfigLoad { config } => {
                self.store
                    .job_update(job_id, Box::new(move |job: &mut Job| job.config = Some(config)))
                    .await?;
            }
            RunnerJobStreamRequest::VariableValuesSet { final_values } => {
                self.store
                    .job_update(
                        job_id,
                        Box::new(move |job: &mut Job| job.variable_final_values = final_values),
                    )
                    .await?;
            }
            RunnerJobStreamRequest::Terminal { events } => {
                write_events(writer, events);
            }
            RunnerJobStreamRequest::Complete { result } => {
                match self.store.job_complete(job_id, result, None).await {
                    Ok(job) => tracing::info!(%job_id, state = %job.state, "Job completed"),
                    Err(err) => tracing::warn!(%job_id, error = %err, "Completion not recorded"),
                }
                return Ok(Flow::Done);
            }
            RunnerJobStreamRequest::Error { error } => {
                match self.store.job_complete(job_id, None, Some(error)).await {
                    Ok(job) => tracing::info!(%job_id, state = %job.state, "Job failed"),
                    Err(err) => tracing::warn!(%job_id, error = %err, "Failure not recorded"),
                }
                return Ok(Flow::Done);
            }
            RunnerJobStreamRequest::Request { .. } | RunnerJobStreamRequest::Ack => {
                tracing::warn!(%job_id, "Unexpected frame on a running job stream");
            }
        }

        Ok(Flow::Continue)
    }

    /// Requeues a fresh assignment; force-cancels a reattached job
    async fn nack(&self, job_id: Uuid, reattach: bool) {
        let result = if reattach {
            self.store.job_cancel(job_id, true).await.map(|_| ())
        } else {
            self.store.job_ack(job_id, false).await.map(|_| ())
        };
        match result {
            Ok(()) => tracing::info!(%job_id, reattach, "Job nacked"),
            Err(err) => tracing::warn!(%job_id, error = %err, "Failed to nack job"),
        }
    }
}

fn write_events(writer: &mut Option<Box<dyn LogWriter>>, events: Vec<LogEntry>) {
    let Some(writer) = writer.as_mut() else {
        return;
    };
    for event in events {
        writer.new_event(event);
    }
    if let Err(err) = writer.flush() {
        tracing::warn!(error = %err, "Failed to flush job output");
    }
}

/// Resolves once the runner closed its side of the stream. Frames sent
/// before an assignment are dropped.
async fn wait_disconnected(rx: &mut Requests) {
    while let Some(msg) = rx.recv().await {
        tracing::debug!(frame = msg.kind(), "Ignoring frame sent before assignment");
    }
}

fn authorize_job_stream(token: Option<&Token>, runner: &Runner) -> Result<()> {
    match token {
        Some(token) if token.is_login() => Ok(()),
        Some(token) if token.authorizes_runner(&runner.id, &runner.labels) => Ok(()),
        Some(_) => {
            tracing::warn!(runner_id = %runner.id, "Token does not authorize runner");
            Err(ServiceError::PermissionDenied(
                "token does not authorize this runner".to_string(),
            ))
        }
        None => Err(ServiceError::Unauthenticated(
            "runner token required".to_string(),
        )),
    }
}

fn check_adopted(runner: &Runner) -> Result<()> {
    match runner.adoption_state {
        AdoptionState::Rejected => {
            tracing::warn!(runner_id = %runner.id, "Rejected runner asked for work");
            Err(ServiceError::PermissionDenied(format!(
                "runner {} was rejected",
                runner.id
            )))
        }
        _ if !runner.can_receive_work() => Err(ServiceError::PermissionDenied(format!(
            "runner {} is not adopted",
            runner.id
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::label_hash;
    use crate::service::testing::service_with_project;
    use harbor_core::domain::job::ApplicationRef;
    use harbor_core::domain::log::LogLevel;
    use harbor_core::domain::operation::Operation;
    use harbor_core::domain::runner::RunnerKind;
    use harbor_core::domain::status::{ErrorCode, ErrorStatus};
    use harbor_core::dto::job::{JobTemplate, QueueJobRequest};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    struct RunnerConn {
        tx: mpsc::UnboundedSender<RunnerJobStreamRequest>,
        rx: mpsc::Receiver<RunnerJobStreamResponse>,
        handle: JoinHandle<Result<()>>,
    }

    impl RunnerConn {
        async fn next(&mut self) -> RunnerJobStreamResponse {
            tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
                .await
                .expect("no frame from server")
                .expect("stream closed")
        }

        async fn assignment(&mut self) -> Job {
            match self.next().await {
                RunnerJobStreamResponse::Assignment { job } => *job,
                other => panic!("expected assignment, got {other:?}"),
            }
        }

        fn send(&self, msg: RunnerJobStreamRequest) {
            self.tx.send(msg).unwrap();
        }

        async fn finish(self) -> Result<()> {
            drop(self.tx);
            tokio::time::timeout(Duration::from_secs(1), self.handle)
                .await
                .expect("stream did not end")
                .unwrap()
        }
    }

    async fn adopted_runner(service: &Service, id: &str) -> Token {
        let labels = HashMap::from([("os".to_string(), "linux".to_string())]);
        service
            .store
            .runner_create(Runner::new(id, labels.clone(), RunnerKind::Remote))
            .await
            .unwrap();
        service.adopt_runner(id, true).await.unwrap();
        let raw = service
            .authority()
            .issue_runner_token(Some(id), label_hash(&labels));
        service.authority().decode(&raw).unwrap()
    }

    fn connect(
        service: &Arc<Service>,
        token: Token,
        runner_id: &str,
        reattach_job_id: Option<Uuid>,
    ) -> RunnerConn {
        let (tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, rx) = mpsc::channel(8);
        tx.send(RunnerJobStreamRequest::Request {
            runner_id: runner_id.to_string(),
            reattach_job_id,
        })
        .unwrap();
        let handle = {
            let service = Arc::clone(service);
            tokio::spawn(async move { service.runner_job_stream(Some(token), req_rx, resp_tx).await })
        };
        RunnerConn { tx, rx, handle }
    }

    async fn queue_up(service: &Service) -> Uuid {
        let template = JobTemplate::new(ApplicationRef::new("proj", "web"), Operation::Up);
        service
            .queue_job(QueueJobRequest::new(template))
            .await
            .unwrap()
            .job_id
    }

    #[tokio::test]
    async fn test_queue_assign_ack_complete() {
        let service = service_with_project("proj").await;
        let job_id = queue_up(&service).await;
        let token = adopted_runner(&service, "r1").await;

        let mut conn = connect(&service, token, "r1", None);
        let job = conn.assignment().await;
        assert_eq!(job.id, job_id);

        conn.send(RunnerJobStreamRequest::Ack);
        conn.send(RunnerJobStreamRequest::Heartbeat);
        conn.send(RunnerJobStreamRequest::Terminal {
            events: vec![LogEntry::now(LogLevel::Info, "deploying")],
        });
        conn.send(RunnerJobStreamRequest::Complete { result: None });
        conn.finish().await.unwrap();

        let job = service.get_job(job_id).await.unwrap();
        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.assigned_runner.as_deref(), Some("r1"));
        assert_eq!(service.logs.read_completed(job_id).len(), 1);
    }

    #[tokio::test]
    async fn test_runner_error_fails_job() {
        let service = service_with_project("proj").await;
        let job_id = queue_up(&service).await;
        let token = adopted_runner(&service, "r1").await;

        let mut conn = connect(&service, token, "r1", None);
        conn.assignment().await;
        conn.send(RunnerJobStreamRequest::Ack);
        conn.send(RunnerJobStreamRequest::Error {
            error: ErrorStatus::new(ErrorCode::Internal, "deploy failed"),
        });
        conn.finish().await.unwrap();

        let job = service.get_job(job_id).await.unwrap();
        assert_eq!(job.state, JobState::Error);
        assert_eq!(job.error.unwrap().message, "deploy failed");
    }

    #[tokio::test]
    async fn test_disconnect_before_ack_requeues() {
        let service = service_with_project("proj").await;
        let job_id = queue_up(&service).await;
        let token = adopted_runner(&service, "r1").await;

        let mut conn = connect(&service, token, "r1", None);
        conn.assignment().await;
        let result = conn.finish().await;
        assert!(matches!(result, Err(ServiceError::Aborted(_))));

        let job = service.get_job(job_id).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.assigned_runner.is_none());
    }

    #[tokio::test]
    async fn test_reattach_nack_force_cancels() {
        let service = service_with_project("proj").await;
        let job_id = queue_up(&service).await;
        let token = adopted_runner(&service, "r1").await;

        let mut first = connect(&service, token.clone(), "r1", None);
        first.assignment().await;
        first.send(RunnerJobStreamRequest::Ack);
        // ack is applied before the stream follows the job
        let mut attempts = 0;
        while service.get_job(job_id).await.unwrap().state != JobState::Running {
            attempts += 1;
            assert!(attempts < 100, "job never started running");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(first.finish().await.is_err());
        assert_eq!(
            service.get_job(job_id).await.unwrap().state,
            JobState::Running
        );

        let mut second = connect(&service, token, "r1", Some(job_id));
        assert_eq!(second.assignment().await.id, job_id);
        second.send(RunnerJobStreamRequest::Error {
            error: ErrorStatus::new(ErrorCode::Aborted, "cannot resume"),
        });
        second.finish().await.unwrap();

        let job = service.get_job(job_id).await.unwrap();
        assert_eq!(job.state, JobState::Error);
        assert!(job.cancel_time.is_some());
    }

    #[tokio::test]
    async fn test_reattach_requires_ownership() {
        let service = service_with_project("proj").await;
        let job_id = queue_up(&service).await;
        let token = adopted_runner(&service, "r2").await;

        let conn = connect(&service, token, "r2", Some(job_id));
        let result = conn.finish().await;
        assert!(matches!(result, Err(ServiceError::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn test_cancel_is_relayed() {
        let service = service_with_project("proj").await;
        let job_id = queue_up(&service).await;
        let token = adopted_runner(&service, "r1").await;

        let mut conn = connect(&service, token, "r1", None);
        conn.assignment().await;
        conn.send(RunnerJobStreamRequest::Ack);
        let mut attempts = 0;
        while service.get_job(job_id).await.unwrap().state != JobState::Running {
            attempts += 1;
            assert!(attempts < 100, "job never started running");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        service.cancel_job(job_id, false).await.unwrap();
        assert_eq!(conn.next().await, RunnerJobStreamResponse::Cancel { force: false });

        service.cancel_job(job_id, true).await.unwrap();
        assert_eq!(conn.next().await, RunnerJobStreamResponse::Cancel { force: true });

        conn.send(RunnerJobStreamRequest::Error {
            error: ErrorStatus::new(ErrorCode::Cancelled, "stopped"),
        });
        conn.finish().await.unwrap();
        assert_eq!(service.get_job(job_id).await.unwrap().state, JobState::Error);
    }

    #[tokio::test]
    async fn test_rejected_runner_never_gets_work() {
        let service = service_with_project("proj").await;
        let job_id = queue_up(&service).await;
        let token = adopted_runner(&service, "r1").await;
        service.adopt_runner("r1", false).await.unwrap();

        let conn = connect(&service, token, "r1", None);
        let result = conn.finish().await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));
        assert_eq!(service.get_job(job_id).await.unwrap().state, JobState::Queued);
    }

    #[tokio::test]
    async fn test_rejection_while_waiting_requeues() {
        let service = service_with_project("proj").await;
        let token = adopted_runner(&service, "r1").await;

        let conn = connect(&service, token, "r1", None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.adopt_runner("r1", false).await.unwrap();
        let job_id = queue_up(&service).await;

        let result = tokio::time::timeout(Duration::from_secs(1), conn.handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));

        let job = service.get_job(job_id).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.assigned_runner.is_none());
    }
}
