//! Job stream relay
//!
//! Follows one job for a client: an `Open` frame, state transitions, the
//! resolved data source ref, job changes and terminal output, then exactly
//! one `Complete`. Works whether the client attaches before, during or
//! after execution.

use std::time::Duration;

use harbor_core::domain::job::{Job, JobState};
use harbor_core::domain::log::LogEntry;
use harbor_core::dto::job::JobStreamEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{Result, Service, ServiceError};
use crate::logstream::LogReader;
use crate::state::WatchSet;

/// How long output still arriving after completion is waited for
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

impl Service {
    pub async fn get_job_stream(&self, job_id: Uuid, tx: mpsc::Sender<JobStreamEvent>) -> Result<()> {
        self.get_job(job_id).await?;
        send(&tx, JobStreamEvent::Open).await?;

        let mut last_state: Option<JobState> = None;
        let mut last_job: Option<Job> = None;
        let mut download_sent = false;
        let mut reader: Option<Box<dyn LogReader>> = None;
        let mut reader_done = false;

        loop {
            let mut ws = WatchSet::new();
            let Some(job) = self.store.job_by_id(job_id, Some(&mut ws)).await? else {
                tracing::error!(%job_id, "Job disappeared while streaming, should not happen");
                return Err(ServiceError::Internal(format!("job {job_id} disappeared")));
            };

            if last_state != Some(job.state) {
                send(
                    &tx,
                    JobStreamEvent::State {
                        previous: last_state,
                        current: job.state,
                        job: Box::new(job.clone()),
                        canceling: job.is_canceled(),
                    },
                )
                .await?;
                last_state = Some(job.state);
            } else if last_job.as_ref() != Some(&job) {
                send(
                    &tx,
                    JobStreamEvent::Job {
                        job: Box::new(job.clone()),
                    },
                )
                .await?;
            }

            if !download_sent {
                if let Some(data_source_ref) = &job.data_source_ref {
                    send(
                        &tx,
                        JobStreamEvent::Download {
                            data_source_ref: data_source_ref.clone(),
                        },
                    )
                    .await?;
                    download_sent = true;
                }
            }

            if job.is_terminal() {
                match reader.as_mut() {
                    Some(reader) if !reader_done => drain_output(reader.as_mut(), &tx).await?,
                    Some(_) => {}
                    None => {
                        let events = self.logs.read_completed(job_id);
                        if !events.is_empty() {
                            send(&tx, JobStreamEvent::Terminal { events, buffered: true }).await?;
                        }
                    }
                }
                send(
                    &tx,
                    JobStreamEvent::Complete {
                        error: job.error.clone(),
                        result: job.result.clone(),
                    },
                )
                .await?;
                tracing::debug!(%job_id, state = %job.state, "Job stream complete");
                return Ok(());
            }

            if job.state == JobState::Running && reader.is_none() {
                reader = Some(self.logs.start_reader(job_id));
            }
            last_job = Some(job);

            tokio::select! {
                _ = ws.changed() => {}
                // a drained reader keeps waiting: a reattached runner reopens the stream
                batch = next_output(&mut reader) => match batch {
                    Some(events) => {
                        reader_done = false;
                        send(&tx, JobStreamEvent::Terminal { events, buffered: false }).await?;
                    }
                    None => reader_done = true,
                },
                _ = tx.closed() => return Ok(()),
                _ = self.shutdown.cancelled() => {
                    return Err(ServiceError::Unavailable("server shutting down".to_string()));
                }
            }
        }
    }
}

async fn send(tx: &mpsc::Sender<JobStreamEvent>, event: JobStreamEvent) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|_| ServiceError::Aborted("client disconnected".to_string()))
}

async fn next_output(reader: &mut Option<Box<dyn LogReader>>) -> Option<Vec<LogEntry>> {
    match reader {
        Some(reader) => reader.read_stream().await,
        None => std::future::pending().await,
    }
}

/// Relays output the runner flushed around completion
async fn drain_output(reader: &mut dyn LogReader, tx: &mpsc::Sender<JobStreamEvent>) -> Result<()> {
    while let Ok(Some(events)) = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader.read_stream()).await {
        send(tx, JobStreamEvent::Terminal { events, buffered: false }).await?;
    }
    Ok(())
}
