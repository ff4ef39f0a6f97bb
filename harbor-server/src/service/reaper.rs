//! Job reaper
//!
//! Periodically errors jobs that expired before a runner took them and
//! running jobs whose runner stopped sending heartbeats.

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use super::{Result, Service};

impl Service {
    pub(crate) async fn reap_loop(&self) {
        let mut interval = tokio::time::interval(self.config.reaper_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(err) = self.reap_once().await {
                tracing::warn!(error = %err, "Job reap failed");
            }
        }

        tracing::debug!("Job reaper stopped");
    }

    pub(crate) async fn reap_once(&self) -> Result<usize> {
        let reaped = self
            .store
            .job_reap(Utc::now(), self.config.heartbeat_timeout)
            .await?;

        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), jobs = ?reaped, "Reaped expired jobs");
        }
        for job_id in &reaped {
            self.record_task_progress_by_id(*job_id).await;
        }

        Ok(reaped.len())
    }
}
