//! Status polling task for the live job.

use super::state::PollReport;
use crate::model::JobId;
use crate::service::GenerationService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A poll result tagged with the job it belongs to.
#[derive(Debug)]
pub(crate) struct PollMessage {
    pub job_id: JobId,
    pub report: PollReport,
}

/// Owning handle for a running poll task. Dropping it aborts the task.
pub(crate) struct PollHandle {
    job_id: JobId,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Start polling `job_id`. The first status call fires one interval after spawning.
    pub(crate) fn spawn(
        service: Arc<dyn GenerationService>,
        job_id: JobId,
        interval: Duration,
        max_polls: Option<u32>,
        tx: UnboundedSender<PollMessage>,
    ) -> Self {
        // Interval panics on a zero period.
        let interval = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(poll_loop(service, job_id.clone(), interval, max_polls, tx));
        Self { job_id, task }
    }

    pub(crate) fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub(crate) fn cancel(self) {
        tracing::debug!(job_id = %self.job_id, "poll task cancelled");
        // Drop aborts.
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_loop(
    service: Arc<dyn GenerationService>,
    job_id: JobId,
    interval: Duration,
    max_polls: Option<u32>,
    tx: UnboundedSender<PollMessage>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut polls = 0u32;

    loop {
        // Budget is checked before each call, so a budget of zero never polls.
        if max_polls.is_some_and(|max| polls >= max) {
            let _ = tx.send(PollMessage {
                job_id,
                report: PollReport::Exhausted { polls },
            });
            return;
        }

        ticker.tick().await;
        polls += 1;

        // The status call is awaited inline, so a slow response delays the next tick
        // instead of overlapping with it.
        let (report, done) = match service.status(&job_id).await {
            Ok(resp) => {
                tracing::debug!(%job_id, poll = polls, status = %resp.status, progress = resp.progress, "poll");
                let terminal = resp.status.is_terminal();
                (PollReport::Status(resp), terminal)
            }
            Err(e) => {
                tracing::warn!(%job_id, poll = polls, error = %e, "poll failed");
                (PollReport::Transport(e), true)
            }
        };

        let sent = tx.send(PollMessage {
            job_id: job_id.clone(),
            report,
        });
        if sent.is_err() || done {
            return;
        }
    }
}
