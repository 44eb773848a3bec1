use crate::api::{JobService, ServiceError};
use crate::model::{JobEvent, JobStatus};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Fallback message when the service marks a job failed without saying why.
const DEFAULT_FAILURE: &str = "optimization failed";

/// Status query could not be completed; terminal for the job.
#[derive(Error, Debug)]
#[error("failed to poll job status")]
pub struct PollError(#[source] pub ServiceError);

/// How a poller run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    Completed,
    Failed,
    Cancelled,
}

/// Parameters for the status polling loop.
pub(crate) struct PollerParams {
    pub service: Arc<dyn JobService>,
    pub job_id: String,
    pub interval: Duration,
    pub event_tx: mpsc::UnboundedSender<JobEvent>,
    pub cancel: Arc<AtomicBool>,
}

/// Query job status every `interval` until the job is terminal or the run is cancelled.
///
/// Emits at most one event, and exactly one unless cancelled: `PollCompleted` or `PollFailed`.
/// The first query happens one interval after start.
pub(crate) async fn run_status_poller(params: PollerParams) -> PollVerdict {
    let PollerParams {
        service,
        job_id,
        interval,
        event_tx,
        cancel,
    } = params;

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    // A slow status call must not be followed by a burst of catch-up queries.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    loop {
        ticker.tick().await;
        if cancel.load(Ordering::Relaxed) {
            debug!(job_id = %job_id, ticks, "poller cancelled");
            return PollVerdict::Cancelled;
        }
        ticks += 1;

        let record = match service.job_status(&job_id).await {
            Ok(r) => r,
            Err(e) => {
                let err = PollError(e);
                warn!(job_id = %job_id, error = %err.0, "{}", err);
                let _ = event_tx.send(JobEvent::PollFailed {
                    message: err.to_string(),
                });
                return PollVerdict::Failed;
            }
        };
        debug!(job_id = %job_id, ticks, status = ?record.status, "status tick");

        match record.status {
            JobStatus::Completed => {
                info!(job_id = %job_id, ticks, "job completed");
                let _ = event_tx.send(JobEvent::PollCompleted {
                    record: Box::new(record),
                });
                return PollVerdict::Completed;
            }
            JobStatus::Failed => {
                let message = record
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
                info!(job_id = %job_id, ticks, error = %message, "job failed");
                let _ = event_tx.send(JobEvent::PollFailed { message });
                return PollVerdict::Failed;
            }
            JobStatus::Pending | JobStatus::Running => {}
        }
    }
}
