mod poller;
mod stream;
mod submit;

pub use poller::PollError;
pub use submit::submit_job;

use crate::api::JobService;
use crate::model::{ClientConfig, JobEvent};
use poller::{run_status_poller, PollVerdict, PollerParams};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use stream::{run_stream_consumer, StreamEnd, StreamParams};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// The two observation channels of one submitted job.
///
/// Both tasks share the job id and a cancel flag, and report through the same event sender,
/// so their callbacks reach the owner strictly one at a time.
pub struct JobChannels {
    job_id: String,
    cancel: Arc<AtomicBool>,
    poller: Option<JoinHandle<PollVerdict>>,
    stream: Option<JoinHandle<StreamEnd>>,
}

impl JobChannels {
    /// Spawn the status poller and, when enabled, the log stream consumer.
    pub fn start(
        service: Arc<dyn JobService>,
        cfg: &ClientConfig,
        job_id: &str,
        event_tx: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));

        let stream = cfg.stream_logs.then(|| {
            tokio::spawn(run_stream_consumer(StreamParams {
                service: service.clone(),
                job_id: job_id.to_string(),
                event_tx: event_tx.clone(),
                cancel: cancel.clone(),
            }))
        });
        let poller = tokio::spawn(run_status_poller(PollerParams {
            service,
            job_id: job_id.to_string(),
            interval: cfg.poll_interval,
            event_tx,
            cancel: cancel.clone(),
        }));
        debug!(job_id, streaming = stream.is_some(), "observation channels started");

        Self {
            job_id: job_id.to_string(),
            cancel,
            poller: Some(poller),
            stream,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Stop observing: no further poll ticks, and the push channel is dropped.
    ///
    /// Does not touch the remote job. Safe to call more than once.
    pub fn halt(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        // Aborting drops the in-flight request and the SSE body; a JoinHandle alone would not.
        if let Some(h) = self.poller.take() {
            h.abort();
        }
        if let Some(h) = self.stream.take() {
            h.abort();
        }
        debug!(job_id = %self.job_id, "observation channels halted");
    }

    pub fn is_halted(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

impl Drop for JobChannels {
    fn drop(&mut self) {
        if !self.is_halted() {
            self.halt();
        }
    }
}
