use crate::api::{JobService, ServiceError};
use crate::model::{JobEvent, StreamMessage};
use futures::StreamExt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Push channel failures. Never a job failure; only logged.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("could not open log stream: {0}")]
    Open(#[source] ServiceError),

    #[error("log stream broke: {0}")]
    Transport(#[source] ServiceError),

    #[error("log stream ended without a close event")]
    Ended,
}

/// How a stream consumer run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Closed,
    Failed,
    Cancelled,
}

pub(crate) struct StreamParams {
    pub service: Arc<dyn JobService>,
    pub job_id: String,
    pub event_tx: mpsc::UnboundedSender<JobEvent>,
    pub cancel: Arc<AtomicBool>,
}

/// Forward the job's live log lines, in arrival order, until the channel closes or breaks.
pub(crate) async fn run_stream_consumer(params: StreamParams) -> StreamEnd {
    let StreamParams {
        service,
        job_id,
        event_tx,
        cancel,
    } = params;

    let mut lines = match service.stream_log(&job_id).await {
        Ok(s) => s,
        Err(e) => return report_failure(&event_tx, &job_id, StreamError::Open(e)),
    };
    debug!(job_id = %job_id, "log stream opened");

    let mut forwarded = 0u64;
    loop {
        let next = lines.next().await;
        // A line that lands after the run was halted is dropped with the channel.
        if cancel.load(Ordering::Relaxed) {
            debug!(job_id = %job_id, forwarded, "log stream released after cancel");
            return StreamEnd::Cancelled;
        }
        match next {
            Some(Ok(StreamMessage::Line(line))) => {
                forwarded += 1;
                if event_tx.send(JobEvent::StreamLine(line)).is_err() {
                    return StreamEnd::Cancelled;
                }
            }
            Some(Ok(StreamMessage::Close)) => {
                debug!(job_id = %job_id, forwarded, "log stream closed by service");
                let _ = event_tx.send(JobEvent::StreamClosed);
                return StreamEnd::Closed;
            }
            Some(Err(e)) => {
                return report_failure(&event_tx, &job_id, StreamError::Transport(e));
            }
            None => return report_failure(&event_tx, &job_id, StreamError::Ended),
        }
    }
}

fn report_failure(
    event_tx: &mpsc::UnboundedSender<JobEvent>,
    job_id: &str,
    err: StreamError,
) -> StreamEnd {
    debug!(job_id = %job_id, error = %err, "log stream released");
    let _ = event_tx.send(JobEvent::StreamFailed {
        message: err.to_string(),
    });
    StreamEnd::Failed
}
