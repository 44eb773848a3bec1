//! Job lifecycle controller.
//!
//! Owns the reconciler for one submission, starts and halts the observation channels, and
//! emits view updates for presentation layers.

use super::reconciler::{JobStateReconciler, PresentationState};
use crate::api::{JobService, ServiceError};
use crate::engine::{submit_job, JobChannels, PollError};
use crate::model::{ClientConfig, JobEvent, OptimizationRequest, ViewUpdate};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

/// Final state of a tracked job, as seen by the presentation layer.
pub(crate) struct TrackedJob {
    pub state: PresentationState,
    /// Observation stopped before the job reached a terminal state.
    pub interrupted: bool,
}

fn forward(view_tx: &UnboundedSender<ViewUpdate>, updates: Vec<ViewUpdate>) {
    for u in updates {
        let _ = view_tx.send(u);
    }
}

/// Submit `request` and track the job until it is terminal or `shutdown` resolves.
///
/// All state changes happen on this task; the poller and the stream consumer only send
/// events to it.
pub(crate) async fn run_job_controller<F>(
    service: Arc<dyn JobService>,
    cfg: ClientConfig,
    request: OptimizationRequest,
    view_tx: UnboundedSender<ViewUpdate>,
    shutdown: F,
) -> TrackedJob
where
    F: Future<Output = ()> + Send,
{
    let mut reconciler = JobStateReconciler::new();
    forward(&view_tx, reconciler.begin_submission().updates);
    tokio::pin!(shutdown);

    let submitted = tokio::select! {
        res = submit_job(service.as_ref(), request) => res,
        _ = &mut shutdown => {
            info!("interrupted while submitting");
            return TrackedJob { state: reconciler.into_state(), interrupted: true };
        }
    };
    let event = match submitted {
        Ok(job_id) => JobEvent::Submitted { job_id },
        Err(e) => JobEvent::SubmissionFailed {
            message: e.to_string(),
        },
    };

    let reaction = reconciler.apply(event);
    let start = reaction.start_channels.clone();
    forward(&view_tx, reaction.updates);
    let Some(job_id) = start else {
        return TrackedJob {
            state: reconciler.into_state(),
            interrupted: false,
        };
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<JobEvent>();
    let mut channels = JobChannels::start(service, &cfg, &job_id, event_tx);

    let interrupted = loop {
        tokio::select! {
            ev = event_rx.recv() => {
                let Some(ev) = ev else {
                    // Both tasks are gone without a verdict (a panicked poller); settle as a poll failure.
                    warn!(job_id = %job_id, "observation channels ended without a verdict");
                    let lost = PollError(ServiceError::Protocol("poller exited".into()));
                    let reaction = reconciler.apply(JobEvent::PollFailed { message: lost.to_string() });
                    forward(&view_tx, reaction.updates);
                    channels.halt();
                    break false;
                };
                let reaction = reconciler.apply(ev);
                let halt = reaction.halt_channels || reconciler.state().phase.is_terminal();
                forward(&view_tx, reaction.updates);
                if halt {
                    channels.halt();
                    break false;
                }
            }
            _ = &mut shutdown => {
                info!(job_id = %channels.job_id(), "stopped watching; the job keeps running on the service");
                channels.halt();
                break true;
            }
        }
    };

    if !interrupted {
        // Events queued behind the verdict are applied and dropped by the reconciler.
        let mut late = 0usize;
        while let Ok(ev) = event_rx.try_recv() {
            if reconciler.apply(ev).ignored {
                late += 1;
            }
        }
        if late > 0 {
            debug!(job_id = %job_id, late, "dropped events after terminal state");
        }
    }

    TrackedJob {
        state: reconciler.into_state(),
        interrupted,
    }
}
