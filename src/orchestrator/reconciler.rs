//! Single-writer state machine over the presentation state of one tracked job.
//!
//! Every effect of the submitter, the status poller and the log stream goes through
//! [`JobStateReconciler::apply`]. Poll results are authoritative for the job outcome; stream
//! events only ever append output while the job is running.

use crate::model::{JobEvent, JobPhase, JobRecord, ViewUpdate};
use crate::text_summary::{build_result_summary, ResultSummary};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentationState {
    pub phase: JobPhase,
    pub job_id: Option<String>,
    pub loading_visible: bool,
    pub output_visible: bool,
    pub submit_enabled: bool,
    pub error_banner: Option<String>,
    pub output: String,
    pub summary: Option<ResultSummary>,
    pub record: Option<JobRecord>,
}

impl Default for PresentationState {
    fn default() -> Self {
        Self {
            phase: JobPhase::Idle,
            job_id: None,
            loading_visible: false,
            output_visible: false,
            submit_enabled: true,
            error_banner: None,
            output: String::new(),
            summary: None,
            record: None,
        }
    }
}

/// What the owner has to do after an event was applied.
#[derive(Debug, Default, PartialEq)]
pub struct Reaction {
    pub updates: Vec<ViewUpdate>,
    /// Start both observation channels for this job id.
    pub start_channels: Option<String>,
    /// The job reached a terminal state; stop both channels.
    pub halt_channels: bool,
    /// The event was dropped without touching the state.
    pub ignored: bool,
}

impl Reaction {
    fn dropped() -> Self {
        Self {
            ignored: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct JobStateReconciler {
    state: PresentationState,
    awaiting_submission: bool,
}

impl JobStateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PresentationState {
        &self.state
    }

    pub fn into_state(self) -> PresentationState {
        self.state
    }

    /// Reset the view for a new submission. Refused while a job is still running.
    pub fn begin_submission(&mut self) -> Reaction {
        if self.state.phase == JobPhase::Running || self.awaiting_submission {
            return Reaction::dropped();
        }
        self.state = PresentationState {
            loading_visible: true,
            submit_enabled: false,
            ..Default::default()
        };
        self.awaiting_submission = true;
        Reaction {
            updates: vec![
                ViewUpdate::SubmitEnabled(false),
                ViewUpdate::PhaseChanged(JobPhase::Idle),
            ],
            ..Default::default()
        }
    }

    pub fn apply(&mut self, ev: JobEvent) -> Reaction {
        match ev {
            JobEvent::Submitted { job_id } => self.on_submitted(job_id),
            JobEvent::SubmissionFailed { message } => {
                if !self.awaiting_submission {
                    return self.drop_event("submission failure");
                }
                self.awaiting_submission = false;
                self.fail(message)
            }
            JobEvent::StreamLine(line) => self.on_stream_line(line),
            JobEvent::StreamClosed => {
                debug!(phase = ?self.state.phase, "log stream closed");
                Reaction::dropped()
            }
            JobEvent::StreamFailed { message } => {
                debug!(phase = ?self.state.phase, error = %message, "log stream failed");
                Reaction::dropped()
            }
            JobEvent::PollCompleted { record } => self.on_completed(*record),
            JobEvent::PollFailed { message } => {
                if self.state.phase != JobPhase::Running {
                    return self.drop_event("poll failure");
                }
                let mut reaction = self.fail(message);
                reaction.halt_channels = true;
                reaction
            }
        }
    }

    fn on_submitted(&mut self, job_id: String) -> Reaction {
        if !self.awaiting_submission {
            return self.drop_event("submission");
        }
        self.awaiting_submission = false;
        self.state.phase = JobPhase::Running;
        self.state.output_visible = true;
        self.state.job_id = Some(job_id.clone());
        Reaction {
            updates: vec![
                ViewUpdate::PhaseChanged(JobPhase::Running),
                ViewUpdate::OutputVisible,
            ],
            start_channels: Some(job_id),
            ..Default::default()
        }
    }

    fn on_stream_line(&mut self, line: String) -> Reaction {
        if self.state.phase != JobPhase::Running {
            return self.drop_event("stream line");
        }
        let mut chunk = line;
        chunk.push('\n');
        self.state.output.push_str(&chunk);
        Reaction {
            updates: vec![ViewUpdate::OutputAppended(chunk), ViewUpdate::ScrollToBottom],
            ..Default::default()
        }
    }

    fn on_completed(&mut self, record: JobRecord) -> Reaction {
        if self.state.phase != JobPhase::Running {
            return self.drop_event("completion");
        }
        let mut updates = vec![ViewUpdate::PhaseChanged(JobPhase::Completed)];
        self.state.phase = JobPhase::Completed;
        self.state.loading_visible = false;

        let summary = build_result_summary(&record);
        updates.push(ViewUpdate::SummaryReady(summary.clone()));
        self.state.summary = Some(summary);

        // The service's final log wins over whatever the stream delivered.
        if let Some(output) = record.output.as_ref() {
            self.state.output = output.clone();
            updates.push(ViewUpdate::OutputReplaced(output.clone()));
        }
        self.state.record = Some(record);
        self.state.submit_enabled = true;
        updates.push(ViewUpdate::SubmitEnabled(true));

        Reaction {
            updates,
            halt_channels: true,
            ..Default::default()
        }
    }

    fn fail(&mut self, message: String) -> Reaction {
        let banner = format!("ERROR: {message}");
        self.state.phase = JobPhase::Failed;
        self.state.loading_visible = false;
        self.state.error_banner = Some(banner.clone());
        self.state.submit_enabled = true;
        Reaction {
            updates: vec![
                ViewUpdate::PhaseChanged(JobPhase::Failed),
                ViewUpdate::ErrorShown(banner),
                ViewUpdate::SubmitEnabled(true),
            ],
            ..Default::default()
        }
    }

    fn drop_event(&self, what: &str) -> Reaction {
        debug!(phase = ?self.state.phase, "ignoring late {}", what);
        Reaction::dropped()
    }
}
