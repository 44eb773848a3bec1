//! Result rendering for CLI output.
//!
//! Maps a terminal job record to labeled summary entries, and the reconciled presentation
//! state to human-readable lines for text mode.

use crate::model::{JobPhase, JobRecord, JobResult};
use crate::orchestrator::PresentationState;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryEntry {
    pub label: &'static str,
    pub value: String,
}

/// Renderable summary of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSummary {
    pub entries: Vec<SummaryEntry>,
    /// Full structural dump, only for comparison runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump: Option<String>,
}

impl ResultSummary {
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{}: {}", e.label, e.value))
            .collect();
        if let Some(dump) = self.dump.as_deref() {
            lines.extend(dump.lines().map(str::to_string));
        }
        lines
    }
}

/// Build the summary for a terminal job record. Pure and deterministic.
pub fn build_result_summary(record: &JobRecord) -> ResultSummary {
    let mut summary = ResultSummary::default();

    match record.result.as_ref() {
        Some(JobResult::Summary(s)) => {
            if let Some(best) = s.best_time {
                summary.entries.push(SummaryEntry {
                    label: "BEST EXECUTION TIME",
                    value: format!("{best:.6} s"),
                });
            }
            if let Some(total) = s.total_time {
                summary.entries.push(SummaryEntry {
                    label: "OPTIMIZATION TIME",
                    value: format!("{total:.2} s"),
                });
            }
            if let Some(evals) = s.evaluations {
                summary.entries.push(SummaryEntry {
                    label: "TOTAL EVALUATIONS",
                    value: evals.to_string(),
                });
            }
            if !s.enabled_flags.is_empty() {
                summary.entries.push(SummaryEntry {
                    label: "ENABLED FLAGS",
                    value: s.enabled_flags.join(" "),
                });
            }
        }
        Some(JobResult::Comparison(v) | JobResult::Unrecognized(v)) => {
            summary.dump =
                Some(serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()));
        }
        None => {}
    }

    summary
}

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build the final text-mode report from the reconciled state.
pub(crate) fn build_text_summary(state: &PresentationState) -> TextSummary {
    let mut lines = Vec::new();

    let job = state.job_id.as_deref().unwrap_or("-");
    lines.push(format!("Job: {job}  [{}]", state.phase.badge()));

    if let Some(banner) = state.error_banner.as_deref() {
        lines.push(banner.to_string());
    }
    if state.phase == JobPhase::Completed {
        match state.summary.as_ref() {
            Some(s) if !s.entries.is_empty() || s.dump.is_some() => lines.extend(s.lines()),
            _ => lines.push("No result reported".to_string()),
        }
    }

    TextSummary { lines }
}
