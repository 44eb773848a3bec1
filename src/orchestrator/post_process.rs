//! Post-job processing utilities.
//!
//! Turns the reconciled presentation state into the final job outcome and handles exports.

use super::reconciler::PresentationState;
use crate::model::{ClientConfig, JobOutcome, OptimizationRequest};
use anyhow::{Context, Result};
use std::path::Path;

/// Result of post-job processing, ready for presentation layers.
pub(crate) struct ProcessedJob {
    pub outcome: JobOutcome,
    pub export_messages: Vec<String>,
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

pub(crate) fn build_outcome(
    cfg: &ClientConfig,
    request: &OptimizationRequest,
    state: &PresentationState,
) -> JobOutcome {
    JobOutcome {
        timestamp_utc: now_rfc3339(),
        base_url: cfg.base_url.clone(),
        benchmark: request.benchmark.clone(),
        optimizer: request.optimizer,
        job_id: state.job_id.clone(),
        phase: state.phase,
        error: state.error_banner.clone(),
        output: state.output.clone(),
        record: state.record.clone(),
    }
}

/// Write the outcome as pretty JSON.
pub(crate) fn export_json(path: &Path, outcome: &JobOutcome) -> Result<()> {
    let body = serde_json::to_string_pretty(outcome).context("serialize job outcome")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Process a finished job: build its outcome and run the requested exports.
pub(crate) fn process_job_completion(
    cfg: &ClientConfig,
    request: &OptimizationRequest,
    export_path: Option<&Path>,
    state: &PresentationState,
) -> ProcessedJob {
    let outcome = build_outcome(cfg, request, state);

    let mut export_messages = Vec::new();
    if let Some(path) = export_path {
        match export_json(path, &outcome) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedJob {
        outcome,
        export_messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scripted::completed_genetic;
    use crate::model::{JobEvent, Optimizer};
    use crate::orchestrator::reconciler::JobStateReconciler;
    use std::time::Duration;

    fn finished_state() -> PresentationState {
        let mut r = JobStateReconciler::new();
        r.begin_submission();
        r.apply(JobEvent::Submitted {
            job_id: "job-1".into(),
        });
        r.apply(JobEvent::StreamLine("step 1".into()));
        r.apply(JobEvent::PollCompleted {
            record: Box::new(completed_genetic()),
        });
        r.into_state()
    }

    fn cfg() -> ClientConfig {
        ClientConfig {
            base_url: "http://localhost:8000".into(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            user_agent: "optimizer-watch/test".into(),
            stream_logs: true,
        }
    }

    #[test]
    fn export_writes_outcome_json() {
        let req = OptimizationRequest {
            benchmark: "matmul.c".into(),
            optimizer: Optimizer::Genetic,
        };
        let path = std::env::temp_dir().join(format!(
            "optimizer-watch-export-{}.json",
            std::process::id()
        ));
        let processed = process_job_completion(&cfg(), &req, Some(&path), &finished_state());
        assert_eq!(
            processed.export_messages,
            vec![format!("Exported JSON: {}", path.display())]
        );

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(written["job_id"], "job-1");
        assert_eq!(written["phase"], "completed");
        assert_eq!(written["optimizer"], "genetic");
        assert_eq!(written["output"], "step 1\n");
        assert_eq!(written["record"]["result"]["evaluations"], 340);
        assert_eq!(processed.outcome.benchmark, "matmul.c");
    }

    #[test]
    fn export_failure_is_reported_not_raised() {
        let req = OptimizationRequest {
            benchmark: "matmul.c".into(),
            optimizer: Optimizer::Random,
        };
        let path = Path::new("/nonexistent-dir/optimizer-watch/out.json");
        let processed = process_job_completion(&cfg(), &req, Some(path), &finished_state());
        assert_eq!(processed.export_messages.len(), 1);
        assert!(processed.export_messages[0].starts_with("Export JSON failed"));
    }
}
