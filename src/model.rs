use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
    pub stream_logs: bool,
}

/// Optimization strategy selectable at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    Genetic,
    Random,
    Bayesian,
    Annealing,
    /// Runs every strategy and returns a per-strategy comparison.
    Compare,
}

impl Optimizer {
    pub fn as_str(self) -> &'static str {
        match self {
            Optimizer::Genetic => "genetic",
            Optimizer::Random => "random",
            Optimizer::Bayesian => "bayesian",
            Optimizer::Annealing => "annealing",
            Optimizer::Compare => "compare",
        }
    }

    /// Path segments of the submission endpoint for this strategy.
    pub fn endpoint_segments(self) -> [&'static str; 2] {
        match self {
            Optimizer::Compare => ["optimize", "compare"],
            other => ["optimize", other.as_str()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub benchmark: String,
    pub optimizer: Optimizer,
}

/// Benchmark source file as uploaded to the service.
#[derive(Debug, Clone)]
pub struct BenchmarkArtifact {
    pub name: String,
    pub content: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Flat result returned by a single-strategy run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub evaluations: Option<u64>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub enabled_flags: Vec<String>,
    // Strategy-specific fields we do not render but keep for export.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Counts may arrive as `340` or `340.0`; a fractional or negative value is dropped.
fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let n = Option::<serde_json::Number>::deserialize(d)?;
    Ok(n.and_then(|n| {
        n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        })
    }))
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResult {
    Summary(OptimizationSummary),
    /// Nested per-strategy map produced by the compare variant.
    Comparison(serde_json::Value),
    /// A single-strategy result whose shape we could not read; kept verbatim.
    Unrecognized(serde_json::Value),
}

/// Wire tags the service uses for the compare variant.
const COMPARE_TAGS: [&str; 2] = ["compare_optimizers", "compare"];

pub fn is_compare_tag(tag: Option<&str>) -> bool {
    tag.map(|t| COMPARE_TAGS.contains(&t)).unwrap_or(false)
}

/// Status record as returned by `GET /jobs/{id}`.
#[derive(Debug, Clone, Deserialize)]
struct JobRecordWire {
    #[serde(default)]
    job_id: Option<String>,
    status: JobStatus,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    optimizer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JobRecordWire")]
pub struct JobRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<String>,
}

impl From<JobRecordWire> for JobRecord {
    fn from(wire: JobRecordWire) -> Self {
        // A malformed result must not cost the status and output of a finished job.
        let result = match wire.result {
            None | Some(serde_json::Value::Null) => None,
            Some(v) if is_compare_tag(wire.optimizer.as_deref()) => {
                Some(JobResult::Comparison(v))
            }
            Some(v) => match OptimizationSummary::deserialize(&v) {
                Ok(summary) => Some(JobResult::Summary(summary)),
                Err(e) => {
                    tracing::debug!(error = %e, "result does not match the summary shape");
                    Some(JobResult::Unrecognized(v))
                }
            },
        };
        JobRecord {
            job_id: wire.job_id,
            status: wire.status,
            result,
            error: wire.error,
            output: wire.output,
            optimizer: wire.optimizer,
        }
    }
}

/// One item delivered by the job's push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Line(String),
    Close,
}

/// Events produced by the submitter, the poller and the stream consumer,
/// consumed by the single controller task.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Submitted {
        job_id: String,
    },
    SubmissionFailed {
        message: String,
    },
    StreamLine(String),
    StreamClosed,
    StreamFailed {
        message: String,
    },
    PollCompleted {
        // Boxed so the hot StreamLine path does not carry the full record.
        record: Box<JobRecord>,
    },
    PollFailed {
        message: String,
    },
}

/// Badge value exposed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    pub fn badge(self) -> &'static str {
        match self {
            JobPhase::Idle => "IDLE",
            JobPhase::Running => "RUNNING",
            JobPhase::Completed => "COMPLETED",
            JobPhase::Failed => "FAILED",
        }
    }
}

/// Changes pushed to the presentation layer after each applied event.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    PhaseChanged(JobPhase),
    OutputVisible,
    OutputAppended(String),
    OutputReplaced(String),
    ScrollToBottom,
    ErrorShown(String),
    SummaryReady(crate::text_summary::ResultSummary),
    SubmitEnabled(bool),
}

/// Final record of a tracked job, used for JSON output and export.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub timestamp_utc: String,
    pub base_url: String,
    pub benchmark: String,
    pub optimizer: Optimizer,
    pub job_id: Option<String>,
    pub phase: JobPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<JobRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_result_parses_flat_fields() {
        let raw = r#"{
            "status": "completed",
            "optimizer": "genetic",
            "result": {"best_time": 0.0023, "total_time": 12.5, "evaluations": 340,
                       "enabled_flags": ["-O3", "-funroll-loops"], "generations": 20}
        }"#;
        let rec: JobRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
        match rec.result {
            Some(JobResult::Summary(s)) => {
                assert_eq!(s.best_time, Some(0.0023));
                assert_eq!(s.evaluations, Some(340));
                assert_eq!(s.enabled_flags, vec!["-O3", "-funroll-loops"]);
                assert_eq!(s.extra.get("generations"), Some(&serde_json::json!(20)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn compare_tag_keeps_nested_result() {
        let raw = r#"{
            "status": "completed",
            "optimizer": "compare_optimizers",
            "result": {"genetic": {"best_time": 0.1}, "random": {"best_time": 0.2}}
        }"#;
        let rec: JobRecord = serde_json::from_str(raw).unwrap();
        assert!(matches!(rec.result, Some(JobResult::Comparison(_))));
    }

    #[test]
    fn null_and_float_fields_still_parse() {
        let raw = r#"{
            "status": "completed",
            "optimizer": "random",
            "output": "done",
            "result": {"best_time": 0.5, "evaluations": 340.0, "enabled_flags": null}
        }"#;
        let rec: JobRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.output.as_deref(), Some("done"));
        match rec.result {
            Some(JobResult::Summary(s)) => {
                assert_eq!(s.best_time, Some(0.5));
                assert_eq!(s.evaluations, Some(340));
                assert!(s.enabled_flags.is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unreadable_summary_keeps_the_record() {
        let raw = r#"{
            "status": "completed",
            "optimizer": "genetic",
            "result": {"best_time": "fast", "enabled_flags": [1, 2]}
        }"#;
        let rec: JobRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
        assert_eq!(
            rec.result,
            Some(JobResult::Unrecognized(serde_json::json!({
                "best_time": "fast",
                "enabled_flags": [1, 2]
            })))
        );
    }

    #[test]
    fn missing_status_is_a_parse_error() {
        let raw = r#"{"detail": "Job not found"}"#;
        assert!(serde_json::from_str::<JobRecord>(raw).is_err());
    }

    #[test]
    fn endpoint_routes_compare_separately() {
        assert_eq!(Optimizer::Genetic.endpoint_segments(), ["optimize", "genetic"]);
        assert_eq!(Optimizer::Compare.endpoint_segments(), ["optimize", "compare"]);
    }
}
