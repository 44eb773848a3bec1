//! In-memory [`JobService`] that replays a fixed script, for engine and controller tests.

use super::{JobService, LogStream, ServiceError};
use crate::model::{
    BenchmarkArtifact, JobRecord, JobResult, JobStatus, OptimizationSummary, Optimizer,
    StreamMessage,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted answer to `job_status`.
#[derive(Debug, Clone)]
pub(crate) enum StatusStep {
    Record(JobRecord),
    /// Simulated transport failure.
    Unreachable,
    /// Non-2xx answer with an optional `detail` message.
    Rejected(u16, Option<&'static str>),
}

enum StreamScript {
    Refuse,
    Fixed(Vec<StreamMessage>, bool),
    Live(mpsc::UnboundedReceiver<Result<StreamMessage, ServiceError>>),
}

pub(crate) struct ScriptedService {
    benchmarks: HashMap<String, Bytes>,
    job_id: String,
    reject_detail: Mutex<Option<Option<String>>>,
    statuses: Mutex<VecDeque<StatusStep>>,
    stream: Mutex<Option<StreamScript>>,
    pub submissions: Mutex<Vec<(String, Bytes, Optimizer)>>,
    pub status_calls: AtomicUsize,
    pub stream_opens: AtomicUsize,
}

pub(crate) fn record(status: JobStatus) -> JobRecord {
    JobRecord {
        job_id: None,
        status,
        result: None,
        error: None,
        output: None,
        optimizer: None,
    }
}

pub(crate) fn completed_genetic() -> JobRecord {
    JobRecord {
        result: Some(JobResult::Summary(OptimizationSummary {
            best_time: Some(0.0023),
            total_time: Some(12.5),
            evaluations: Some(340),
            enabled_flags: vec!["-O3".into(), "-funroll-loops".into()],
            extra: Default::default(),
        })),
        optimizer: Some("genetic".into()),
        ..record(JobStatus::Completed)
    }
}

impl ScriptedService {
    pub fn new(job_id: &str) -> Self {
        let mut benchmarks = HashMap::new();
        benchmarks.insert(
            "matmul.c".to_string(),
            Bytes::from_static(b"int main(void) { return 0; }\n"),
        );
        Self {
            benchmarks,
            job_id: job_id.to_string(),
            reject_detail: Mutex::new(None),
            statuses: Mutex::new(VecDeque::new()),
            stream: Mutex::new(Some(StreamScript::Fixed(Vec::new(), true))),
            submissions: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            stream_opens: AtomicUsize::new(0),
        }
    }

    /// Answer the submission with a non-2xx status carrying `detail`.
    pub fn reject_submissions(self, detail: Option<&str>) -> Self {
        *self.reject_detail.lock().unwrap() = Some(detail.map(str::to_string));
        self
    }

    pub fn with_statuses(self, steps: impl IntoIterator<Item = StatusStep>) -> Self {
        self.statuses.lock().unwrap().extend(steps);
        self
    }

    /// Deliver `messages`, then either stay open forever or end the body.
    pub fn with_stream(self, messages: Vec<StreamMessage>, hold_open: bool) -> Self {
        *self.stream.lock().unwrap() = Some(StreamScript::Fixed(messages, hold_open));
        self
    }

    pub fn refuse_stream(self) -> Self {
        *self.stream.lock().unwrap() = Some(StreamScript::Refuse);
        self
    }

    /// Stream fed by the returned sender, for tests that interleave both channels.
    pub fn with_live_stream(
        self,
    ) -> (Self, mpsc::UnboundedSender<Result<StreamMessage, ServiceError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.stream.lock().unwrap() = Some(StreamScript::Live(rx));
        (self, tx)
    }
}

#[async_trait]
impl JobService for ScriptedService {
    async fn list_benchmarks(&self) -> Result<Vec<String>, ServiceError> {
        let mut names: Vec<String> = self.benchmarks.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn fetch_benchmark(&self, name: &str) -> Result<Bytes, ServiceError> {
        self.benchmarks
            .get(name)
            .cloned()
            .ok_or(ServiceError::Status {
                status: 404,
                detail: Some("Benchmark not found".into()),
            })
    }

    async fn submit(
        &self,
        artifact: BenchmarkArtifact,
        optimizer: Optimizer,
    ) -> Result<String, ServiceError> {
        if let Some(detail) = self.reject_detail.lock().unwrap().clone() {
            return Err(ServiceError::Status {
                status: 400,
                detail,
            });
        }
        self.submissions
            .lock()
            .unwrap()
            .push((artifact.name, artifact.content, optimizer));
        Ok(self.job_id.clone())
    }

    async fn job_status(&self, job_id: &str) -> Result<JobRecord, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(job_id, self.job_id);
        let step = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StatusStep::Record(record(JobStatus::Running)));
        match step {
            StatusStep::Record(r) => Ok(r),
            StatusStep::Unreachable => Err(ServiceError::Protocol("connection reset".into())),
            StatusStep::Rejected(status, detail) => Err(ServiceError::Status {
                status,
                detail: detail.map(str::to_string),
            }),
        }
    }

    async fn stream_log(&self, _job_id: &str) -> Result<LogStream, ServiceError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        let script = self.stream.lock().unwrap().take();
        match script {
            None | Some(StreamScript::Refuse) => Err(ServiceError::Status {
                status: 503,
                detail: None,
            }),
            Some(StreamScript::Fixed(messages, hold_open)) => {
                let items = stream::iter(messages.into_iter().map(Ok));
                if hold_open {
                    Ok(items.chain(stream::pending()).boxed())
                } else {
                    Ok(items.boxed())
                }
            }
            Some(StreamScript::Live(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
        }
    }
}
