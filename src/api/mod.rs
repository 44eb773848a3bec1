//! Boundary to the remote optimization service.
//!
//! The engine only talks to the service through [`JobService`], so the poller, the stream
//! consumer and the submitter can be driven by the HTTP client in production and by a
//! scripted service in tests.

mod http;
mod sse;
#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpJobService;
pub(crate) use sse::SseDecoder;

use crate::model::{BenchmarkArtifact, JobRecord, Optimizer, StreamMessage};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors returned by a [`JobService`] call.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("service returned {status}{}", detail_suffix(.detail))]
    Status { status: u16, detail: Option<String> },

    #[error("stream protocol error: {0}")]
    Protocol(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

impl ServiceError {
    /// Server-supplied `detail` message, when the failure carried one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ServiceError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Live log lines of one job, in arrival order.
pub type LogStream = BoxStream<'static, Result<StreamMessage, ServiceError>>;

#[async_trait]
pub trait JobService: Send + Sync {
    /// Names of the benchmarks the service can optimize, in service order.
    async fn list_benchmarks(&self) -> Result<Vec<String>, ServiceError>;

    /// Raw source of one benchmark.
    async fn fetch_benchmark(&self, name: &str) -> Result<Bytes, ServiceError>;

    /// Upload a benchmark and start an optimization run; returns the job id.
    async fn submit(
        &self,
        artifact: BenchmarkArtifact,
        optimizer: Optimizer,
    ) -> Result<String, ServiceError>;

    async fn job_status(&self, job_id: &str) -> Result<JobRecord, ServiceError>;

    /// Subscribe to the job's push channel.
    async fn stream_log(&self, job_id: &str) -> Result<LogStream, ServiceError>;
}
