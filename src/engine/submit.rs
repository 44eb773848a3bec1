use crate::api::{JobService, ServiceError};
use crate::model::{BenchmarkArtifact, OptimizationRequest};
use thiserror::Error;
use tracing::{debug, info, warn};

const START_FAILED: &str = "optimization failed to start";

/// Why a job never got an id.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("failed to fetch benchmark file")]
    BenchmarkFetch {
        name: String,
        #[source]
        source: ServiceError,
    },

    /// The service answered the submission with an error payload.
    #[error("{message}")]
    Rejected {
        message: String,
        #[source]
        source: ServiceError,
    },
}

/// Fetch the benchmark source, upload it with the chosen optimizer and return the job id.
pub async fn submit_job(
    service: &dyn JobService,
    request: OptimizationRequest,
) -> Result<String, SubmissionError> {
    let OptimizationRequest {
        benchmark,
        optimizer,
    } = request;

    let content = match service.fetch_benchmark(&benchmark).await {
        Ok(b) => b,
        Err(source) => {
            warn!(benchmark = %benchmark, error = %source, "benchmark fetch failed");
            return Err(SubmissionError::BenchmarkFetch {
                name: benchmark,
                source,
            });
        }
    };
    debug!(benchmark = %benchmark, bytes = content.len(), "fetched benchmark source");

    let artifact = BenchmarkArtifact {
        name: benchmark,
        content,
    };
    match service.submit(artifact, optimizer).await {
        Ok(job_id) => {
            info!(job_id = %job_id, optimizer = optimizer.as_str(), "optimization submitted");
            Ok(job_id)
        }
        Err(source) => {
            let message = source.detail().unwrap_or(START_FAILED).to_string();
            warn!(error = %source, "submission rejected");
            Err(SubmissionError::Rejected { message, source })
        }
    }
}
