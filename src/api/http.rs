use super::{JobService, LogStream, ServiceError, SseDecoder};
use crate::model::{BenchmarkArtifact, ClientConfig, JobRecord, Optimizer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::{header, multipart, Client, Response, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Multipart field the service expects the benchmark source under.
const SOURCE_FIELD: &str = "source_file";

#[derive(Deserialize)]
struct BenchmarkList {
    benchmarks: Vec<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

/// [`JobService`] backed by the optimization service's HTTP API.
#[derive(Clone)]
pub struct HttpJobService {
    http: Client,
    base: Url,
    request_timeout: Duration,
}

impl HttpJobService {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let base = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL: {}", cfg.base_url))?;
        if base.cannot_be_a_base() {
            bail!("base URL cannot carry a path: {}", cfg.base_url);
        }
        // No overall client timeout: it would also cut the long-lived log stream.
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(cfg.request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base,
            request_timeout: cfg.request_timeout,
        })
    }

    /// Append percent-encoded path segments to the base URL.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Turn a non-2xx response into [`ServiceError::Status`], keeping the `detail` message.
async fn check_status(resp: Response) -> Result<Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = resp.bytes().await.ok().and_then(|body| error_detail(&body));
    Err(ServiceError::Status {
        status: status.as_u16(),
        detail,
    })
}

/// `detail` string of a JSON error payload, if the body has one.
fn error_detail(body: &[u8]) -> Option<String> {
    let v: serde_json::Value = serde_json::from_slice(body).ok()?;
    v.get("detail")?.as_str().map(str::to_string)
}

#[async_trait]
impl JobService for HttpJobService {
    async fn list_benchmarks(&self) -> Result<Vec<String>, ServiceError> {
        let resp = self
            .http
            .get(self.endpoint(&["benchmarks"]))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body = check_status(resp).await?.bytes().await?;
        let list: BenchmarkList = serde_json::from_slice(&body)?;
        Ok(list.benchmarks)
    }

    async fn fetch_benchmark(&self, name: &str) -> Result<Bytes, ServiceError> {
        let resp = self
            .http
            .get(self.endpoint(&["benchmarks", name]))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(check_status(resp).await?.bytes().await?)
    }

    async fn submit(
        &self,
        artifact: BenchmarkArtifact,
        optimizer: Optimizer,
    ) -> Result<String, ServiceError> {
        let part = multipart::Part::bytes(artifact.content.to_vec())
            .file_name(artifact.name)
            .mime_str("text/plain")?;
        let form = multipart::Form::new().part(SOURCE_FIELD, part);

        let url = self.endpoint(&optimizer.endpoint_segments());
        debug!(%url, "submitting optimization");

        let resp = self
            .http
            .post(url)
            .multipart(form)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body = check_status(resp).await?.bytes().await?;
        let submitted: SubmitResponse = serde_json::from_slice(&body)?;
        Ok(submitted.job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobRecord, ServiceError> {
        let resp = self
            .http
            .get(self.endpoint(&["jobs", job_id]))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body = check_status(resp).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn stream_log(&self, job_id: &str) -> Result<LogStream, ServiceError> {
        let resp = self
            .http
            .get(self.endpoint(&["jobs", job_id, "stream"]))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let mut decoder = SseDecoder::new();
        let messages = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(b) => decoder.push(&b),
                Err(e) => Err(ServiceError::Http(e)),
            })
            .flat_map(|decoded| {
                let items: Vec<_> = match decoded {
                    Ok(msgs) => msgs.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            });
        Ok(messages.boxed())
    }
}
