use crate::api::{HttpJobService, JobService};
use crate::model::{ClientConfig, JobPhase, OptimizationRequest, Optimizer, ViewUpdate};
use crate::orchestrator::{self, TrackedJob};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A job failure whose message was already printed; the process exits 1 without repeating it.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ReportedFailure(pub String);

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "optimizer-watch",
    version,
    about = "Submit a compiler-flag optimization job and follow it until it finishes"
)]
pub struct Cli {
    /// Base URL of the optimization service
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub base_url: String,

    /// List available benchmarks and exit
    #[arg(long)]
    pub list_benchmarks: bool,

    /// Benchmark to optimize (see --list-benchmarks)
    #[arg(long, required_unless_present = "list_benchmarks")]
    pub benchmark: Option<String>,

    /// Optimization strategy; `compare` runs every strategy side by side
    #[arg(long, value_enum, required_unless_present = "list_benchmarks")]
    pub optimizer: Option<Optimizer>,

    /// Print the final job record as JSON (no live log)
    #[arg(long)]
    pub json: bool,

    /// Print the live log and a text summary (default)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for scripts)
    #[arg(long)]
    pub silent: bool,

    /// Do not attach to the live log stream; rely on status polling only
    #[arg(long)]
    pub no_stream: bool,

    /// Status polling interval
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Timeout for individual service requests
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// Export the final job record as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Log level for the tracing subscriber.
    pub fn log_level(&self) -> Level {
        if self.silent {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent is not combined with an explicit output mode
    if args.silent && (args.json || args.text) {
        return Err(anyhow::anyhow!(
            "--silent cannot be combined with --json or --text"
        ));
    }

    let cfg = build_config(&args)?;
    let service: Arc<dyn JobService> =
        Arc::new(HttpJobService::new(&cfg).context("create service client")?);

    if args.list_benchmarks {
        return list_benchmarks(service.as_ref()).await;
    }

    let request = build_request(&args)?;
    if args.json || args.silent {
        return run_quiet(args, cfg, service, request).await;
    }
    run_text(args, cfg, service, request).await
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<ClientConfig> {
    let poll_interval = Duration::from(args.poll_interval);
    if poll_interval < MIN_POLL_INTERVAL {
        return Err(anyhow::anyhow!(
            "--poll-interval must be at least {}",
            humantime::format_duration(MIN_POLL_INTERVAL)
        ));
    }
    let request_timeout = Duration::from(args.request_timeout);
    if request_timeout.is_zero() {
        return Err(anyhow::anyhow!("--request-timeout must be greater than zero"));
    }
    Ok(ClientConfig {
        base_url: args.base_url.clone(),
        poll_interval,
        request_timeout,
        user_agent: format!("optimizer-watch/{}", env!("CARGO_PKG_VERSION")),
        stream_logs: !args.no_stream,
    })
}

fn build_request(args: &Cli) -> Result<OptimizationRequest> {
    let benchmark = args
        .benchmark
        .clone()
        .context("--benchmark is required")?;
    let optimizer = args.optimizer.context("--optimizer is required")?;
    Ok(OptimizationRequest {
        benchmark,
        optimizer,
    })
}

async fn list_benchmarks(service: &dyn JobService) -> Result<()> {
    let names = service
        .list_benchmarks()
        .await
        .context("failed to load benchmarks")?;
    let (out_tx, out_handle) = spawn_output_writer();
    if names.is_empty() {
        let _ = out_tx.send(OutputLine::Stderr("No benchmarks available".into()));
    }
    for name in names {
        let _ = out_tx.send(OutputLine::Stdout(name));
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Resolves on Ctrl-C; observation stops but the remote job is left alone.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        futures::future::pending::<()>().await;
    }
}

/// Spawn the controller for `request` and return the view update stream.
fn spawn_controller(
    cfg: &ClientConfig,
    service: Arc<dyn JobService>,
    request: &OptimizationRequest,
) -> (
    mpsc::UnboundedReceiver<ViewUpdate>,
    tokio::task::JoinHandle<TrackedJob>,
) {
    let (view_tx, view_rx) = mpsc::unbounded_channel::<ViewUpdate>();
    let cfg = cfg.clone();
    let request = request.clone();
    let handle = tokio::spawn(async move {
        orchestrator::run_job_controller(service, cfg, request, view_tx, interrupted()).await
    });
    (view_rx, handle)
}

/// JSON and silent modes: no live output, only the final record (JSON) or nothing (silent).
async fn run_quiet(
    args: Cli,
    cfg: ClientConfig,
    service: Arc<dyn JobService>,
    request: OptimizationRequest,
) -> Result<()> {
    let (mut view_rx, handle) = spawn_controller(&cfg, service, &request);

    // Consume updates silently (no output)
    while let Some(_update) = view_rx.recv().await {}

    let tracked = handle.await.context("job controller task failed")?;
    let processed = orchestrator::process_job_completion(
        &cfg,
        &request,
        args.export_json.as_deref(),
        &tracked.state,
    );

    if args.json {
        let (out_tx, out_handle) = spawn_output_writer();
        let out = serde_json::to_string_pretty(&processed.outcome)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
        for msg in processed.export_messages {
            let _ = out_tx.send(OutputLine::Stderr(msg));
        }
        drop(out_tx);
        let _ = out_handle.await;
    }

    job_exit_status(&tracked)
}

async fn run_text(
    args: Cli,
    cfg: ClientConfig,
    service: Arc<dyn JobService>,
    request: OptimizationRequest,
) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let _ = out_tx.send(OutputLine::Stderr(format!(
        "Submitting {} with {} optimizer…",
        request.benchmark,
        request.optimizer.as_str()
    )));

    let (mut view_rx, handle) = spawn_controller(&cfg, service, &request);

    // Everything printed from the live stream, to detect when the final log differs.
    let mut streamed = String::new();
    while let Some(update) = view_rx.recv().await {
        match update {
            ViewUpdate::PhaseChanged(phase) if phase != JobPhase::Idle => {
                let _ = out_tx.send(OutputLine::Stderr(format!("== {} ==", phase.badge())));
            }
            ViewUpdate::OutputAppended(chunk) => {
                streamed.push_str(&chunk);
                let _ = out_tx.send(OutputLine::Stderr(
                    chunk.strip_suffix('\n').unwrap_or(&chunk).to_string(),
                ));
            }
            ViewUpdate::OutputReplaced(output) => {
                if output != streamed {
                    let _ = out_tx.send(OutputLine::Stderr("== final log ==".into()));
                    for line in output.lines() {
                        let _ = out_tx.send(OutputLine::Stderr(line.to_string()));
                    }
                }
            }
            // Status, summary and errors are printed once, from the final state.
            ViewUpdate::PhaseChanged(_)
            | ViewUpdate::OutputVisible
            | ViewUpdate::ScrollToBottom
            | ViewUpdate::ErrorShown(_)
            | ViewUpdate::SummaryReady(_)
            | ViewUpdate::SubmitEnabled(_) => {}
        }
    }

    let tracked = handle.await.context("job controller task failed")?;
    let processed = orchestrator::process_job_completion(
        &cfg,
        &request,
        args.export_json.as_deref(),
        &tracked.state,
    );

    if tracked.interrupted {
        let msg = match tracked.state.job_id.as_deref() {
            Some(id) => format!("Stopped watching job {id}; it keeps running on the service"),
            None => "Interrupted before the job was submitted".to_string(),
        };
        let _ = out_tx.send(OutputLine::Stderr(msg));
    } else {
        let summary = crate::text_summary::build_text_summary(&tracked.state);
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    drop(out_tx);
    let _ = out_handle.await;

    reported_exit_status(&tracked)
}

/// Text mode has already printed the banner or interrupt notice.
fn reported_exit_status(tracked: &TrackedJob) -> Result<()> {
    job_exit_status(tracked).map_err(|e| ReportedFailure(e.to_string()).into())
}

/// Map the final state to the process result: a failed job is an error.
fn job_exit_status(tracked: &TrackedJob) -> Result<()> {
    if tracked.interrupted {
        return Err(anyhow::anyhow!("interrupted before the job finished"));
    }
    match tracked.state.phase {
        JobPhase::Failed => Err(anyhow::anyhow!(
            "{}",
            tracked
                .state
                .error_banner
                .clone()
                .unwrap_or_else(|| "ERROR: optimization failed".into())
        )),
        _ => Ok(()),
    }
}
