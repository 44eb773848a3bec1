mod api;
mod cli;
mod engine;
mod model;
mod orchestrator;
mod text_summary;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;

    // Diagnostics go to stderr so stdout stays clean for results
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!("optimizer-watch v{}", env!("CARGO_PKG_VERSION"));

    match cli::run(args).await {
        Ok(()) => {
            // Exit explicitly so lingering stream/poll tasks don't hold the runtime
            std::process::exit(0);
        }
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else if e.downcast_ref::<cli::ReportedFailure>().is_some() {
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
