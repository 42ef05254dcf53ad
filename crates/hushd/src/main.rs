//! hushd - hush alert pipeline processor
//!
//! Consumes alerts as JSON lines and processes them through a rule pipeline.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hush_pipeline::OnError;
use hushd::{Endpoint, LogFormat, ProcessorSettings};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "hushd")]
#[command(about = "hush alert pipeline processor")]
#[command(version)]
struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, env = "HUSH_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process alerts until the input ends or Ctrl-C
    Run {
        /// Path to the pipeline rule document
        #[arg(short, long, env = "HUSH_PIPELINE_FILE", default_value = "/etc/hush/pipeline.yaml")]
        pipeline: PathBuf,

        /// JSON-lines input, '-' for stdin
        #[arg(short, long, default_value = "-")]
        input: Endpoint,

        /// JSON-lines output, '-' for stdout
        #[arg(short, long, default_value = "-")]
        output: Endpoint,

        /// Number of concurrent workers
        #[arg(short, long, env = "HUSH_WORKERS", default_value_t = 4)]
        workers: usize,

        /// Rate-limit behaviour when the counter store fails (fail or allow)
        #[arg(long, env = "HUSH_RATELIMIT_ON_ERROR")]
        ratelimit_on_error: Option<OnError>,

        /// Redis URL of the shared rate-limit counter store
        #[arg(long, env = "HUSH_REDIS_URL")]
        redis_url: Option<String>,

        /// Attempts before a failing alert is rejected
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,

        /// Bytes of malformed payloads to include in logs
        #[arg(long, default_value_t = 256)]
        excerpt_bytes: usize,
    },

    /// Validate and compile a pipeline rule document
    Check {
        /// Path to the pipeline rule document
        #[arg(short, long, env = "HUSH_PIPELINE_FILE")]
        pipeline: PathBuf,
    },

    /// Evaluate a condition against an alert
    Eval {
        /// Condition expression
        #[arg(short, long)]
        condition: String,

        /// Alert JSON file, '-' for stdin
        #[arg(short, long, default_value = "-")]
        alert: Endpoint,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Run {
            pipeline,
            input,
            output,
            workers,
            ratelimit_on_error,
            redis_url,
            max_attempts,
            excerpt_bytes,
        } => {
            let settings = ProcessorSettings {
                pipeline_file: pipeline,
                input,
                output,
                workers,
                ratelimit_on_error,
                redis_url,
                max_attempts,
                excerpt_bytes,
            };
            run_processor(settings).await?;
        }

        Commands::Check { pipeline } => {
            let (name, counts) = hushd::check(&pipeline).inspect_err(|e| {
                error!(pipeline = %pipeline.display(), error = %e, "invalid pipeline");
            })?;
            println!("{name}: {counts}");
        }

        Commands::Eval { condition, alert } => {
            let payload = match alert {
                Endpoint::Stdio => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
                Endpoint::File(path) => tokio::fs::read(&path).await?,
            };
            println!("{}", hushd::eval(&condition, &payload)?);
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("hushd=info".parse()?)
        .add_directive("hush_pipeline=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

async fn run_processor(settings: ProcessorSettings) -> anyhow::Result<()> {
    info!(pipeline = %settings.pipeline_file.display(), "starting hushd");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    match hushd::run(&settings, shutdown_rx).await {
        Ok(stats) => {
            info!(handled = stats.handled, "hushd stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "hushd failed");
            Err(e.into())
        }
    }
}
