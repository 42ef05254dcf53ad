//! The `run`, `check` and `eval` commands.

use std::path::Path;
use std::sync::Arc;

use hush_core::{Alert, Condition};
use hush_pipeline::{
    CounterStore, LogPublisher, MemoryCounterStore, MemoryQueue, Pipeline, PipelineConfig,
    Processor, RuleCounts, WorkerStats,
};
use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{DaemonError, Result};
use crate::settings::{Endpoint, ProcessorSettings};
use crate::sink::{JsonLinesStore, feed};

/// Loads, validates and compiles the pipeline document at `path`.
///
/// Returns the pipeline name and its rule counts.
///
/// # Errors
///
/// Returns the first read, parse or compile error.
pub fn check(path: &Path) -> Result<(String, RuleCounts)> {
    let config = PipelineConfig::from_file(path)?;
    let pipeline = Pipeline::compile(&config, MemoryCounterStore::new())?;
    Ok((pipeline.name().to_string(), pipeline.rule_counts()))
}

/// Evaluates `condition` against one alert JSON document.
///
/// # Errors
///
/// Returns an error if the condition or the alert is invalid.
pub fn eval(condition: &str, alert: &[u8]) -> Result<bool> {
    let condition = Condition::parse(condition)?;
    let alert = Alert::from_json(alert)?;
    Ok(condition.test(&alert))
}

/// Runs the pipeline over the configured input until it is exhausted or
/// `shutdown` turns true.
///
/// # Errors
///
/// Returns configuration errors before any alert is read, and input or
/// worker failures after the workers have stopped.
pub async fn run(settings: &ProcessorSettings, shutdown: watch::Receiver<bool>) -> Result<WorkerStats> {
    settings.validate()?;
    let mut config = PipelineConfig::from_file(&settings.pipeline_file)?;
    settings.apply_overrides(&mut config);

    #[cfg(feature = "redis")]
    if let Some(url) = &settings.redis_url {
        let counters = hush_pipeline::RedisCounterStore::connect(url).await?;
        return serve(settings, &config, counters, shutdown).await;
    }

    serve(settings, &config, MemoryCounterStore::new(), shutdown).await
}

async fn serve<C: CounterStore>(
    settings: &ProcessorSettings,
    config: &PipelineConfig,
    counters: C,
    shutdown: watch::Receiver<bool>,
) -> Result<WorkerStats> {
    let pipeline = Arc::new(Pipeline::compile(config, counters)?);
    info!(
        pipeline = %pipeline.name(),
        rules = %pipeline.rule_counts(),
        workers = settings.workers,
        input = %settings.input,
        output = %settings.output,
        "pipeline compiled"
    );

    let store = Arc::new(match &settings.output {
        Endpoint::Stdio => JsonLinesStore::stdout(),
        Endpoint::File(path) => JsonLinesStore::append(path)?,
    });
    let processor = Arc::new(Processor::with_config(
        pipeline,
        LogPublisher::default(),
        Arc::clone(&store),
        settings.processor_config(),
    ));
    let queue = Arc::new(MemoryQueue::new());

    let feeder = spawn_feeder(&settings.input, Arc::clone(&queue), shutdown.clone()).await?;

    let workers: Vec<JoinHandle<WorkerStats>> = (0..settings.workers)
        .map(|worker| {
            let processor = Arc::clone(&processor);
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { processor.run_worker(worker, &queue, shutdown).await })
        })
        .collect();

    let mut total = WorkerStats::default();
    let mut failure = None;
    for (worker, handle) in workers.into_iter().enumerate() {
        match handle.await {
            Ok(stats) => total.merge(stats),
            Err(e) => {
                error!(worker, error = %e, "worker task aborted");
                failure.get_or_insert(DaemonError::Worker {
                    worker,
                    reason: e.to_string(),
                });
            }
        }
    }

    match feeder.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            error!(error = %e, "reading input failed");
            failure.get_or_insert(e);
        }
        Err(e) => {
            failure.get_or_insert(DaemonError::Config(format!("feeder task aborted: {e}")));
        }
    }
    store.flush()?;

    info!(
        handled = total.handled,
        acked = total.acked,
        requeued = total.requeued,
        rejected = total.rejected,
        "processing finished"
    );
    failure.map_or(Ok(total), Err)
}

async fn spawn_feeder(
    input: &Endpoint,
    queue: Arc<MemoryQueue>,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<Result<usize>>> {
    let handle = match input {
        Endpoint::Stdio => {
            let reader = BufReader::new(tokio::io::stdin());
            tokio::spawn(async move { feed(reader, &queue, shutdown).await })
        }
        Endpoint::File(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                DaemonError::Config(format!("failed to open input '{}': {e}", path.display()))
            })?;
            let reader = BufReader::new(file);
            tokio::spawn(async move { feed(reader, &queue, shutdown).await })
        }
    };
    Ok(handle)
}
