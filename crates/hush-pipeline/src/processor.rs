//! The pipeline orchestrator.
//!
//! A [`Processor`] takes queue deliveries, decodes them, runs the compiled
//! [`Pipeline`], stores the result and settles the delivery:
//!
//! | Outcome | Settlement |
//! |---|---|
//! | processed (or dropped by a silence) | ack |
//! | undecodable payload | reject |
//! | [`ErrorClass::Rejected`] stage error | reject |
//! | [`ErrorClass::Recoverable`] stage, store or notification error | requeue, reject after `max_attempts` |
//!
//! Workers share one processor and run [`Processor::run_worker`] until the
//! shutdown flag flips or the queue is drained.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hush_core::Alert;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ErrorClass, PipelineError, Result};
use crate::notify::NotificationPublisher;
use crate::pipeline::{Pipeline, ProcessingState};
use crate::queue::{AlertQueue, Delivery};
use crate::ratelimit::CounterStore;
use crate::store::AlertStore;

/// Pause after a failed receive before asking the queue again.
pub const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Deliveries failing this many times are rejected instead of requeued.
    pub max_attempts: u32,
    /// Bytes of a malformed payload included in the log line.
    pub excerpt_bytes: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            excerpt_bytes: 256,
        }
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Acknowledged.
    Ack,
    /// Returned for redelivery.
    Requeue,
    /// Dropped without redelivery.
    Reject,
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Requeue => write!(f, "requeue"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// The result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// Queue message id.
    pub delivery_id: u64,
    /// Alert id, when the payload decoded.
    pub alert_id: Option<String>,
    /// Final state of the alert.
    pub state: ProcessingState,
    /// How the delivery was settled.
    pub settlement: Settlement,
    /// Notifications delivered.
    pub notified: usize,
    /// The error that caused a requeue or reject.
    pub error: Option<String>,
}

/// Counters of one worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Deliveries handled.
    pub handled: usize,
    /// Deliveries acknowledged.
    pub acked: usize,
    /// Deliveries requeued.
    pub requeued: usize,
    /// Deliveries rejected.
    pub rejected: usize,
}

impl WorkerStats {
    fn record(&mut self, settlement: Settlement) {
        self.handled += 1;
        match settlement {
            Settlement::Ack => self.acked += 1,
            Settlement::Requeue => self.requeued += 1,
            Settlement::Reject => self.rejected += 1,
        }
    }

    /// Adds another worker's counters.
    pub fn merge(&mut self, other: Self) {
        self.handled += other.handled;
        self.acked += other.acked;
        self.requeued += other.requeued;
        self.rejected += other.rejected;
    }
}

/// Runs the pipeline for queue deliveries.
#[derive(Debug)]
pub struct Processor<C, P, S> {
    pipeline: Arc<Pipeline<C>>,
    publisher: P,
    store: S,
    config: ProcessorConfig,
}

impl<C, P, S> Processor<C, P, S>
where
    C: CounterStore,
    P: NotificationPublisher,
    S: AlertStore,
{
    /// Creates a processor with default settings.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline<C>>, publisher: P, store: S) -> Self {
        Self::with_config(pipeline, publisher, store, ProcessorConfig::default())
    }

    /// Creates a processor with custom settings.
    #[must_use]
    pub fn with_config(
        pipeline: Arc<Pipeline<C>>,
        publisher: P,
        store: S,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            pipeline,
            publisher,
            store,
            config,
        }
    }

    /// The compiled pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline<C> {
        &self.pipeline
    }

    /// The settings.
    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Decodes `payload` and runs the pipeline at `now`, storing the alert
    /// unless it skips storage.
    ///
    /// Returns the decoded alert's id with the state reached and, on
    /// failure, the error. The id is `None` when decoding failed.
    pub async fn process(
        &self,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> (Option<String>, ProcessingState, Result<usize>) {
        let mut alert = match Alert::from_json(payload) {
            Ok(alert) => alert,
            Err(e) => {
                warn!(
                    error = %e,
                    excerpt = %excerpt(payload, self.config.excerpt_bytes),
                    "malformed alert payload"
                );
                let err = PipelineError::Malformed {
                    reason: e.to_string(),
                };
                return (None, ProcessingState::Received, Err(err));
            }
        };
        debug!(alert_id = %alert.id, source = %alert.source.kind, "alert received");

        let mut state = ProcessingState::Received;
        let result = self.process_alert(&mut alert, now, &mut state).await;
        (Some(alert.id), state, result)
    }

    async fn process_alert(
        &self,
        alert: &mut Alert,
        now: DateTime<Utc>,
        state: &mut ProcessingState,
    ) -> Result<usize> {
        let outcome = self.pipeline.run(alert, now, &self.publisher, state).await?;
        if alert.skips_storage() {
            debug!(alert_id = %alert.id, rule = %alert.mute.rule, "alert dropped");
            *state = ProcessingState::Dropped;
        } else {
            self.store.store(alert).await?;
            *state = ProcessingState::Stored;
        }
        Ok(outcome.notified)
    }

    /// Processes one delivery at `now` and settles it on `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Queue`] if the delivery cannot be settled.
    /// Pipeline errors are reflected in the report, not returned.
    pub async fn handle_at<Q: AlertQueue>(
        &self,
        queue: &Q,
        delivery: &Delivery,
        now: DateTime<Utc>,
    ) -> Result<ProcessReport> {
        let (alert_id, state, result) = self.process(&delivery.payload, now).await;
        let (settlement, state, notified, error) = match result {
            Ok(notified) => (Settlement::Ack, state, notified, None),
            Err(e) => {
                let settlement = self.settlement_for(&e, delivery);
                let state = match settlement {
                    Settlement::Requeue => ProcessingState::Requeued,
                    _ => ProcessingState::Rejected,
                };
                warn!(
                    alert_id = alert_id.as_deref().unwrap_or("-"),
                    message_id = delivery.id,
                    attempt = delivery.attempt,
                    class = %e.class(),
                    decision = %settlement,
                    error = %e,
                    "alert not processed"
                );
                (settlement, state, 0, Some(e.to_string()))
            }
        };

        match settlement {
            Settlement::Ack => queue.ack(delivery).await?,
            Settlement::Requeue => queue.requeue(delivery).await?,
            Settlement::Reject => queue.reject(delivery).await?,
        }

        Ok(ProcessReport {
            delivery_id: delivery.id,
            alert_id,
            state,
            settlement,
            notified,
            error,
        })
    }

    /// Processes one delivery now and settles it on `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Queue`] if the delivery cannot be settled.
    pub async fn handle<Q: AlertQueue>(&self, queue: &Q, delivery: &Delivery) -> Result<ProcessReport> {
        self.handle_at(queue, delivery, Utc::now()).await
    }

    fn settlement_for(&self, err: &PipelineError, delivery: &Delivery) -> Settlement {
        match err.class() {
            ErrorClass::Recoverable if delivery.attempt < self.config.max_attempts => {
                Settlement::Requeue
            }
            ErrorClass::Recoverable => {
                warn!(
                    message_id = delivery.id,
                    attempt = delivery.attempt,
                    max_attempts = self.config.max_attempts,
                    "giving up on message"
                );
                Settlement::Reject
            }
            ErrorClass::Config | ErrorClass::Malformed | ErrorClass::Rejected => Settlement::Reject,
        }
    }

    /// Pulls deliveries from `queue` until `shutdown` turns true or the
    /// queue is closed and drained. The alert in hand is always finished.
    ///
    /// Queue failures are logged and never stop the worker: a failed receive
    /// is retried after [`RECEIVE_BACKOFF`], a delivery that cannot be
    /// settled is left to the queue's redelivery.
    pub async fn run_worker<Q: AlertQueue>(
        &self,
        worker: usize,
        queue: &Q,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!(worker, pipeline = %self.pipeline.name(), "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let received = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = queue.receive() => received,
            };
            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    warn!(worker, error = %e, "receive failed, backing off");
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {}
                        () = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                    continue;
                }
            };
            match self.handle(queue, &delivery).await {
                Ok(report) => stats.record(report.settlement),
                Err(e) => warn!(
                    worker,
                    message_id = delivery.id,
                    attempt = delivery.attempt,
                    error = %e,
                    "settling delivery failed"
                ),
            }
        }
        info!(
            worker,
            handled = stats.handled,
            acked = stats.acked,
            requeued = stats.requeued,
            rejected = stats.rejected,
            "worker stopped"
        );
        stats
    }
}

/// Returns at most `max` bytes of `payload` as lossy UTF-8.
fn excerpt(payload: &[u8], max: usize) -> String {
    let cut = &payload[..payload.len().min(max)];
    let mut text = String::from_utf8_lossy(cut).into_owned();
    if payload.len() > max {
        text.push_str("...");
    }
    text
}
