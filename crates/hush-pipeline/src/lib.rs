//! Rule pipeline for the hush alert processor.
//!
//! `hush-pipeline` compiles operator rule documents once at startup and runs
//! every consumed alert through five stages in fixed order.
//!
//! # Features
//!
//! - **Transform**: first matching rule rewrites fields, nested child rules
//!   see the rewritten alert
//! - **Silence**: mutes alerts during daily or weekly windows, optionally
//!   dropping them
//! - **Grouping**: BLAKE3 group hash over a rule-selected field list
//! - **Rate limiting**: fixed, epoch-aligned buckets per group hash, counted
//!   in memory or in Redis (`redis` feature)
//! - **Notification routing**: matching rules accumulate destinations until a
//!   terminal rule, with fire-and-collect publishing
//! - **Orchestration**: [`Processor`] settles each queue delivery with ack,
//!   requeue or reject according to [`ErrorClass`]
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use hush_core::{Alert, Source};
//! use hush_pipeline::{
//!     MemoryCounterStore, MemoryPublisher, Pipeline, PipelineConfig, ProcessingState,
//! };
//!
//! # tokio_test_block(async {
//! let config = PipelineConfig::from_yaml(r"
//! silence_rules:
//!   - name: dev
//!     if: labels[env] == 'dev'
//! default_group_by: ['labels[host]']
//! default_notification_channels: [mail/oncall]
//! ").unwrap();
//! let pipeline = Pipeline::compile(&config, MemoryCounterStore::new()).unwrap();
//!
//! let publisher = MemoryPublisher::new();
//! let mut alert = Alert::new(Source::new("syslog", "edge-1")).label("host", "h1");
//! let mut state = ProcessingState::Received;
//! pipeline.run(&mut alert, Utc::now(), &publisher, &mut state).await.unwrap();
//!
//! assert_eq!(state, ProcessingState::Routed);
//! assert_eq!(alert.notifications, vec!["mail/oncall"]);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/hush-pipeline/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod ratelimit;
pub mod stages;
pub mod store;

pub use config::{
    Destination, GroupingRuleConfig, NotificationRuleConfig, OnError, PipelineConfig,
    RateLimitConfig, SilenceRuleConfig, TransformAction, TransformRuleConfig,
};
pub use error::{ErrorClass, NotificationErrors, NotificationFailure, PipelineError, Result};
pub use notify::{LogPublisher, MemoryPublisher, Notification, NotificationPublisher, publish_all};
pub use pipeline::{Pipeline, ProcessingState, RuleCounts, RunOutcome};
pub use processor::{
    ProcessReport, Processor, ProcessorConfig, RECEIVE_BACKOFF, Settlement, WorkerStats,
};
pub use queue::{AlertQueue, Delivery, MemoryQueue, QueueStats};
#[cfg(feature = "redis")]
pub use ratelimit::RedisCounterStore;
pub use ratelimit::{CounterStore, MemoryCounterStore, RateDecision, RateLimiter};
pub use stages::{Flow, RuleCondition};
pub use store::{AlertStore, MemoryStore};
