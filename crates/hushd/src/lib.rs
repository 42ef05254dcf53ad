//! hushd - hush alert pipeline processor
//!
//! Reads alerts as JSON lines, runs them through a compiled rule pipeline
//! with a pool of workers, and writes the processed alerts back out as JSON
//! lines.
//!
//! # Features
//!
//! - **`run`**: long-running processor with graceful shutdown on Ctrl-C
//! - **`check`**: validates and compiles a rule document without processing
//! - **`eval`**: evaluates one condition against one alert
//! - **Shared counters**: rate limits across processes through Redis when
//!   built with the `redis` feature

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/hushd/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod daemon;
pub mod error;
pub mod settings;
pub mod sink;

pub use daemon::{check, eval, run};
pub use error::{DaemonError, Result};
pub use settings::{Endpoint, LogFormat, MAX_WORKERS, ProcessorSettings};
pub use sink::{JsonLinesStore, feed};
