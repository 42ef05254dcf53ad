//! JSON-lines input and output.
//!
//! [`feed`] reads one alert per line into a [`MemoryQueue`]; [`JsonLinesStore`]
//! writes every stored alert as one JSON line.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use hush_core::Alert;
use hush_pipeline::{AlertStore, MemoryQueue, PipelineError};
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::Result;

/// An [`AlertStore`] appending alerts to a writer as JSON lines.
pub struct JsonLinesStore {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonLinesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesStore").finish_non_exhaustive()
    }
}

impl JsonLinesStore {
    /// Writes to `writer`.
    #[must_use]
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Appends to the file at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Writes to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Flushes buffered output.
    ///
    /// # Errors
    ///
    /// Returns the writer's error.
    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    fn write_alert(&self, alert: &Alert) -> Result<()> {
        let mut line = serde_json::to_vec(alert)?;
        line.push(b'\n');
        self.writer.lock().write_all(&line)?;
        Ok(())
    }
}

impl AlertStore for JsonLinesStore {
    fn store(&self, alert: &Alert) -> impl std::future::Future<Output = hush_pipeline::Result<()>> + Send {
        let result = self.write_alert(alert).map_err(|e| PipelineError::Store {
            reason: e.to_string(),
        });
        async move { result }
    }
}

/// Pushes every non-blank line of `reader` onto `queue`, then closes it.
///
/// Stops early once `shutdown` turns true. Returns the number of lines fed.
///
/// # Errors
///
/// Returns an error if reading fails or the queue refuses a message.
pub async fn feed<R>(reader: R, queue: &MemoryQueue, mut shutdown: watch::Receiver<bool>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut fed = 0;
    let result = loop {
        let line = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(fed, "feeder interrupted");
                    break Ok(fed);
                }
                continue;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match queue.push(line) {
                Ok(_) => fed += 1,
                Err(e) => break Err(e.into()),
            },
            Ok(None) => break Ok(fed),
            Err(e) => break Err(e.into()),
        }
    };
    queue.close();
    info!(fed, "input exhausted, queue closed");
    result
}
