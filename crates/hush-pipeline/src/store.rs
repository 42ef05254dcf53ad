//! Alert persistence seam.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hush_core::Alert;
use parking_lot::RwLock;

use crate::error::{PipelineError, Result};

/// Persists processed alerts.
pub trait AlertStore: Send + Sync + 'static {
    /// Stores one processed alert.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the alert cannot be persisted.
    fn store(&self, alert: &Alert) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl<S: AlertStore> AlertStore for Arc<S> {
    fn store(&self, alert: &Alert) -> impl std::future::Future<Output = Result<()>> + Send {
        (**self).store(alert)
    }
}

/// Keeps stored alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    alerts: RwLock<Vec<Alert>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns every stored alert.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Returns the stored alert with `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Alert> {
        self.alerts.read().iter().find(|a| a.id == id).cloned()
    }

    /// Number of stored alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    /// Returns true if nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }
}

impl AlertStore for MemoryStore {
    fn store(&self, alert: &Alert) -> impl std::future::Future<Output = Result<()>> + Send {
        let result = if self.unavailable.load(Ordering::SeqCst) {
            Err(PipelineError::Store {
                reason: "store unavailable".to_string(),
            })
        } else {
            self.alerts.write().push(alert.clone());
            Ok(())
        };
        async move { result }
    }
}
