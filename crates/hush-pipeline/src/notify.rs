//! Notification publishing.
//!
//! This module provides the [`NotificationPublisher`] trait and two
//! implementations: [`LogPublisher`], which writes one structured log line
//! per notification, and [`MemoryPublisher`], which records notifications
//! and can be told to fail chosen destinations.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use hush_core::Alert;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::Destination;
use crate::error::{NotificationErrors, NotificationFailure, PipelineError, Result};

/// A notification for one destination.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Where to deliver.
    pub destination: Destination,
    /// The alert being notified.
    pub alert: Arc<Alert>,
}

impl Notification {
    /// Creates a notification.
    #[must_use]
    pub const fn new(destination: Destination, alert: Arc<Alert>) -> Self {
        Self { destination, alert }
    }
}

/// Delivers notifications to an external channel system.
pub trait NotificationPublisher: Send + Sync + 'static {
    /// Returns the name of this publisher.
    fn name(&self) -> &str;

    /// Publishes one notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be delivered.
    fn publish(
        &self,
        notification: &Notification,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl<P: NotificationPublisher> NotificationPublisher for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn publish(
        &self,
        notification: &Notification,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        (**self).publish(notification)
    }
}

/// Publishes `alert` to every destination concurrently, collecting failures.
///
/// Returns the number of delivered notifications.
///
/// # Errors
///
/// Returns [`NotificationErrors`] if at least one destination failed. The
/// other destinations are still attempted.
pub async fn publish_all<P: NotificationPublisher>(
    publisher: &P,
    alert: &Alert,
    destinations: &[Destination],
) -> std::result::Result<usize, NotificationErrors> {
    let alert = Arc::new(alert.clone());
    let notifications: Vec<Notification> = destinations
        .iter()
        .map(|d| Notification::new(d.clone(), Arc::clone(&alert)))
        .collect();

    let results = join_all(notifications.iter().map(|n| publisher.publish(n))).await;

    let mut sent = 0;
    let mut failures = Vec::new();
    for (notification, result) in notifications.iter().zip(results) {
        match result {
            Ok(()) => sent += 1,
            Err(e) => {
                warn!(
                    publisher = %publisher.name(),
                    alert_id = %alert.id,
                    destination = %notification.destination,
                    error = %e,
                    "notification failed"
                );
                failures.push(NotificationFailure {
                    destination: notification.destination.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(sent)
    } else {
        Err(NotificationErrors {
            attempted: notifications.len(),
            failures,
        })
    }
}

/// A publisher that logs notifications.
#[derive(Debug, Clone)]
pub struct LogPublisher {
    name: String,
}

impl LogPublisher {
    /// Creates a log publisher.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogPublisher {
    fn default() -> Self {
        Self::new("log")
    }
}

impl NotificationPublisher for LogPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(
        &self,
        notification: &Notification,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        let alert = &notification.alert;
        info!(
            publisher = %self.name,
            destination = %notification.destination,
            alert_id = %alert.id,
            group_hash = %alert.group_hash,
            severity = %alert.severity_text,
            "notification published"
        );
        async { Ok(()) }
    }
}

/// A publisher that records notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryPublisher {
    /// Creates an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish to `destination` (rendered `kind/name`) fail.
    pub fn fail_destination(&self, destination: impl Into<String>) {
        self.failing.lock().insert(destination.into());
    }

    /// Clears every injected failure.
    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    /// Returns the delivered notifications.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Returns the delivered destinations for `alert_id`, in delivery order.
    #[must_use]
    pub fn destinations_for(&self, alert_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.alert.id == alert_id)
            .map(|n| n.destination.to_string())
            .collect()
    }
}

impl NotificationPublisher for MemoryPublisher {
    fn name(&self) -> &str {
        "memory"
    }

    fn publish(
        &self,
        notification: &Notification,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        let destination = notification.destination.to_string();
        let result = if self.failing.lock().contains(&destination) {
            Err(PipelineError::Publish {
                destination,
                reason: "destination unavailable".to_string(),
            })
        } else {
            self.sent.lock().push(notification.clone());
            Ok(())
        };
        async move { result }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- {}", self.destination, self.alert.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_core::Source;

    fn alert() -> Alert {
        Alert::new(Source::new("syslog", "edge-1")).with_severity("error", 17)
    }

    fn dests(items: &[&str]) -> Vec<Destination> {
        items.iter().map(|d| d.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn publishes_to_every_destination() {
        let publisher = MemoryPublisher::new();
        let alert = alert();
        let sent = publish_all(&publisher, &alert, &dests(&["mail/oncall", "pager"]))
            .await
            .unwrap();
        assert_eq!(sent, 2);
        assert_eq!(
            publisher.destinations_for(&alert.id),
            vec!["mail/oncall", "default/pager"]
        );
    }

    #[tokio::test]
    async fn partial_failure_still_delivers_the_rest() {
        let publisher = MemoryPublisher::new();
        publisher.fail_destination("mail/oncall");
        let alert = alert();
        let err = publish_all(&publisher, &alert, &dests(&["mail/oncall", "slack/ops"]))
            .await
            .unwrap_err();
        assert_eq!(err.attempted, 2);
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].destination, "mail/oncall");
        assert!(!err.all_failed());
        assert_eq!(publisher.destinations_for(&alert.id), vec!["slack/ops"]);
    }

    #[tokio::test]
    async fn total_failure_is_reported() {
        let publisher = MemoryPublisher::new();
        publisher.fail_destination("mail/oncall");
        let err = publish_all(&publisher, &alert(), &dests(&["mail/oncall"]))
            .await
            .unwrap_err();
        assert!(err.all_failed());

        publisher.heal();
        assert_eq!(
            publish_all(&publisher, &alert(), &dests(&["mail/oncall"])).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn empty_destination_list_sends_nothing() {
        let publisher = MemoryPublisher::new();
        assert_eq!(publish_all(&publisher, &alert(), &[]).await.unwrap(), 0);
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn log_publisher_always_succeeds() {
        let publisher = LogPublisher::default();
        assert_eq!(publisher.name(), "log");
        let sent = publish_all(&publisher, &alert(), &dests(&["mail/a", "mail/b"]))
            .await
            .unwrap();
        assert_eq!(sent, 2);
    }

    #[test]
    fn notification_display() {
        let alert = Arc::new(alert());
        let n = Notification::new(Destination::new("mail", "oncall"), Arc::clone(&alert));
        assert_eq!(n.to_string(), format!("mail/oncall <- {}", alert.id));
    }
}
