//! Rate-limit stage: counts alerts per group and bucket.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hush_core::{Alert, RateLimitStatus};
use tracing::{debug, warn};

use super::RuleCondition;
use crate::config::{OnError, RateLimitConfig};
use crate::error::Result;
use crate::ratelimit::{CounterStore, RateLimiter};

const STAGE: &str = "ratelimit";

/// The compiled global rate limit.
#[derive(Debug)]
pub struct RateLimitStage<C> {
    condition: RuleCondition,
    limiter: RateLimiter<C>,
    on_error: OnError,
}

impl<C: CounterStore> RateLimitStage<C> {
    /// Compiles the rate-limit rule over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`](crate::PipelineError::Config) for a zero burst or period and
    /// [`PipelineError::InvalidRule`](crate::PipelineError::InvalidRule) for a bad condition.
    pub fn compile(config: &RateLimitConfig, store: C) -> Result<Self> {
        config.validate()?;
        let condition = RuleCondition::compile(STAGE, Some("rate_limit"), 0, &config.condition)?;
        Ok(Self {
            condition,
            limiter: RateLimiter::new(config.burst, Duration::from_secs(config.period_secs), store),
            on_error: config.on_error,
        })
    }

    /// The underlying limiter.
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter<C> {
        &self.limiter
    }

    /// The counter store failure policy.
    #[must_use]
    pub const fn on_error(&self) -> OnError {
        self.on_error
    }

    /// Counts the alert and records whether it is limited.
    ///
    /// # Errors
    ///
    /// Returns the counter store error when the policy is [`OnError::Fail`].
    pub async fn process(&self, alert: &mut Alert, now: DateTime<Utc>) -> Result<()> {
        if !self.condition.test(alert) {
            return Ok(());
        }
        match self.limiter.check(&alert.group_hash, &alert.id, now).await {
            Ok(decision) => {
                if decision.limited {
                    debug!(alert_id = %alert.id, group_hash = %alert.group_hash, count = decision.count, "alert rate limited");
                }
                alert.rate_limit = RateLimitStatus {
                    limited: decision.limited,
                    count: decision.count,
                };
                Ok(())
            }
            Err(e) if self.on_error == OnError::Allow => {
                warn!(alert_id = %alert.id, error = %e, "counter store failed, letting alert through");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
