//! Bounded retry and anti-bot cooldown
//!
//! Retry attempts are counted per unit of work (one page) and reset for the
//! next unit. Cooldowns are counted per task and never reset. The two
//! budgets are independent.

use crate::config::RetryConfig;
use crate::crawler::fetcher::{FetchClient, FetchError, PageKind, RenderedPage};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff and cooldown limits
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the backoff randomly added or removed
    pub jitter: f64,
    /// Cooldowns allowed per task
    pub max_cooldowns: u32,
    pub cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
            max_cooldowns: config.max_cooldowns,
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }

    /// Backoff before retry number `failures` (1-based): exponential,
    /// capped, then jittered
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        let base = self
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);

        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// What to do after a failed fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then fetch the same page again
    Retry(Duration),
    /// Anti-bot backpressure: pause the whole task, then fetch again
    Cooldown(Duration),
    /// Stop trying this page
    GiveUp,
}

/// Retry counters carried in a task's crawl state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Failed attempts on the current page
    pub attempt: u32,
    /// Cooldowns spent by the task so far
    pub cooldowns_used: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the per-page counter before fetching a new page
    pub fn begin_unit(&mut self) {
        self.attempt = 0;
    }

    /// Records a failure and decides the next step
    pub fn on_error(&mut self, policy: &RetryPolicy, error: &FetchError) -> RetryDecision {
        if error.is_retryable() {
            self.attempt += 1;
            if self.attempt < policy.max_attempts {
                return RetryDecision::Retry(policy.backoff(self.attempt));
            }
            return RetryDecision::GiveUp;
        }

        match error {
            FetchError::Blocked { .. } if self.cooldowns_used < policy.max_cooldowns => {
                self.cooldowns_used += 1;
                RetryDecision::Cooldown(policy.cooldown)
            }
            _ => RetryDecision::GiveUp,
        }
    }
}

/// Fetches a page, retrying and cooling down as the policy allows
///
/// # Returns
///
/// The rendered page, or the last error once the policy gives up
pub async fn fetch_with_retry(
    fetcher: &FetchClient,
    url: &str,
    kind: PageKind,
    policy: &RetryPolicy,
    state: &mut RetryState,
) -> Result<RenderedPage, FetchError> {
    state.begin_unit();
    loop {
        let error = match fetcher.fetch(url, kind).await {
            Ok(page) => return Ok(page),
            Err(e) => e,
        };

        match state.on_error(policy, &error) {
            RetryDecision::Retry(wait) => {
                debug!(
                    "Retrying {} in {:?} (attempt {}/{}): {}",
                    url, wait, state.attempt, policy.max_attempts, error
                );
                tokio::time::sleep(wait).await;
            }
            RetryDecision::Cooldown(wait) => {
                warn!(
                    "Anti-bot challenge at {}; cooling down {:?} ({}/{})",
                    url, wait, state.cooldowns_used, policy.max_cooldowns
                );
                tokio::time::sleep(wait).await;
            }
            RetryDecision::GiveUp => return Err(error),
        }
    }
}
