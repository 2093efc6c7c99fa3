//! Backoff policy for calls against rate-limited external services.
//!
//! Only rate-limit signals are retried here; every other error is returned
//! to the caller on the first occurrence.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_retry::RetryIf;

use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            jitter_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            jitter_ms,
        }
    }

    /// Policy that performs a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, 0, 0)
    }

    /// Un-jittered delay before retry number `retry` (0-based):
    /// `base_delay * 2^retry`, saturating.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.min(32);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// The delays slept between attempts, with jitter applied.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let policy = self.clone();
        (0..policy.max_attempts.saturating_sub(1)).map(move |retry| {
            let jitter = if policy.jitter_ms == 0 {
                0
            } else {
                rand::rng().random_range(0..=policy.jitter_ms)
            };
            policy.base_delay(retry) + Duration::from_millis(jitter)
        })
    }

    /// Runs `operation` until it succeeds, fails with a non-rate-limit
    /// error, or the attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, service: &str, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 0u32;
        let max_attempts = self.max_attempts.max(1);
        RetryIf::spawn(
            self.delays(),
            || {
                attempt += 1;
                if attempt > 1 {
                    tracing::warn!(service, attempt, max_attempts, "rate limited, retrying after backoff");
                }
                operation()
            },
            |err: &AppError| err.is_rate_limited(),
        )
        .await
    }
}
