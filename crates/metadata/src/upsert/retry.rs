//! Bounded retry loop around reconciliation attempts.
//!
//! Contention here comes from short-lived row locks and serialization
//! failures, so the backoff is plain full jitter: a uniform sleep in
//! `[0, retry_interval)` between attempts, no exponential growth.

use super::error::{TransactionError, UpsertError};
use cairn_core::InstanceId;
use cairn_core::config::UpsertConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Re-runs a failing attempt up to `max_retries` more times.
#[derive(Clone, Debug)]
pub struct RetrySupervisor {
    max_retries: u32,
    retry_interval: Duration,
}

impl RetrySupervisor {
    pub fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval,
        }
    }

    pub fn from_config(config: &UpsertConfig) -> Self {
        Self::new(config.max_retries, config.retry_interval())
    }

    /// Total attempts made before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Draw a sleep duration uniformly from `[0, retry_interval)`.
    pub fn backoff(&self) -> Duration {
        let bound = u64::try_from(self.retry_interval.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..bound))
    }

    /// Run `attempt` until it succeeds, attempts run out, or `cancel` fires.
    ///
    /// `attempt` receives the zero-based attempt number. Each call must start
    /// from scratch (a fresh transaction); nothing is carried between calls.
    /// Cancellation drops the in-flight attempt and is never retried.
    pub async fn run<T, F, Fut>(
        &self,
        instance_id: &InstanceId,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, UpsertError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransactionError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt_no = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(instance_id, attempt_no)),
                result = attempt(attempt_no) => result,
            };

            let err = match result {
                Ok(value) => {
                    if attempt_no > 0 {
                        tracing::info!(
                            instance_id = %instance_id,
                            attempt = attempt_no,
                            "Upsert succeeded on retry"
                        );
                    } else {
                        tracing::info!(instance_id = %instance_id, "Upsert succeeded on first attempt");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            attempt_no += 1;
            if attempt_no >= max_attempts {
                tracing::error!(
                    instance_id = %instance_id,
                    attempts = attempt_no,
                    error = %err,
                    "Upsert failed on every attempt"
                );
                return Err(UpsertError::RetriesExhausted {
                    instance_id: instance_id.to_string(),
                    attempts: attempt_no,
                    last: err,
                });
            }

            let delay = self.backoff();
            tracing::warn!(
                instance_id = %instance_id,
                attempt = attempt_no,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Upsert attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(instance_id, attempt_no)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancelled(&self, instance_id: &InstanceId, attempt_no: u32) -> UpsertError {
        tracing::warn!(
            instance_id = %instance_id,
            attempt = attempt_no,
            "Upsert cancelled"
        );
        UpsertError::Cancelled {
            instance_id: instance_id.to_string(),
        }
    }
}
