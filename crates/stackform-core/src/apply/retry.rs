// ── Retry and readiness ──
//
// Every platform call goes through `call_with_retry`: a per-attempt
// timeout, then bounded exponential backoff on transient errors. Waiting
// for a replacement to become ready uses the same backoff shape, polled
// until a deadline or cancellation.

use std::future::Future;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::Address;

/// Backoff parameters for transient platform errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Millisecond delays, no jitter. For tests and the sandbox.
    pub fn fast(max_retries: usize) -> Self {
        Self {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Run `op` with a per-attempt `timeout`, retrying transient failures.
///
/// A rate-limit response waits out its `Retry-After` (capped at the
/// policy's max delay) before the backoff delay applies.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    address: &Address,
    operation: &'static str,
    mut op: F,
) -> Result<T, stackform_api::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, stackform_api::Error>>,
{
    let max_delay = policy.max_delay;
    let attempt = || {
        let fut = op();
        async move {
            let result = match tokio::time::timeout(timeout, fut).await {
                Ok(r) => r,
                Err(_) => Err(stackform_api::Error::Timeout {
                    timeout_secs: timeout.as_secs(),
                }),
            };
            if let Err(stackform_api::Error::RateLimited { retry_after_secs }) = &result {
                let wait = Duration::from_secs(*retry_after_secs).min(max_delay);
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
            result
        }
    };

    attempt
        .retry(policy.backoff())
        .when(stackform_api::Error::is_transient)
        .notify(|e, dur| {
            warn!(
                address = %address,
                operation,
                delay = ?dur,
                error = %e,
                "transient platform error, retrying"
            );
        })
        .await
}

// ── Readiness ───────────────────────────────────────────────────────

/// How long and how often to poll a new resource for readiness.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(600),
        }
    }
}

impl WaitConfig {
    pub fn fast() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Poll `check` until it reports ready, the deadline passes, or `cancel`
/// fires. Check errors end the wait immediately.
pub async fn wait_until_ready<F, Fut>(
    config: &WaitConfig,
    cancel: &CancellationToken,
    address: &Address,
    mut check: F,
) -> Result<(), CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, CoreError>>,
{
    let start = Instant::now();
    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .build();
    let mut attempts = 0_u32;

    loop {
        attempts += 1;
        if check().await? {
            debug!(address = %address, attempts, "ready");
            return Ok(());
        }
        if start.elapsed() >= config.timeout {
            return Err(CoreError::Timeout {
                timeout_secs: config.timeout.as_secs(),
            });
        }
        let delay = delays.next().unwrap_or(config.max_delay);
        debug!(address = %address, attempts, delay_ms = delay.as_millis(), "not ready yet");

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}
