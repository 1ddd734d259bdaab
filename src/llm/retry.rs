//! Retry with exponential backoff and jitter for transport calls.
//!
//! Respects `Retry-After` metadata carried on
//! [`AgentError::External`](crate::types::AgentError::External) and invokes
//! a host-supplied fallback hook after persistent rate limiting.

use crate::signal::AbortSignal;
use crate::types::{AgentError, Result};
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// How many consecutive 429 responses trigger the fallback hook.
const PERSISTENT_429_THRESHOLD: u32 = 3;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub initial_delay: Duration,
    /// Backoff delay cap.
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Hook invoked after persistent rate limiting, e.g. to downgrade the model.
pub type PersistentRateLimitHook = dyn Fn() + Send + Sync;

/// Whether an error is worth retrying: 429 and 5xx transport failures.
fn should_retry(error: &AgentError) -> bool {
    match error {
        AgentError::External { status, .. } => {
            matches!(status, Some(429)) || matches!(status, Some(s) if (500..600).contains(s))
        }
        _ => false,
    }
}

fn is_rate_limit(error: &AgentError) -> bool {
    matches!(
        error,
        AgentError::External {
            status: Some(429),
            ..
        }
    )
}

fn retry_after(error: &AgentError) -> Option<Duration> {
    match error {
        AgentError::External { retry_after, .. } => *retry_after,
        _ => None,
    }
}

/// Run `operation` with exponential backoff and jitter.
///
/// Honors the abort signal between attempts, prefers a server-provided
/// `Retry-After` delay over computed backoff, and calls `on_persistent_429`
/// once three consecutive rate-limit errors have been observed (the attempt
/// that follows the hook is free).
pub async fn retry_with_backoff<T, F, Fut>(
    mut operation: F,
    options: &RetryOptions,
    signal: &AbortSignal,
    on_persistent_429: Option<&PersistentRateLimitHook>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut current_delay = options.initial_delay;
    let mut consecutive_429 = 0u32;
    let mut attempt = 0u32;

    loop {
        signal.check()?;
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if consecutive_429 > 0 {
                    info!("Recovered from rate limiting after {} attempts", attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if !should_retry(&error) || attempt >= options.max_attempts {
                    return Err(error);
                }

                if is_rate_limit(&error) {
                    consecutive_429 += 1;
                    warn!(
                        attempt,
                        max_attempts = options.max_attempts,
                        "Rate limited by provider"
                    );

                    if consecutive_429 >= PERSISTENT_429_THRESHOLD {
                        if let Some(hook) = on_persistent_429 {
                            warn!("Persistent rate limiting detected, invoking fallback hook");
                            hook();
                            consecutive_429 = 0;
                            // Retry immediately after the fallback; the
                            // attempt does not count against the budget.
                            attempt -= 1;
                            continue;
                        }
                    }
                } else {
                    consecutive_429 = 0;
                    warn!(attempt, max_attempts = options.max_attempts, error = %error, "Transient transport failure");
                }

                let delay = match retry_after(&error) {
                    Some(requested) => {
                        debug!(delay_ms = requested.as_millis() as u64, "Using Retry-After delay");
                        requested
                    }
                    None => {
                        let jittered = apply_jitter(current_delay);
                        current_delay = (current_delay * 2).min(options.max_delay);
                        debug!(delay_ms = jittered.as_millis() as u64, "Using backoff delay");
                        jittered
                    }
                };

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = signal.cancelled() => return Err(AgentError::Cancelled),
                }
            }
        }
    }
}

/// +/-30% jitter so synchronized clients do not retry in lockstep.
fn apply_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(0.7..1.3);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}
