use std::time::Duration;

use rand::Rng;

use crate::error::IngestError;

/// Jittered exponential backoff policy for the Source Client's retry loop
/// (§4.3): base 500 ms, factor 2, capped at 30 s, at most 5 attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2,
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt number `attempt` (1-indexed), with full jitter:
    /// a random duration in `[0, ideal]` rather than a fixed wait, so that
    /// concurrent workers backing off from the same provider don't retry in
    /// lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt.saturating_sub(1));
        let ideal = self.base.saturating_mul(exp).min(self.max);
        let jitter_ms = rand::thread_rng().gen_range(0..=ideal.as_millis().max(1) as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Runs `op` under the retry policy described in §4.3: retries on
/// retryable errors (`Transport`, `Throttled`) with jittered exponential
/// backoff, gives up after `policy.max_attempts`, and returns immediately on
/// a non-retryable error (e.g. `NotFound`, `Auth`).
///
/// `on_attempt` is called after every attempt with the outcome, so the
/// caller can drive `AdaptiveLimiter::report_success`/`report_throttle`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    mut op: F,
    mut on_attempt: impl FnMut(&Result<T, IngestError>),
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, IngestError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = op().await;
        on_attempt(&outcome);

        match &outcome {
            Ok(_) => return outcome,
            Err(e) if !e.is_retryable() => return outcome,
            Err(e) if attempt >= e.max_attempts(policy.max_attempts) => return outcome,
            Err(_) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_never_exceeds_cap() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=10 {
            assert!(policy.delay_for(attempt) <= policy.max);
        }
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
            ..Default::default()
        };
        let result: Result<(), IngestError> = retry_with_backoff(
            policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(IngestError::Transport {
                        provider: "primary".into(),
                        endpoint: "prices".into(),
                        message: "timeout".into(),
                    })
                }
            },
            |_| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), policy.max_attempts);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), IngestError> = retry_with_backoff(
            BackoffPolicy::default(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(IngestError::Auth {
                        provider: "primary".into(),
                        message: "bad key".into(),
                    })
                }
            },
            |_| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
