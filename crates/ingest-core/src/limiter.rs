use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, Result};

const MIN_PERMITS: usize = 1;
const BASE_COOLDOWN: Duration = Duration::from_millis(500);
const MAX_COOLDOWN: Duration = Duration::from_secs(30);

struct LimiterInner {
    ceiling: usize,
    current: usize,
    in_flight: usize,
    consecutive_throttles: u32,
    cooldown_until: Option<Instant>,
}

/// Adaptive concurrency limiter, one per external provider plus one per
/// write target (C2, §4.2). Widens toward `ceiling` on success, halves with
/// an exponential, capped cooldown on throttle.
pub struct AdaptiveLimiter {
    name: String,
    inner: Mutex<LimiterInner>,
    notify: Notify,
}

impl AdaptiveLimiter {
    pub fn new(name: impl Into<String>, ceiling: usize) -> Arc<Self> {
        let ceiling = ceiling.max(MIN_PERMITS);
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(LimiterInner {
                ceiling,
                current: ceiling,
                in_flight: 0,
                consecutive_throttles: 0,
                cooldown_until: None,
            }),
            notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until a slot is free or `cancel` fires. Returns a guard that
    /// releases the slot on drop, so Release always runs, including on
    /// early return or panic-unwind.
    pub async fn acquire(self: &Arc<Self>, cancel: &CancellationToken) -> Result<Permit> {
        loop {
            if cancel.is_cancelled() {
                return Err(IngestError::Canceled);
            }

            let wait = {
                let mut guard = self.inner.lock().expect("limiter mutex poisoned");
                if let Some(until) = guard.cooldown_until {
                    if until > Instant::now() {
                        Some(until)
                    } else {
                        guard.cooldown_until = None;
                        None
                    }
                } else {
                    None
                }
            };

            if let Some(until) = wait {
                tokio::select! {
                    _ = tokio::time::sleep_until(until) => continue,
                    _ = cancel.cancelled() => return Err(IngestError::Canceled),
                }
            }

            {
                let mut guard = self.inner.lock().expect("limiter mutex poisoned");
                if guard.in_flight < guard.current {
                    guard.in_flight += 1;
                    return Ok(Permit { limiter: Arc::clone(self) });
                }
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return Err(IngestError::Canceled),
            }
        }
    }

    fn release(&self) {
        let mut guard = self.inner.lock().expect("limiter mutex poisoned");
        guard.in_flight = guard.in_flight.saturating_sub(1);
        drop(guard);
        self.notify.notify_one();
    }

    /// Widens the permit count toward the ceiling and resets the throttle
    /// streak.
    pub fn report_success(&self) {
        let mut guard = self.inner.lock().expect("limiter mutex poisoned");
        guard.consecutive_throttles = 0;
        if guard.current < guard.ceiling {
            guard.current += 1;
        }
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Halves the permit count and schedules a capped exponential cooldown.
    pub fn report_throttle(&self) {
        let mut guard = self.inner.lock().expect("limiter mutex poisoned");
        guard.current = (guard.current / 2).max(MIN_PERMITS);
        guard.consecutive_throttles = guard.consecutive_throttles.saturating_add(1);
        let backoff = BASE_COOLDOWN
            .checked_mul(1u32.checked_shl(guard.consecutive_throttles.min(6)).unwrap_or(u32::MAX))
            .unwrap_or(MAX_COOLDOWN)
            .min(MAX_COOLDOWN);
        guard.cooldown_until = Some(Instant::now() + backoff);
    }

    #[cfg(test)]
    pub fn current_permits(&self) -> usize {
        self.inner.lock().expect("limiter mutex poisoned").current
    }
}

/// RAII guard returned by [`AdaptiveLimiter::acquire`]; releases the slot on
/// drop so Release always runs, including on error paths.
pub struct Permit {
    limiter: Arc<AdaptiveLimiter>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_round_trip() {
        let limiter = AdaptiveLimiter::new("test", 2);
        let cancel = CancellationToken::new();
        let p1 = limiter.acquire(&cancel).await.unwrap();
        let p2 = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.inner.lock().unwrap().in_flight, 2);
        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn throttle_halves_then_success_widens() {
        let limiter = AdaptiveLimiter::new("test", 8);
        limiter.report_throttle();
        assert_eq!(limiter.current_permits(), 4);
        limiter.report_success();
        assert_eq!(limiter.current_permits(), 5);
    }

    #[tokio::test]
    async fn cancellation_is_reported_before_blocking() {
        let limiter = AdaptiveLimiter::new("test", 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = limiter.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, IngestError::Canceled));
    }

    #[tokio::test]
    async fn never_drops_below_minimum_permit() {
        let limiter = AdaptiveLimiter::new("test", 1);
        for _ in 0..5 {
            limiter.report_throttle();
        }
        assert_eq!(limiter.current_permits(), MIN_PERMITS);
    }
}
