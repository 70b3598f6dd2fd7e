//! Poll pacing with capped exponential backoff and jitter.
//!
//! Every "poll until" loop in the protocol sleeps through a [`Poller`]: a
//! fixed interval while the store answers, growing delays while it does not,
//! and an immediate wake-up when the session is cancelled.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pacing parameters for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Delay between healthy polls.
    pub interval: Duration,
    /// Upper bound for the delay after repeated failures.
    pub max_backoff: Duration,
    /// Symmetric jitter range, 0.0 to 1.0.
    pub jitter: f64,
}

impl PollPolicy {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_backoff: Duration::from_secs(30),
            jitter: 0.2,
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

/// Delay after `failures` consecutive failures.
///
/// `min(max_backoff, interval * 2^failures) * (1 ± jitter)`, where `random`
/// in `[0, 1)` picks the point in the jitter range. Zero failures yields the
/// plain interval.
pub fn backoff_delay(policy: &PollPolicy, failures: u32, random: f64) -> Duration {
    if failures == 0 {
        return policy.interval;
    }
    let exponential = policy
        .interval
        .saturating_mul(1u32 << failures.min(16))
        .min(policy.max_backoff);
    if policy.jitter == 0.0 {
        return exponential;
    }
    let factor = 1.0 + (random * 2.0 - 1.0) * policy.jitter;
    exponential.mul_f64(factor.max(0.0))
}

/// Tracks consecutive failures for one loop and sleeps accordingly.
#[derive(Debug, Clone)]
pub struct Poller {
    policy: PollPolicy,
    failures: u32,
}

impl Poller {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy, failures: 0 }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn next_delay(&self) -> Duration {
        backoff_delay(&self.policy, self.failures, rand::random::<f64>())
    }

    /// Sleeps for the next delay. Returns `false` if cancelled first.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.next_delay()) => true,
        }
    }
}
