//! Backoff policy and the single coordinating schedule for queued validations.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
    time::Duration,
};
use time::OffsetDateTime;

use crate::config::RetryConfig;

/// Exponential backoff: `min(base * 2^(attempt - 1), max)`, attempts below 1 count as 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts_per_session: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            max_attempts_per_session: config.max_attempts_per_session,
        }
    }

    pub fn delay_for_attempt(&self, attempt: i64) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = u32::try_from(exponent)
            .ok()
            .and_then(|shift| 1u64.checked_shl(shift))
            .filter(|factor| *factor != 0)
            .unwrap_or(u64::MAX);

        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Min-heap of `(next_retry_at, token)` plus per-session attempt counters.
///
/// Rescheduling a token pushes a fresh heap entry; stale entries are skipped
/// when popped because they no longer match the token's current slot.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    queue: BinaryHeap<Reverse<(OffsetDateTime, String)>>,
    scheduled: HashMap<String, OffsetDateTime>,
    attempts: HashMap<String, u32>,
    in_flight: HashSet<String>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Set (or move) the token's next eligible time
    pub fn schedule(&mut self, purchase_token: &str, at: OffsetDateTime) {
        self.scheduled.insert(purchase_token.to_string(), at);
        self.queue.push(Reverse((at, purchase_token.to_string())));
    }

    /// Pop every token due at `now`, earliest first
    pub fn take_due(&mut self, now: OffsetDateTime) -> Vec<String> {
        let mut due = Vec::new();

        while let Some(Reverse((at, _))) = self.queue.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, token))) = self.queue.pop() else {
                break;
            };
            if self.scheduled.get(&token) == Some(&at) {
                self.scheduled.remove(&token);
                due.push(token);
            }
        }

        due
    }

    /// Claim the token for one outstanding call; false if a call is already running
    pub fn try_begin(&mut self, purchase_token: &str) -> bool {
        self.in_flight.insert(purchase_token.to_string())
    }

    pub fn finish(&mut self, purchase_token: &str) {
        self.in_flight.remove(purchase_token);
    }

    pub fn is_in_flight(&self, purchase_token: &str) -> bool {
        self.in_flight.contains(purchase_token)
    }

    /// Count a failed attempt this session and return the new total
    pub fn record_failure(&mut self, purchase_token: &str) -> u32 {
        let count = self.attempts.entry(purchase_token.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn failures(&self, purchase_token: &str) -> u32 {
        self.attempts.get(purchase_token).copied().unwrap_or(0)
    }

    pub fn exhausted(&self, purchase_token: &str) -> bool {
        self.failures(purchase_token) >= self.policy.max_attempts_per_session
    }

    pub fn next_retry_at(&self, purchase_token: &str) -> Option<OffsetDateTime> {
        self.scheduled.get(purchase_token).copied()
    }

    /// Earliest pending slot, if any
    pub fn next_due(&self) -> Option<OffsetDateTime> {
        self.scheduled.values().min().copied()
    }

    /// Drop all bookkeeping for a token that left the queue
    pub fn forget(&mut self, purchase_token: &str) {
        self.scheduled.remove(purchase_token);
        self.attempts.remove(purchase_token);
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.scheduled.clear();
        self.attempts.clear();
        self.in_flight.clear();
    }
}
