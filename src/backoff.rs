//! Retry timing for station-mode joins.
//!
//! The wait after the n-th consecutive failure is
//! `min(base * factor^(n-1), cap)`: the first failure of a streak waits the
//! base delay, each further failure multiplies it. Waits are measured from
//! the moment the failed attempt gave up. A success resets the streak.

use crate::config::BackoffConfig;
use crate::platform::elapsed_ms;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    base_delay_ms: u64,
    cap_delay_ms: u64,
    factor: u64,
    current_delay_ms: u64,
    attempt_count: u32,
    last_attempt_ms: Option<u64>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let base_delay_ms = config.base_delay_ms.max(1);
        let cap_delay_ms = config.cap_delay_ms.max(base_delay_ms);
        Self {
            base_delay_ms,
            cap_delay_ms,
            factor: u64::from(config.factor.max(1)),
            current_delay_ms: base_delay_ms,
            attempt_count: 0,
            last_attempt_ms: None,
        }
    }

    /// An attempt that concluded at `now_ms` failed.
    pub fn on_failure(&mut self, now_ms: u64) {
        if self.attempt_count > 0 {
            self.current_delay_ms = self
                .current_delay_ms
                .saturating_mul(self.factor)
                .min(self.cap_delay_ms);
        }
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_ms = Some(now_ms);
    }

    pub fn on_success(&mut self) {
        self.reset();
    }

    /// Back to the base delay with an empty failure streak; the next retry
    /// is due immediately.
    pub fn reset(&mut self) {
        self.current_delay_ms = self.base_delay_ms;
        self.attempt_count = 0;
        self.last_attempt_ms = None;
    }

    pub fn due_for_retry(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            Some(last) => elapsed_ms(now_ms, last) >= self.current_delay_ms,
            None => true,
        }
    }

    /// Milliseconds until the next retry is due, zero when already due.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        match self.last_attempt_ms {
            Some(last) => self
                .current_delay_ms
                .saturating_sub(elapsed_ms(now_ms, last)),
            None => 0,
        }
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.current_delay_ms
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_attempt_ms(&self) -> Option<u64> {
        self.last_attempt_ms
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn cap_delay_ms(&self) -> u64 {
        self.cap_delay_ms
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
