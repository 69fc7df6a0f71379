//! Retry budget and the mutation wait timer

use std::time::Duration;
use tokio::time::Instant;

use crate::config::ExecutionConfig;

/// Tries granted to a manually started mutation
pub const DEFAULT_MUTATION_RETRIES: u32 = 5;

/// How long a pending mutation waits between ticks
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Retry configuration for mutation scripts
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub mutation_retries: u32,
    pub interval: Duration,
    /// Re-issue the request on every tick (and after failures) while tries remain
    pub resubmit: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            mutation_retries: DEFAULT_MUTATION_RETRIES,
            interval: DEFAULT_RETRY_INTERVAL,
            resubmit: false,
        }
    }
}

impl From<&ExecutionConfig> for RetryConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            mutation_retries: config.mutation_retries,
            interval: Duration::from_millis(config.mutation_retry_interval_ms),
            resubmit: config.resubmit_on_retry,
        }
    }
}

impl RetryConfig {
    /// Tries for a new execution.
    ///
    /// A mutation only gets a budget when a user started it; a passive load of
    /// a mutation script gets none so it is never re-run behind the user's back.
    pub fn initial_tries(&self, has_mutation: bool, manual: bool) -> u32 {
        match (has_mutation, manual) {
            (true, true) => self.mutation_retries,
            (true, false) => 0,
            (false, _) => 1,
        }
    }
}

/// Observable retry state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub remaining_tries: u32,
    pub mutation_pending: bool,
}

/// What a timer tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is pending; the timer stays quiet
    Idle,
    /// Still pending, another tick is scheduled
    Waiting { remaining: u32 },
    /// The budget ran out while the mutation was still pending
    Exhausted,
}

/// Counts a pending mutation down, one try per elapsed interval
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    config: RetryConfig,
    remaining: u32,
    mutation_pending: bool,
    deadline: Option<Instant>,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            remaining: 0,
            mutation_pending: false,
            deadline: None,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Start counting for a new execution. Returns false when the budget is
    /// already empty and nothing should be submitted.
    pub fn arm(&mut self, remaining: u32, has_mutation: bool) -> bool {
        self.remaining = remaining;
        self.mutation_pending = has_mutation && remaining > 0;
        self.deadline = None;
        self.schedule();
        remaining > 0
    }

    /// Schedule the next tick if a mutation is still pending
    pub fn schedule(&mut self) {
        self.deadline = if self.mutation_pending && self.remaining > 0 {
            Some(Instant::now() + self.config.interval)
        } else {
            None
        };
    }

    /// Stop the timer without touching the counters
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn on_tick(&mut self) -> TickOutcome {
        if !self.mutation_pending || self.remaining == 0 {
            self.deadline = None;
            return TickOutcome::Idle;
        }

        self.remaining -= 1;
        if self.remaining == 0 {
            self.mutation_pending = false;
            self.deadline = None;
            return TickOutcome::Exhausted;
        }

        self.schedule();
        TickOutcome::Waiting {
            remaining: self.remaining,
        }
    }

    /// An attempt failed; spend one try
    pub fn record_failure(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Stop waiting on the mutation but keep the remaining count visible
    pub fn settle(&mut self) {
        self.mutation_pending = false;
        self.deadline = None;
    }

    /// Terminal outcome: nothing left to wait for
    pub fn reset(&mut self) {
        self.remaining = 0;
        self.mutation_pending = false;
        self.deadline = None;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_mutation_pending(&self) -> bool {
        self.mutation_pending
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn state(&self) -> RetryState {
        RetryState {
            remaining_tries: self.remaining,
            mutation_pending: self.mutation_pending,
        }
    }
}
