//! Authentication retry state machine.
//!
//! # Responsibilities
//! - Classify each physical attempt by its status code
//! - Bound the number of attempts per logical call
//!
//! # Design Decisions
//! - Only `401` and `412` are retryable, and only if the authentication
//!   handler agrees; everything else is final
//! - Retries are immediate: no backoff, no jitter
//! - Transport errors never reach this machine; failover owns them

/// Why an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unauthorized,
    PreconditionFailed,
    Forbidden,
    Status(u16),
}

/// Outcome of one physical attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// 2xx, or 304 to be served from cache.
    Success,
    RetryableFailure(FailureKind),
    FatalFailure(FailureKind),
}

pub fn classify(status: u16) -> Attempt {
    match status {
        200..=299 | 304 => Attempt::Success,
        401 => Attempt::RetryableFailure(FailureKind::Unauthorized),
        412 => Attempt::RetryableFailure(FailureKind::PreconditionFailed),
        403 => Attempt::FatalFailure(FailureKind::Forbidden),
        other => Attempt::FatalFailure(FailureKind::Status(other)),
    }
}

/// Counts attempts against a fixed maximum.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_attempts: u32,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
        }
    }

    /// Consume one attempt. Returns `false` once the budget is spent.
    pub fn try_acquire(&mut self) -> bool {
        if self.attempts >= self.max_attempts {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn has_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
