//! Per-operation deadlines.

use crate::error::{AppError, Result};
use std::time::{Duration, Instant};

/// Point in time after which an operation must give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Deadline at a fixed instant.
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// The earlier of this deadline and `timeout` from now.
    pub fn narrow(&self, timeout: Duration) -> Self {
        Self {
            at: self.at.min(Instant::now() + timeout),
        }
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Fail with [`AppError::Timeout`] once the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            return Err(AppError::Timeout);
        }
        Ok(())
    }
}
