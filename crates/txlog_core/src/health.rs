//! Shared database health.
//!
//! A failed force leaves the log in an unknown state: some of the batch may
//! be durable, some not. Health is flipped to panicked and every later append
//! fails until the process restarts or health is explicitly restored.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// Health flag shared by the appender and everything that writes the log.
#[derive(Debug)]
pub struct DatabaseHealth {
    healthy: AtomicBool,
    cause: Mutex<Option<String>>,
}

impl Default for DatabaseHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseHealth {
    /// Creates a healthy instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            cause: Mutex::new(None),
        }
    }

    /// Marks the database as panicked. The first cause wins.
    pub fn panic(&self, cause: &CoreError) {
        let mut slot = self.cause.lock();
        if slot.is_none() {
            error!(%cause, "transaction log panicked; appends are refused until healed");
            *slot = Some(cause.to_string());
        }
        self.healthy.store(false, Ordering::Release);
    }

    /// Whether no panic has happened.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Fails with `DatabaseUnhealthy` if panicked.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseUnhealthy` carrying the original cause.
    pub fn assert_healthy(&self) -> CoreResult<()> {
        if self.is_healthy() {
            return Ok(());
        }
        Err(CoreError::DatabaseUnhealthy {
            cause: self.cause().unwrap_or_default(),
        })
    }

    /// The cause of the panic, if any.
    #[must_use]
    pub fn cause(&self) -> Option<String> {
        self.cause.lock().clone()
    }

    /// Restores health after an operator has dealt with the cause.
    pub fn heal(&self) {
        *self.cause.lock() = None;
        self.healthy.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_and_heal() {
        let health = DatabaseHealth::new();
        health.assert_healthy().unwrap();

        health.panic(&CoreError::durability_failure("disk full"));
        assert!(!health.is_healthy());
        let err = health.assert_healthy().unwrap_err();
        match err {
            CoreError::DatabaseUnhealthy { cause } => assert!(cause.contains("disk full")),
            other => panic!("unexpected error: {other:?}"),
        }

        health.heal();
        assert!(health.is_healthy());
        assert_eq!(health.cause(), None);
    }

    #[test]
    fn first_cause_is_kept() {
        let health = DatabaseHealth::new();
        health.panic(&CoreError::durability_failure("first"));
        health.panic(&CoreError::durability_failure("second"));
        assert!(health.cause().unwrap().contains("first"));
    }
}
