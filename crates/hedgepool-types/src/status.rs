//! Operator-controlled pause flags.
//!
//! The pool's operational status is a single stored record read at the
//! start of every capital-movement operation, so concurrent executors all
//! observe the same value.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PoolError, Result};

/// A class of capital-movement operation that can be paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Deposits,
    Withdrawals,
    Allocations,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposits => write!(f, "deposits"),
            Self::Withdrawals => write!(f, "withdrawals"),
            Self::Allocations => write!(f, "allocations"),
        }
    }
}

/// Selects which operation classes a pause/resume call affects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseFlags {
    pub deposits: bool,
    pub withdrawals: bool,
    pub allocations: bool,
}

impl PauseFlags {
    #[must_use]
    pub fn all() -> Self {
        Self {
            deposits: true,
            withdrawals: true,
            allocations: true,
        }
    }

    #[must_use]
    pub fn only(operation: Operation) -> Self {
        let mut flags = Self::default();
        match operation {
            Operation::Deposits => flags.deposits = true,
            Operation::Withdrawals => flags.withdrawals = true,
            Operation::Allocations => flags.allocations = true,
        }
        flags
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.deposits || self.withdrawals || self.allocations)
    }
}

/// The singleton pause record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOperationalStatus {
    pub deposits_paused: bool,
    pub withdrawals_paused: bool,
    pub allocations_paused: bool,
    /// Operator's reason for the most recent pause.
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PoolOperationalStatus {
    #[must_use]
    pub fn running() -> Self {
        Self {
            deposits_paused: false,
            withdrawals_paused: false,
            allocations_paused: false,
            reason: None,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_paused(&self, operation: Operation) -> bool {
        match operation {
            Operation::Deposits => self.deposits_paused,
            Operation::Withdrawals => self.withdrawals_paused,
            Operation::Allocations => self.allocations_paused,
        }
    }

    /// Guard an operation. Returns `Ok(())` if allowed, or
    /// [`PoolError::OperationPaused`] if blocked.
    pub fn check(&self, operation: Operation) -> Result<()> {
        if self.is_paused(operation) {
            return Err(PoolError::OperationPaused {
                operation: operation.to_string(),
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| "paused by operator".to_string()),
            });
        }
        Ok(())
    }

    /// Pause the selected operations.
    #[must_use]
    pub fn paused(&self, flags: PauseFlags, reason: &str, at: DateTime<Utc>) -> Self {
        Self {
            deposits_paused: self.deposits_paused || flags.deposits,
            withdrawals_paused: self.withdrawals_paused || flags.withdrawals,
            allocations_paused: self.allocations_paused || flags.allocations,
            reason: Some(reason.to_string()),
            updated_at: at,
        }
    }

    /// Resume the selected operations. The reason is cleared once nothing
    /// remains paused.
    #[must_use]
    pub fn resumed(&self, flags: PauseFlags, at: DateTime<Utc>) -> Self {
        let mut next = Self {
            deposits_paused: self.deposits_paused && !flags.deposits,
            withdrawals_paused: self.withdrawals_paused && !flags.withdrawals,
            allocations_paused: self.allocations_paused && !flags.allocations,
            reason: self.reason.clone(),
            updated_at: at,
        };
        if !(next.deposits_paused || next.withdrawals_paused || next.allocations_paused) {
            next.reason = None;
        }
        next
    }
}

impl Default for PoolOperationalStatus {
    fn default() -> Self {
        Self::running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_allows_everything() {
        let status = PoolOperationalStatus::running();
        for op in [Operation::Deposits, Operation::Withdrawals, Operation::Allocations] {
            assert!(status.check(op).is_ok());
        }
    }

    #[test]
    fn pause_flags_are_independent() {
        let status = PoolOperationalStatus::running().paused(
            PauseFlags::only(Operation::Withdrawals),
            "oracle outage",
            Utc::now(),
        );
        assert!(status.check(Operation::Deposits).is_ok());
        assert!(status.check(Operation::Allocations).is_ok());
        let err = status.check(Operation::Withdrawals).unwrap_err();
        assert!(matches!(err, PoolError::OperationPaused { .. }));
        assert!(err.to_string().contains("oracle outage"));
    }

    #[test]
    fn resume_clears_reason_when_nothing_paused() {
        let status = PoolOperationalStatus::running()
            .paused(PauseFlags::all(), "incident", Utc::now())
            .resumed(PauseFlags::only(Operation::Deposits), Utc::now());
        assert!(!status.deposits_paused);
        assert!(status.withdrawals_paused);
        assert_eq!(status.reason.as_deref(), Some("incident"));
        let status = status.resumed(PauseFlags::all(), Utc::now());
        assert!(status.reason.is_none());
    }
}
