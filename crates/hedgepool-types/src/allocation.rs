//! Policy allocation types.
//!
//! A [`PolicyAllocation`] is one provider's share of a policy's collateral.
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  expire    ┌─────────┐
//!   │ ACTIVE ├───────────▶│ EXPIRED │
//!   └───┬─┬──┘            └─────────┘
//!       │ │ exercise      ┌───────────┐
//!       │ └──────────────▶│ EXERCISED │
//!       │ cancel          └───────────┘
//!       ▼
//!   ┌───────────┐
//!   │ CANCELLED │
//!   └───────────┘
//! ```
//!
//! Each allocation leaves ACTIVE exactly once.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AllocationId, PolicyId, PoolError, ProviderId, Result, Token};

/// Lifecycle state of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationStatus {
    Active,
    Expired,
    Exercised,
    Cancelled,
}

impl AllocationStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Can this allocation transition to the given target state?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Active, Self::Expired | Self::Exercised | Self::Cancelled)
        )
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Exercised => write!(f, "EXERCISED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Why a policy's collateral is being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseReason {
    Expired,
    Exercised,
    Cancelled,
}

impl ReleaseReason {
    /// The terminal allocation status this reason maps to.
    #[must_use]
    pub fn terminal_status(self) -> AllocationStatus {
        match self {
            Self::Expired => AllocationStatus::Expired,
            Self::Exercised => AllocationStatus::Exercised,
            Self::Cancelled => AllocationStatus::Cancelled,
        }
    }

    /// Whether released collateral returns to the provider's available balance.
    #[must_use]
    pub fn returns_collateral(self) -> bool {
        !matches!(self, Self::Exercised)
    }
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.terminal_status(), f)
    }
}

/// One provider's collateral commitment to one policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyAllocation {
    pub id: AllocationId,
    pub policy_id: PolicyId,
    pub provider: ProviderId,
    pub token: Token,
    pub allocated_amount: Decimal,
    /// Share of the policy's collateral, in percent.
    pub allocation_percentage: Decimal,
    /// This provider's part of the policy premium.
    pub premium_share: Decimal,
    pub premium_distributed: bool,
    /// When the premium was claimed; a claim with no distribution record
    /// older than the staleness window is an interrupted credit.
    #[serde(default)]
    pub premium_claimed_at: Option<DateTime<Utc>>,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the allocation leaves ACTIVE.
    pub terminated_at: Option<DateTime<Utc>>,
    /// Whether the balance step of the release has been applied.
    /// `false` on a terminal allocation means a release was interrupted
    /// between the status flip and the balance update.
    pub balance_applied: bool,
}

impl PolicyAllocation {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }

    /// Move this allocation out of ACTIVE. Returns the updated copy.
    ///
    /// # Errors
    /// Returns `Validation` if the allocation is already terminal.
    pub fn terminate(&self, target: AllocationStatus, at: DateTime<Utc>) -> Result<Self> {
        if !self.status.can_transition_to(target) {
            return Err(PoolError::validation(format!(
                "cannot transition allocation {} from {} to {target}",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = target;
        next.terminated_at = Some(at);
        next.balance_applied = false;
        Ok(next)
    }

    /// Record that the release's balance step has been applied.
    #[must_use]
    pub fn mark_balance_applied(&self) -> Self {
        let mut next = self.clone();
        next.balance_applied = true;
        next
    }

    /// Claim the premium for distribution. Returns the updated copy.
    ///
    /// # Errors
    /// Returns `Validation` if already distributed or not ACTIVE.
    pub fn claim_premium(&self, at: DateTime<Utc>) -> Result<Self> {
        if self.premium_distributed || !self.is_active() {
            return Err(PoolError::validation(format!(
                "allocation {} premium is not distributable",
                self.id
            )));
        }
        let mut next = self.clone();
        next.premium_distributed = true;
        next.premium_claimed_at = Some(at);
        Ok(next)
    }

    /// How long the allocation has held (or held) collateral.
    #[must_use]
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.terminated_at.unwrap_or(now) - self.created_at
    }
}

/// Fixture allocation for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl PolicyAllocation {
    pub fn dummy(policy_id: PolicyId, provider: &str, amount: Decimal) -> Self {
        let provider = ProviderId::new(provider);
        Self {
            id: AllocationId::deterministic(policy_id, &provider),
            policy_id,
            provider,
            token: "STX".to_string(),
            allocated_amount: amount,
            allocation_percentage: Decimal::ONE_HUNDRED,
            premium_share: Decimal::ZERO,
            premium_distributed: false,
            premium_claimed_at: None,
            status: AllocationStatus::Active,
            created_at: Utc::now(),
            terminated_at: None,
            balance_applied: true,
        }
    }
}
