//! Collateral release when a policy resolves.
//!
//! Each allocation is released in three single-record steps:
//!
//! ```text
//! ACTIVE ──CAS──▶ terminal (balance_applied = false)
//!        ──────▶ balance step (unlock / settle / consume)
//!        ──────▶ balance_applied = true
//! ```
//!
//! The status flip is the claim: only the caller that moves an allocation
//! out of ACTIVE touches its balance, so a release can never be applied
//! twice. A crash after the flip leaves `balance_applied = false`, which
//! reconciliation finds and completes.

use std::sync::Arc;

use chrono::Utc;
use hedgepool_ledger::{BalanceLedger, PoolStore};
use hedgepool_types::{
    AllocationStatus, PolicyAllocation, PolicyId, PoolError, ProviderContribution, ProviderId,
    ReleaseReason, Result,
};
use rust_decimal::Decimal;

/// Result of a release call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released {
        reason: ReleaseReason,
        /// Allocations this call moved out of ACTIVE.
        released: Vec<PolicyAllocation>,
        /// Collateral returned to providers' available balances.
        returned: Decimal,
        /// Collateral that left the pool.
        consumed: Decimal,
    },
    /// Nothing was ACTIVE; no balance was touched.
    NoActiveAllocations,
}

pub struct CollateralRelease<S: PoolStore> {
    store: Arc<S>,
    ledger: BalanceLedger<S>,
}

impl<S: PoolStore> CollateralRelease<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            ledger: BalanceLedger::new(Arc::clone(&store)),
            store,
        }
    }

    /// Release every ACTIVE allocation of a policy.
    ///
    /// EXPIRED and CANCELLED return the collateral to available. EXERCISED
    /// without a consumption breakdown removes the whole allocation from
    /// the pool; use [`Self::release_exercised`] when the payout is known.
    ///
    /// A policy that was never funded has nothing ACTIVE and reports
    /// [`ReleaseOutcome::NoActiveAllocations`].
    ///
    /// # Errors
    /// `InconsistentState` if a balance step is rejected after its status
    /// flip.
    pub fn release(&self, policy_id: PolicyId, reason: ReleaseReason) -> Result<ReleaseOutcome> {
        let outcome = self.release_with(policy_id, reason, None)?;
        if let ReleaseOutcome::Released {
            reason: ReleaseReason::Exercised,
            consumed,
            ..
        } = &outcome
        {
            tracing::warn!(
                policy = %policy_id,
                forfeited = %consumed,
                "Exercised without payout breakdown, unconsumed collateral forfeited"
            );
        }
        Ok(outcome)
    }

    /// EXERCISED release with the payout's per-provider consumption:
    /// the unconsumed part of each allocation returns to available.
    pub fn release_exercised(
        &self,
        policy_id: PolicyId,
        contributions: &[ProviderContribution],
    ) -> Result<ReleaseOutcome> {
        self.release_with(policy_id, ReleaseReason::Exercised, Some(contributions))
    }

    /// Apply the balance step of an already-terminal allocation and mark it
    /// applied. `consumed` is the payout's consumption for EXERCISED.
    pub fn complete(
        &self,
        allocation: &PolicyAllocation,
        consumed: Option<Decimal>,
    ) -> Result<PolicyAllocation> {
        self.apply_balance_step(allocation, consumed)?;
        self.mark_applied(allocation)
    }

    /// Mark a terminal allocation's balance step as applied without applying
    /// it (it is known to have run already).
    pub fn mark_applied(&self, allocation: &PolicyAllocation) -> Result<PolicyAllocation> {
        self.store
            .update_allocation(allocation.policy_id, &allocation.provider, &|a| {
                Ok(a.mark_balance_applied())
            })
    }

    fn release_with(
        &self,
        policy_id: PolicyId,
        reason: ReleaseReason,
        contributions: Option<&[ProviderContribution]>,
    ) -> Result<ReleaseOutcome> {
        let allocations = self.store.allocations(policy_id)?;
        let target = reason.terminal_status();
        let now = Utc::now();
        let mut released = Vec::new();
        let mut returned = Decimal::ZERO;
        let mut consumed_total = Decimal::ZERO;

        for allocation in allocations.iter().filter(|a| a.is_active()) {
            let Ok(flipped) = self
                .store
                .update_allocation(policy_id, &allocation.provider, &|a| a.terminate(target, now))
            else {
                // Released concurrently by another caller.
                continue;
            };

            let consumed = contributions.map(|c| consumed_by(c, &allocation.provider));
            if let Err(err) = self.complete(&flipped, consumed) {
                tracing::error!(
                    policy = %policy_id,
                    provider = %allocation.provider,
                    status = %target,
                    error = %err,
                    "Release balance step failed after status flip"
                );
                return Err(PoolError::inconsistent(format!(
                    "allocation {} is {target} but its balance step failed: {err}",
                    allocation.id
                )));
            }

            let kept = returned_amount(&flipped, consumed);
            returned += kept;
            consumed_total += flipped.allocated_amount - kept;
            released.push(flipped.mark_balance_applied());
        }

        if released.is_empty() {
            tracing::debug!(policy = %policy_id, %reason, "No active allocations to release");
            return Ok(ReleaseOutcome::NoActiveAllocations);
        }

        tracing::info!(
            policy = %policy_id,
            %reason,
            allocations = released.len(),
            %returned,
            consumed = %consumed_total,
            "Collateral released"
        );
        Ok(ReleaseOutcome::Released {
            reason,
            released,
            returned,
            consumed: consumed_total,
        })
    }

    fn apply_balance_step(
        &self,
        allocation: &PolicyAllocation,
        consumed: Option<Decimal>,
    ) -> Result<()> {
        let provider = &allocation.provider;
        let token = &allocation.token;
        let amount = allocation.allocated_amount;
        match (allocation.status, consumed) {
            (AllocationStatus::Active, _) => {
                return Err(PoolError::validation(format!(
                    "allocation {} is still ACTIVE",
                    allocation.id
                )));
            }
            (AllocationStatus::Expired | AllocationStatus::Cancelled, _) => {
                self.ledger.unlock(provider, token, amount)?;
            }
            (AllocationStatus::Exercised, Some(consumed)) => {
                self.ledger.settle_locked(provider, token, amount, consumed)?;
            }
            (AllocationStatus::Exercised, None) => {
                self.ledger.consume_locked(provider, token, amount)?;
            }
        }
        Ok(())
    }
}

fn consumed_by(contributions: &[ProviderContribution], provider: &ProviderId) -> Decimal {
    contributions
        .iter()
        .filter(|c| &c.provider == provider)
        .map(|c| c.consumed)
        .sum()
}

fn returned_amount(allocation: &PolicyAllocation, consumed: Option<Decimal>) -> Decimal {
    match (allocation.status, consumed) {
        (AllocationStatus::Exercised, Some(consumed)) => allocation.allocated_amount - consumed,
        (AllocationStatus::Exercised, None) | (AllocationStatus::Active, _) => Decimal::ZERO,
        _ => allocation.allocated_amount,
    }
}
