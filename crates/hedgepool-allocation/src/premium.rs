//! Premium distribution to a policy's providers.
//!
//! Each allocation goes through three single-record steps: claim the
//! allocation's distributed flag, credit the provider keyed by the
//! allocation id, then write the distribution record. A claim without a
//! record is an interrupted distribution; [`PremiumDistributor::complete`]
//! finishes it and never credits twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hedgepool_ledger::{BalanceLedger, PoolStore};
use hedgepool_types::{
    DistributionBatchId, PolicyAllocation, PolicyId, PoolError, PremiumDistributionRecord, Result,
};
use rust_decimal::Decimal;

/// Result of a distribution call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PremiumDistribution {
    Distributed {
        batch_id: DistributionBatchId,
        records: Vec<PremiumDistributionRecord>,
    },
    /// Every allocation had already received its premium.
    AlreadyDistributed,
}

pub struct PremiumDistributor<S: PoolStore> {
    store: Arc<S>,
    ledger: BalanceLedger<S>,
}

impl<S: PoolStore> PremiumDistributor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            ledger: BalanceLedger::new(Arc::clone(&store)),
            store,
        }
    }

    /// Credit each ACTIVE, undistributed allocation its premium share.
    ///
    /// The allocation's distributed flag is claimed before the credit, so
    /// concurrent or repeated calls credit each allocation at most once.
    ///
    /// # Errors
    /// - `PolicyNotFound` if the policy has no allocations
    /// - `Validation` if `token` or `amount` disagree with the allocations
    pub fn distribute(
        &self,
        policy_id: PolicyId,
        amount: Decimal,
        token: &str,
    ) -> Result<PremiumDistribution> {
        let allocations = self.store.allocations(policy_id)?;
        if allocations.is_empty() {
            return Err(PoolError::PolicyNotFound(policy_id));
        }
        if let Some(other) = allocations.iter().find(|a| a.token != token) {
            return Err(PoolError::validation(format!(
                "policy {policy_id} is funded in {}, premium paid in {token}",
                other.token
            )));
        }
        let expected: Decimal = allocations.iter().map(|a| a.premium_share).sum();
        if amount != expected {
            return Err(PoolError::validation(format!(
                "premium {amount} does not match allocated shares {expected}"
            )));
        }

        let batch_id = DistributionBatchId::new();
        let now = Utc::now();
        let mut records = Vec::new();

        for allocation in allocations
            .iter()
            .filter(|a| a.is_active() && !a.premium_distributed)
        {
            // Lost race or released meanwhile: someone else owns this one.
            let Ok(claimed) = self
                .store
                .update_allocation(policy_id, &allocation.provider, &|a| a.claim_premium(now))
            else {
                continue;
            };
            if let Some(record) = self.complete(&claimed, batch_id, now)? {
                records.push(record);
            }
        }

        if records.is_empty() {
            tracing::debug!(policy = %policy_id, "Premium already distributed");
            return Ok(PremiumDistribution::AlreadyDistributed);
        }

        tracing::info!(
            policy = %policy_id,
            batch = %batch_id,
            providers = records.len(),
            %amount,
            "Premium distributed"
        );
        Ok(PremiumDistribution::Distributed { batch_id, records })
    }

    /// Credit a claimed allocation's share and record it.
    ///
    /// Safe to repeat: the credit is keyed by the allocation id and the
    /// record is insert-if-absent. Returns the record if this call wrote it.
    ///
    /// # Errors
    /// `InconsistentState` if the balance rejects the credit.
    pub fn complete(
        &self,
        allocation: &PolicyAllocation,
        batch_id: DistributionBatchId,
        now: DateTime<Utc>,
    ) -> Result<Option<PremiumDistributionRecord>> {
        if allocation.premium_share > Decimal::ZERO {
            if let Err(err) = self.ledger.credit_premium(
                &allocation.provider,
                &allocation.token,
                allocation.id,
                allocation.premium_share,
            ) {
                tracing::error!(
                    policy = %allocation.policy_id,
                    provider = %allocation.provider,
                    amount = %allocation.premium_share,
                    error = %err,
                    "Premium claimed but credit failed"
                );
                return Err(PoolError::inconsistent(format!(
                    "premium of {} claimed for {} but not credited: {err}",
                    allocation.id, allocation.provider
                )));
            }
        }

        let record = PremiumDistributionRecord {
            policy_id: allocation.policy_id,
            provider: allocation.provider.clone(),
            allocation_id: allocation.id,
            token: allocation.token.clone(),
            amount: allocation.premium_share,
            batch_id,
            distributed_at: now,
        };
        Ok(self.store.insert_distribution(record.clone())?.then_some(record))
    }
}
