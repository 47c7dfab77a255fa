//! Allocation engine: funds a policy by locking provider collateral.
//!
//! Planning reads a balance snapshot; applying locks each planned share
//! as a separate atomic step. Balances may move between the two, so the
//! applier treats every lock as fallible and compensates on the first
//! failure.

use std::sync::Arc;

use chrono::Utc;
use hedgepool_ledger::{BalanceLedger, PoolStore};
use hedgepool_types::{
    AllocationId, AllocationStatus, Operation, PolicyAllocation, PolicyId, PoolConfig, PoolError,
    Result,
};
use rust_decimal::Decimal;

use crate::planner::{AllocationPlan, PlannedShare, plan_allocation};

pub struct AllocationEngine<S: PoolStore> {
    store: Arc<S>,
    ledger: BalanceLedger<S>,
    config: Arc<PoolConfig>,
}

impl<S: PoolStore> AllocationEngine<S> {
    pub fn new(store: Arc<S>, config: Arc<PoolConfig>) -> Self {
        Self {
            ledger: BalanceLedger::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    /// Plan and apply in one call.
    ///
    /// # Errors
    /// See [`Self::plan`] and [`Self::apply`].
    pub fn allocate(
        &self,
        policy_id: PolicyId,
        token: &str,
        required: Decimal,
        premium: Decimal,
    ) -> Result<Vec<PolicyAllocation>> {
        self.store.operational_status()?.check(Operation::Allocations)?;
        let plan = self.plan(policy_id, token, required, premium)?;
        self.apply(&plan)
    }

    /// Compute the split against current balances. Mutates nothing.
    ///
    /// # Errors
    /// `UnsupportedToken`, `InvalidAmount`, `InsufficientPoolLiquidity`.
    pub fn plan(
        &self,
        policy_id: PolicyId,
        token: &str,
        required: Decimal,
        premium: Decimal,
    ) -> Result<AllocationPlan> {
        let token_config = self.config.token(token)?;
        let balances = self.store.balances(token)?;
        plan_allocation(policy_id, token_config, required, premium, &balances)
    }

    /// Lock every planned share and persist the allocation batch.
    ///
    /// Either every share ends up locked and recorded, or every lock taken
    /// by this call is released again.
    ///
    /// # Errors
    /// - `OperationPaused` if allocations are paused
    /// - `PolicyAlreadyFunded` if the policy already has allocations
    /// - `InsufficientBalance` if a provider's balance dropped since planning
    pub fn apply(&self, plan: &AllocationPlan) -> Result<Vec<PolicyAllocation>> {
        self.store.operational_status()?.check(Operation::Allocations)?;
        if !self.store.allocations(plan.policy_id)?.is_empty() {
            return Err(PoolError::PolicyAlreadyFunded(plan.policy_id));
        }

        let mut locked: Vec<&PlannedShare> = Vec::with_capacity(plan.shares.len());
        for share in &plan.shares {
            if let Err(err) = self.ledger.lock(&share.provider, &plan.token, share.amount) {
                tracing::warn!(
                    policy = %plan.policy_id,
                    provider = %share.provider,
                    amount = %share.amount,
                    error = %err,
                    "Allocation lock failed, compensating"
                );
                self.compensate(plan, &locked);
                return Err(err);
            }
            locked.push(share);
        }

        let now = Utc::now();
        let allocations: Vec<PolicyAllocation> = plan
            .shares
            .iter()
            .map(|share| PolicyAllocation {
                id: AllocationId::deterministic(plan.policy_id, &share.provider),
                policy_id: plan.policy_id,
                provider: share.provider.clone(),
                token: plan.token.clone(),
                allocated_amount: share.amount,
                allocation_percentage: share.percentage,
                premium_share: share.premium_share,
                premium_distributed: false,
                premium_claimed_at: None,
                status: AllocationStatus::Active,
                created_at: now,
                terminated_at: None,
                balance_applied: true,
            })
            .collect();

        if let Err(err) = self
            .store
            .insert_allocations(plan.policy_id, allocations.clone())
        {
            tracing::warn!(
                policy = %plan.policy_id,
                error = %err,
                "Allocation batch rejected, compensating"
            );
            self.compensate(plan, &locked);
            return Err(err);
        }

        tracing::info!(
            policy = %plan.policy_id,
            token = %plan.token,
            required = %plan.required,
            providers = allocations.len(),
            "Policy funded"
        );
        Ok(allocations)
    }

    /// Unlock every share this call locked. A failed unlock is logged and
    /// left for the conservation check to report.
    fn compensate(&self, plan: &AllocationPlan, locked: &[&PlannedShare]) {
        for share in locked {
            if let Err(err) = self.ledger.unlock(&share.provider, &plan.token, share.amount) {
                tracing::error!(
                    policy = %plan.policy_id,
                    provider = %share.provider,
                    amount = %share.amount,
                    error = %err,
                    "Compensating unlock failed"
                );
            }
        }
    }
}
