//! Settlement of an exercised policy.
//!
//! ```text
//! SettlementRequest
//!   │ validate (Σ consumed == amount, consumed ≤ allocated, token)
//!   ▼
//! SettlementRecord (created, or resumed if present)
//!   │ 1. payout ledger entry        claim, then append
//!   │ 2. reduce_deposited ×N        claim per provider, then reduce
//!   │ 3. release as EXERCISED       idempotent, then mark
//!   │ 4. metrics snapshot           then mark
//!   ▼
//! completed_at set
//! ```
//!
//! Steps 1 and 2 are not idempotent and are claimed in the record before
//! being applied: a crash in between loses the step (the conservation
//! check reports it) but a resume never applies it twice.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use hedgepool_allocation::CollateralRelease;
use hedgepool_ledger::{BalanceLedger, PoolStore};
use hedgepool_types::{
    AllocationStatus, LedgerEntry, LedgerEntryId, LedgerEntryKind, PolicyId, PoolConfig,
    PoolError, Result, SettlementProgress, SettlementRecord, SettlementRequest,
};
use rust_decimal::Decimal;

use crate::metrics::MetricsAggregator;

/// Result of a settlement call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// This call completed the settlement (fully, or the remaining steps).
    Settled(SettlementRecord),
    /// Every step had already been completed.
    AlreadySettled,
}

pub struct SettlementProcessor<S: PoolStore> {
    store: Arc<S>,
    ledger: BalanceLedger<S>,
    release: CollateralRelease<S>,
    metrics: MetricsAggregator<S>,
    config: Arc<PoolConfig>,
}

impl<S: PoolStore> SettlementProcessor<S> {
    pub fn new(store: Arc<S>, config: Arc<PoolConfig>) -> Self {
        Self {
            ledger: BalanceLedger::new(Arc::clone(&store)),
            release: CollateralRelease::new(Arc::clone(&store)),
            metrics: MetricsAggregator::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    /// Settle a policy payout.
    ///
    /// Re-submitting the same request resumes an interrupted settlement.
    ///
    /// # Errors
    /// - `Validation` / `InvalidAmount` / `UnsupportedToken` for a
    ///   malformed request (nothing persisted)
    /// - `PolicyNotFound` if the policy has no allocations
    /// - `InconsistentState` if the policy was already settled under a
    ///   different request, or a claimed step could not be applied
    pub fn process(&self, request: &SettlementRequest) -> Result<SettlementOutcome> {
        self.validate(request)?;
        let policy_id = request.policy_id;

        let fresh = SettlementRecord::new(request.clone(), Utc::now());
        let record = match self.store.insert_settlement(fresh.clone())? {
            None => fresh,
            Some(existing) => {
                if existing.request != *request {
                    tracing::error!(
                        policy = %policy_id,
                        recorded_ref = %existing.request.external_ref,
                        reported_ref = %request.external_ref,
                        "Settlement conflicts with recorded settlement"
                    );
                    return Err(PoolError::inconsistent(format!(
                        "policy {policy_id} already settled under {}, got {}",
                        existing.request.external_ref, request.external_ref
                    )));
                }
                if existing.is_complete() {
                    tracing::debug!(policy = %policy_id, "Settlement already complete");
                    return Ok(SettlementOutcome::AlreadySettled);
                }
                tracing::info!(policy = %policy_id, "Resuming interrupted settlement");
                existing
            }
        };

        self.run_steps(&record).map(SettlementOutcome::Settled)
    }

    /// Resume a recorded settlement from its remaining steps.
    ///
    /// # Errors
    /// `PolicyNotFound` if no settlement is recorded for the policy.
    pub fn resume(&self, policy_id: PolicyId) -> Result<SettlementOutcome> {
        let record = self
            .store
            .settlement(policy_id)?
            .ok_or(PoolError::PolicyNotFound(policy_id))?;
        if record.is_complete() {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        self.run_steps(&record).map(SettlementOutcome::Settled)
    }

    fn validate(&self, request: &SettlementRequest) -> Result<()> {
        let token = self.config.token(&request.token)?;
        token.check_amount(request.amount)?;
        if request.external_ref.trim().is_empty() {
            return Err(PoolError::validation("settlement external reference is empty"));
        }
        if request.contributions.is_empty() {
            return Err(PoolError::validation("settlement has no contributions"));
        }

        let mut seen = BTreeSet::new();
        for contribution in &request.contributions {
            if !seen.insert(&contribution.provider) {
                return Err(PoolError::validation(format!(
                    "provider {} listed twice",
                    contribution.provider
                )));
            }
            if !contribution.consumed.is_zero() {
                token.check_amount(contribution.consumed)?;
            }
        }
        let consumed = request.total_consumed();
        if consumed != request.amount {
            return Err(PoolError::validation(format!(
                "contributions sum to {consumed}, payout is {}",
                request.amount
            )));
        }

        let allocations = self.store.allocations(request.policy_id)?;
        if allocations.is_empty() {
            return Err(PoolError::PolicyNotFound(request.policy_id));
        }
        for contribution in &request.contributions {
            let Some(allocation) = allocations
                .iter()
                .find(|a| a.provider == contribution.provider)
            else {
                return Err(PoolError::validation(format!(
                    "provider {} holds no allocation for policy {}",
                    contribution.provider, request.policy_id
                )));
            };
            if allocation.token != request.token {
                return Err(PoolError::validation(format!(
                    "policy {} is funded in {}, payout in {}",
                    request.policy_id, allocation.token, request.token
                )));
            }
            if contribution.consumed > allocation.allocated_amount {
                return Err(PoolError::validation(format!(
                    "provider {} consumed {} of an allocation of {}",
                    contribution.provider, contribution.consumed, allocation.allocated_amount
                )));
            }
            if !matches!(
                allocation.status,
                AllocationStatus::Active | AllocationStatus::Exercised
            ) {
                return Err(PoolError::validation(format!(
                    "allocation {} was already released as {}",
                    allocation.id, allocation.status
                )));
            }
        }
        Ok(())
    }

    fn run_steps(&self, record: &SettlementRecord) -> Result<SettlementRecord> {
        let request = &record.request;
        let policy_id = request.policy_id;
        let token = request.token.as_str();

        // 1. Payout ledger entry
        if self.claim(policy_id, &|p| p.payout_logged, &|p| p.payout_logged = true)? {
            let entry = LedgerEntry {
                id: LedgerEntryId::new(),
                kind: LedgerEntryKind::SettlementPayout,
                policy_id,
                token: request.token.clone(),
                amount: request.amount,
                external_ref: request.external_ref.clone(),
                recorded_at: Utc::now(),
            };
            self.store
                .append_ledger_entry(entry)
                .map_err(|err| lost_step(policy_id, "payout ledger entry", &err))?;
        }

        // 2. Deposit reductions
        for contribution in request
            .contributions
            .iter()
            .filter(|c| c.consumed > Decimal::ZERO)
        {
            let provider = &contribution.provider;
            let claimed = self.claim(
                policy_id,
                &|p| p.deposits_reduced.contains(provider),
                &|p| {
                    p.deposits_reduced.insert(provider.clone());
                },
            )?;
            if claimed {
                self.ledger
                    .reduce_deposited(provider, token, contribution.consumed)
                    .map_err(|err| lost_step(policy_id, "deposit reduction", &err))?;
            }
        }

        // 3. Unconsumed collateral back to providers
        if !record.progress.collateral_released {
            self.release
                .release_exercised(policy_id, &request.contributions)?;
            self.mark(policy_id, &|p| p.collateral_released = true)?;
        }

        // 4. Metrics
        if !record.progress.metrics_recorded {
            self.metrics.record(token)?;
            self.mark(policy_id, &|p| p.metrics_recorded = true)?;
        }

        let now = Utc::now();
        let done = self.store.update_settlement(policy_id, &|r| {
            let mut next = r.clone();
            next.completed_at.get_or_insert(now);
            next.updated_at = now;
            Ok(next)
        })?;

        tracing::info!(
            policy = %policy_id,
            token,
            amount = %request.amount,
            providers = request.contributions.len(),
            external_ref = %request.external_ref,
            "Settlement processed"
        );
        Ok(done)
    }

    /// Set a step marker if it is not set yet. Returns whether this call set it.
    fn claim(
        &self,
        policy_id: PolicyId,
        done: &dyn Fn(&SettlementProgress) -> bool,
        set: &dyn Fn(&mut SettlementProgress),
    ) -> Result<bool> {
        let claimed = Cell::new(false);
        let now = Utc::now();
        self.store.update_settlement(policy_id, &|record| {
            let mut next = record.clone();
            let free = !done(&record.progress);
            if free {
                set(&mut next.progress);
                next.updated_at = now;
            }
            claimed.set(free);
            Ok(next)
        })?;
        Ok(claimed.get())
    }

    fn mark(&self, policy_id: PolicyId, set: &dyn Fn(&mut SettlementProgress)) -> Result<()> {
        let now = Utc::now();
        self.store.update_settlement(policy_id, &|record| {
            let mut next = record.clone();
            set(&mut next.progress);
            next.updated_at = now;
            Ok(next)
        })?;
        Ok(())
    }
}

fn lost_step(policy_id: PolicyId, step: &str, err: &PoolError) -> PoolError {
    tracing::error!(
        policy = %policy_id,
        step,
        error = %err,
        "Settlement step claimed but not applied"
    );
    PoolError::inconsistent(format!(
        "settlement of {policy_id}: {step} claimed but not applied: {err}"
    ))
}
