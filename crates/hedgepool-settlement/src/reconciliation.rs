//! Reconciliation sweep.
//!
//! Multi-step orchestrations can stop between steps. The sweep finds the
//! records such a stop leaves behind and either finishes the remaining
//! idempotent steps or reports what it cannot decide:
//!
//! 1. incomplete settlements are resumed
//! 2. terminal allocations whose balance step is pending are completed or
//!    marked, when the locked balance shows which of the two is right
//! 3. premiums claimed without a distribution record are credited (once)
//!    and recorded
//! 4. CONFIRMED and interrupted FINALIZING transactions are finalized
//! 5. PENDING/SUBMITTED transactions past the staleness bound, and FAILED
//!    ones out of retries, are reported
//! 6. balance markers of completed finalizations and distributions are
//!    pruned
//! 7. conservation is checked
//!
//! Only records older than the staleness bound are touched, so the sweep
//! does not race live orchestrations. It never calls the external ledger.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hedgepool_allocation::{CollateralRelease, PremiumDistributor};
use hedgepool_ledger::{BalanceLedger, PendingTransactions, PoolStore};
use hedgepool_types::{
    AllocationId, AllocationStatus, DistributionBatchId, PendingTransactionId, PolicyAllocation,
    PolicyId, PoolConfig, ProviderId, Result, TransactionStatus, TransferPreparer,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::conservation::{ConservationChecker, ConservationViolation};
use crate::processor::{SettlementOutcome, SettlementProcessor};

/// A provider whose locked balance matches neither "no pending release
/// step ran" nor "all of them ran".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDrift {
    pub provider: ProviderId,
    pub token: String,
    pub locked: Decimal,
    pub active: Decimal,
    pub unapplied: Vec<AllocationId>,
}

/// A repair that was attempted and failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub step: String,
    pub subject: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub swept_at: DateTime<Utc>,
    pub settlements_resumed: Vec<PolicyId>,
    pub allocations_repaired: Vec<AllocationId>,
    pub allocation_drift: Vec<AllocationDrift>,
    pub premiums_repaired: Vec<AllocationId>,
    pub transactions_finalized: Vec<PendingTransactionId>,
    pub stale_transactions: Vec<PendingTransactionId>,
    pub exhausted_transactions: Vec<PendingTransactionId>,
    pub markers_pruned: usize,
    pub violations: Vec<ConservationViolation>,
    pub failures: Vec<SweepFailure>,
}

impl ReconciliationReport {
    fn new(swept_at: DateTime<Utc>) -> Self {
        Self {
            swept_at,
            settlements_resumed: Vec::new(),
            allocations_repaired: Vec::new(),
            allocation_drift: Vec::new(),
            premiums_repaired: Vec::new(),
            transactions_finalized: Vec::new(),
            stale_transactions: Vec::new(),
            exhausted_transactions: Vec::new(),
            markers_pruned: 0,
            violations: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Nothing needs an operator.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.allocation_drift.is_empty()
            && self.stale_transactions.is_empty()
            && self.exhausted_transactions.is_empty()
            && self.violations.is_empty()
            && self.failures.is_empty()
    }

    fn fail(&mut self, step: &str, subject: impl ToString, error: &impl ToString) {
        self.failures.push(SweepFailure {
            step: step.to_string(),
            subject: subject.to_string(),
            error: error.to_string(),
        });
    }
}

pub struct Reconciler<S: PoolStore> {
    store: Arc<S>,
    ledger: BalanceLedger<S>,
    pending: PendingTransactions<S>,
    release: CollateralRelease<S>,
    premiums: PremiumDistributor<S>,
    processor: SettlementProcessor<S>,
    checker: ConservationChecker<S>,
    config: Arc<PoolConfig>,
}

impl<S: PoolStore> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        preparer: Arc<dyn TransferPreparer>,
        config: Arc<PoolConfig>,
    ) -> Self {
        Self {
            ledger: BalanceLedger::new(Arc::clone(&store)),
            pending: PendingTransactions::new(Arc::clone(&store), preparer, Arc::clone(&config)),
            release: CollateralRelease::new(Arc::clone(&store)),
            premiums: PremiumDistributor::new(Arc::clone(&store)),
            processor: SettlementProcessor::new(Arc::clone(&store), Arc::clone(&config)),
            checker: ConservationChecker::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    /// Run one sweep over every record last touched before
    /// `now - stale_after`.
    ///
    /// # Errors
    /// Only store read failures. A failed repair is recorded in the report
    /// and the sweep moves on.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<ReconciliationReport> {
        let cutoff = now - self.config.stale_after();
        let mut report = ReconciliationReport::new(now);

        self.resume_settlements(cutoff, &mut report)?;
        for token in &self.config.tokens {
            self.repair_releases(&token.symbol, cutoff, &mut report)?;
            self.repair_premiums(&token.symbol, cutoff, &mut report)?;
        }
        self.sweep_transactions(cutoff, &mut report)?;
        for token in &self.config.tokens {
            self.prune_markers(&token.symbol, cutoff, &mut report)?;
            report.violations.extend(self.checker.check(&token.symbol)?);
        }

        if report.is_clean() {
            tracing::debug!(
                settlements = report.settlements_resumed.len(),
                allocations = report.allocations_repaired.len(),
                premiums = report.premiums_repaired.len(),
                transactions = report.transactions_finalized.len(),
                markers_pruned = report.markers_pruned,
                "Reconciliation sweep clean"
            );
        } else {
            tracing::warn!(
                drift = report.allocation_drift.len(),
                stale = report.stale_transactions.len(),
                exhausted = report.exhausted_transactions.len(),
                violations = report.violations.len(),
                failures = report.failures.len(),
                "Reconciliation sweep needs attention"
            );
        }
        Ok(report)
    }

    // -----------------------------------------------------------------
    // 1. Settlements
    // -----------------------------------------------------------------

    fn resume_settlements(
        &self,
        cutoff: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        for record in self.store.settlements()? {
            if record.is_complete() || record.updated_at > cutoff {
                continue;
            }
            let policy_id = record.policy_id();
            match self.processor.resume(policy_id) {
                Ok(SettlementOutcome::Settled(_)) => {
                    tracing::info!(policy = %policy_id, "Stale settlement resumed");
                    report.settlements_resumed.push(policy_id);
                }
                Ok(SettlementOutcome::AlreadySettled) => {}
                Err(err) => report.fail("resume settlement", policy_id, &err),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // 2. Interrupted releases
    // -----------------------------------------------------------------

    /// Per provider, the locked balance must equal either
    /// `active + Σ unapplied` (no pending step ran) or `active` (all ran).
    /// Anything else is drift.
    fn repair_releases(
        &self,
        token: &str,
        cutoff: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let mut by_provider: BTreeMap<ProviderId, (Decimal, Vec<PolicyAllocation>)> =
            BTreeMap::new();
        for allocation in self.store.allocations_by_token(token)? {
            let entry = by_provider.entry(allocation.provider.clone()).or_default();
            if allocation.is_active() {
                entry.0 += allocation.allocated_amount;
            } else if !allocation.balance_applied {
                entry.1.push(allocation);
            }
        }

        for (provider, (active, unapplied)) in by_provider {
            if unapplied.is_empty() {
                continue;
            }
            // A fresh one may belong to a release still in progress.
            if unapplied
                .iter()
                .any(|a| a.terminated_at.is_none_or(|at| at > cutoff))
            {
                continue;
            }

            let locked = self
                .store
                .balance(&provider, token)?
                .map_or(Decimal::ZERO, |b| b.locked_balance);
            let pending: Decimal = unapplied.iter().map(|a| a.allocated_amount).sum();

            let apply = if locked == active + pending {
                true
            } else if locked == active {
                false
            } else {
                tracing::error!(
                    provider = %provider,
                    token,
                    %locked,
                    %active,
                    %pending,
                    "Locked balance does not explain interrupted releases"
                );
                report.allocation_drift.push(AllocationDrift {
                    provider,
                    token: token.to_string(),
                    locked,
                    active,
                    unapplied: unapplied.iter().map(|a| a.id).collect(),
                });
                continue;
            };

            for allocation in &unapplied {
                let repaired = if apply {
                    self.consumed_for(allocation)
                        .and_then(|consumed| self.release.complete(allocation, consumed))
                } else {
                    self.release.mark_applied(allocation)
                };
                match repaired {
                    Ok(_) => {
                        tracing::info!(
                            allocation = %allocation.id,
                            policy = %allocation.policy_id,
                            provider = %allocation.provider,
                            status = %allocation.status,
                            applied_now = apply,
                            "Interrupted release repaired"
                        );
                        report.allocations_repaired.push(allocation.id);
                    }
                    Err(err) => report.fail("repair release", allocation.id, &err),
                }
            }
        }
        Ok(())
    }

    /// The payout's consumption for an EXERCISED allocation, if a
    /// settlement was recorded for its policy.
    fn consumed_for(&self, allocation: &PolicyAllocation) -> Result<Option<Decimal>> {
        if allocation.status != AllocationStatus::Exercised {
            return Ok(None);
        }
        Ok(self
            .store
            .settlement(allocation.policy_id)?
            .map(|record| record.request.consumed_by(&allocation.provider)))
    }

    // -----------------------------------------------------------------
    // 3. Interrupted premium distributions
    // -----------------------------------------------------------------

    /// A claimed allocation with no distribution record stopped between
    /// the claim and the record. The credit is keyed by the allocation, so
    /// completing it is safe whether or not the credit landed.
    fn repair_premiums(
        &self,
        token: &str,
        cutoff: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let recorded: BTreeSet<AllocationId> = self
            .store
            .distributions_by_token(token)?
            .into_iter()
            .map(|record| record.allocation_id)
            .collect();
        let mut batch_id = None;

        for allocation in self.store.allocations_by_token(token)? {
            if !allocation.premium_distributed
                || recorded.contains(&allocation.id)
                || allocation.premium_claimed_at.is_some_and(|at| at > cutoff)
            {
                continue;
            }
            let batch = *batch_id.get_or_insert_with(DistributionBatchId::new);
            match self.premiums.complete(&allocation, batch, report.swept_at) {
                Ok(_) => {
                    tracing::info!(
                        allocation = %allocation.id,
                        policy = %allocation.policy_id,
                        provider = %allocation.provider,
                        amount = %allocation.premium_share,
                        "Interrupted premium distribution completed"
                    );
                    report.premiums_repaired.push(allocation.id);
                }
                Err(err) => report.fail("complete premium", allocation.id, &err),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // 4-5. Pending transactions
    // -----------------------------------------------------------------

    fn sweep_transactions(
        &self,
        cutoff: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let max_attempts = self.config.max_transaction_attempts;
        for tx in self.store.transactions()? {
            if tx.updated_at > cutoff {
                continue;
            }
            match tx.status {
                TransactionStatus::Confirmed | TransactionStatus::Finalizing => match self
                    .pending
                    .finalize_confirmed(tx.id)
                {
                    Ok(done) if done.status == TransactionStatus::Processed => {
                        report.transactions_finalized.push(tx.id);
                    }
                    Ok(_) => {}
                    Err(err) => report.fail("finalize transaction", tx.id, &err),
                },
                TransactionStatus::Pending | TransactionStatus::Submitted => {
                    tracing::warn!(
                        tx = %tx.id,
                        status = %tx.status,
                        provider = %tx.provider,
                        external_ref = ?tx.external_ref,
                        since = %tx.updated_at,
                        "Transaction awaiting external outcome past staleness bound"
                    );
                    report.stale_transactions.push(tx.id);
                }
                TransactionStatus::Failed if tx.retries_exhausted(max_attempts) => {
                    tracing::warn!(
                        tx = %tx.id,
                        provider = %tx.provider,
                        attempts = tx.attempt(),
                        error = ?tx.error,
                        "Transaction failed with no retries left"
                    );
                    report.exhausted_transactions.push(tx.id);
                }
                TransactionStatus::Failed | TransactionStatus::Processed => {}
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // 6. Markers
    // -----------------------------------------------------------------

    /// Markers only guard replays of an unfinished orchestration. Once the
    /// transaction is PROCESSED or the distribution recorded, past the
    /// staleness bound, nothing replays it.
    fn prune_markers(
        &self,
        token: &str,
        cutoff: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let processed: BTreeSet<PendingTransactionId> = self
            .store
            .transactions()?
            .into_iter()
            .filter(|tx| {
                tx.token == token
                    && tx.status == TransactionStatus::Processed
                    && tx.updated_at <= cutoff
            })
            .map(|tx| tx.id)
            .collect();
        let recorded: BTreeSet<AllocationId> = self
            .store
            .distributions_by_token(token)?
            .into_iter()
            .filter(|record| record.distributed_at <= cutoff)
            .map(|record| record.allocation_id)
            .collect();

        for balance in self.store.balances(token)? {
            let transfers: Vec<PendingTransactionId> = balance
                .finalized_transfers
                .intersection(&processed)
                .copied()
                .collect();
            let premiums: Vec<AllocationId> = balance
                .credited_premiums
                .intersection(&recorded)
                .copied()
                .collect();
            if transfers.is_empty() && premiums.is_empty() {
                continue;
            }
            match self
                .ledger
                .forget_markers(&balance.provider, token, &transfers, &premiums)
            {
                Ok(_) => report.markers_pruned += transfers.len() + premiums.len(),
                Err(err) => report.fail("prune markers", &balance.provider, &err),
            }
        }
        Ok(())
    }
}
