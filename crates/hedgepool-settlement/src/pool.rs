//! `LiquidityPool`: the engine's single entry point.
//!
//! Wires the ledger, allocation, settlement and reconciliation components
//! over one shared store. Policy lifecycle, provider and operator calls
//! all go through here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hedgepool_allocation::{
    AllocationEngine, CollateralRelease, PremiumDistribution, PremiumDistributor, ReleaseOutcome,
};
use hedgepool_ledger::{BalanceLedger, OutcomeDisposition, PendingTransactions, PoolStore};
use hedgepool_types::{
    OutcomeReport, PauseFlags, PendingTransaction, PendingTransactionId, PolicyAllocation,
    PolicyId, PoolConfig, PoolError, PoolMetricsSnapshot, PoolOperationalStatus, PremiumSource,
    ProviderBalance, ProviderId, ReleaseReason, Result, SettlementRequest, TransactionKind,
    TransactionStatus, TransferPreparer,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsAggregator;
use crate::processor::{SettlementOutcome, SettlementProcessor};
use crate::reconciliation::{Reconciler, ReconciliationReport};
use crate::sweeper::{SweeperHandle, spawn_sweeper};

/// Operator view of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// One live snapshot per configured token.
    pub tokens: Vec<PoolMetricsSnapshot>,
    pub status: PoolOperationalStatus,
}

impl PoolStats {
    #[must_use]
    pub fn token(&self, symbol: &str) -> Option<&PoolMetricsSnapshot> {
        self.tokens.iter().find(|s| s.token == symbol)
    }
}

pub struct LiquidityPool<S: PoolStore> {
    store: Arc<S>,
    config: Arc<PoolConfig>,
    ledger: BalanceLedger<S>,
    pending: PendingTransactions<S>,
    engine: AllocationEngine<S>,
    premiums: PremiumDistributor<S>,
    release: CollateralRelease<S>,
    settlement: SettlementProcessor<S>,
    metrics: MetricsAggregator<S>,
    reconciler: Arc<Reconciler<S>>,
}

impl<S: PoolStore + 'static> LiquidityPool<S> {
    /// # Errors
    /// `Configuration` if `config` does not validate.
    pub fn new(
        store: Arc<S>,
        preparer: Arc<dyn TransferPreparer>,
        config: PoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        tracing::info!(
            tokens = config.tokens.len(),
            max_attempts = config.max_transaction_attempts,
            stale_after_secs = config.stale_after_secs,
            "Liquidity pool initialized"
        );
        Ok(Self {
            ledger: BalanceLedger::new(Arc::clone(&store)),
            pending: PendingTransactions::new(
                Arc::clone(&store),
                Arc::clone(&preparer),
                Arc::clone(&config),
            ),
            engine: AllocationEngine::new(Arc::clone(&store), Arc::clone(&config)),
            premiums: PremiumDistributor::new(Arc::clone(&store)),
            release: CollateralRelease::new(Arc::clone(&store)),
            settlement: SettlementProcessor::new(Arc::clone(&store), Arc::clone(&config)),
            metrics: MetricsAggregator::new(Arc::clone(&store)),
            reconciler: Arc::new(Reconciler::new(
                Arc::clone(&store),
                preparer,
                Arc::clone(&config),
            )),
            store,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Policy lifecycle
    // -----------------------------------------------------------------

    /// Lock `required` collateral across providers for a policy.
    pub fn allocate_capital(
        &self,
        policy_id: PolicyId,
        token: &str,
        required: Decimal,
        premium: Decimal,
    ) -> Result<Vec<PolicyAllocation>> {
        let allocations = self.engine.allocate(policy_id, token, required, premium)?;
        self.after_event(token);
        Ok(allocations)
    }

    /// [`Self::allocate_capital`] with the premium quoted by `source`.
    pub fn allocate_capital_quoted(
        &self,
        policy_id: PolicyId,
        token: &str,
        required: Decimal,
        source: &dyn PremiumSource,
    ) -> Result<Vec<PolicyAllocation>> {
        let premium = source.premium(policy_id)?;
        self.allocate_capital(policy_id, token, required, premium)
    }

    pub fn distribute_premium(
        &self,
        policy_id: PolicyId,
        amount: Decimal,
        token: &str,
    ) -> Result<PremiumDistribution> {
        let distribution = self.premiums.distribute(policy_id, amount, token)?;
        if matches!(distribution, PremiumDistribution::Distributed { .. }) {
            self.after_event(token);
        }
        Ok(distribution)
    }

    pub fn release_collateral(
        &self,
        policy_id: PolicyId,
        reason: ReleaseReason,
    ) -> Result<ReleaseOutcome> {
        let outcome = self.release.release(policy_id, reason)?;
        if let ReleaseOutcome::Released { released, .. } = &outcome {
            if let Some(first) = released.first() {
                self.after_event(&first.token);
            }
        }
        Ok(outcome)
    }

    /// Settle an exercised policy. Records its own metrics snapshot.
    pub fn process_settlement(&self, request: &SettlementRequest) -> Result<SettlementOutcome> {
        self.settlement.process(request)
    }

    // -----------------------------------------------------------------
    // Providers
    // -----------------------------------------------------------------

    pub fn request_deposit(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<PendingTransaction> {
        self.pending
            .request(TransactionKind::Deposit, provider, token, amount)
    }

    pub fn request_withdrawal(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<PendingTransaction> {
        self.pending
            .request(TransactionKind::Withdrawal, provider, token, amount)
    }

    pub fn request_premium_withdrawal(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<PendingTransaction> {
        self.pending
            .request(TransactionKind::PremiumWithdrawal, provider, token, amount)
    }

    pub fn mark_submitted(
        &self,
        id: PendingTransactionId,
        external_ref: &str,
    ) -> Result<PendingTransaction> {
        self.pending.mark_submitted(id, external_ref)
    }

    /// Snapshots follow every outcome that moved a balance: a finalized
    /// transaction, or a failed withdrawal whose reservation came back.
    pub fn handle_outcome(&self, report: &OutcomeReport) -> Result<OutcomeDisposition> {
        let disposition = self.pending.handle_outcome(report)?;
        if let OutcomeDisposition::Applied(status) = disposition {
            let tx = self.pending.transaction(report.transaction_id)?;
            let moved = match status {
                TransactionStatus::Processed => true,
                TransactionStatus::Failed => tx.kind() != TransactionKind::Deposit,
                _ => false,
            };
            if moved {
                self.after_event(&tx.token);
            }
        }
        Ok(disposition)
    }

    pub fn retry_transaction(&self, id: PendingTransactionId) -> Result<PendingTransaction> {
        self.pending.retry(id)
    }

    pub fn transaction(&self, id: PendingTransactionId) -> Result<PendingTransaction> {
        self.pending.transaction(id)
    }

    pub fn transactions_for(&self, provider: &ProviderId) -> Result<Vec<PendingTransaction>> {
        self.pending.transactions_for(provider)
    }

    /// Zero balance if the provider never held `token`.
    pub fn provider_balance(&self, provider: &ProviderId, token: &str) -> Result<ProviderBalance> {
        self.config.token(token)?;
        self.ledger.balance(provider, token)
    }

    // -----------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------

    /// # Errors
    /// `Validation` if no flag is set or `reason` is blank.
    pub fn pause_operations(
        &self,
        flags: PauseFlags,
        reason: &str,
    ) -> Result<PoolOperationalStatus> {
        if flags.is_empty() {
            return Err(PoolError::validation("no operation selected to pause"));
        }
        if reason.trim().is_empty() {
            return Err(PoolError::validation("pause reason is required"));
        }
        let now = Utc::now();
        let status = self
            .store
            .modify_operational_status(&|s| s.paused(flags, reason, now))?;
        tracing::warn!(
            deposits = status.deposits_paused,
            withdrawals = status.withdrawals_paused,
            allocations = status.allocations_paused,
            reason,
            "Operations paused"
        );
        Ok(status)
    }

    pub fn resume_operations(&self, flags: PauseFlags) -> Result<PoolOperationalStatus> {
        if flags.is_empty() {
            return Err(PoolError::validation("no operation selected to resume"));
        }
        let now = Utc::now();
        let status = self
            .store
            .modify_operational_status(&|s| s.resumed(flags, now))?;
        tracing::info!(
            deposits = status.deposits_paused,
            withdrawals = status.withdrawals_paused,
            allocations = status.allocations_paused,
            "Operations resumed"
        );
        Ok(status)
    }

    /// Live aggregates per configured token. Appends nothing.
    pub fn get_pool_stats(&self) -> Result<PoolStats> {
        let now = Utc::now();
        let tokens = self
            .config
            .tokens
            .iter()
            .map(|t| self.metrics.compute(&t.symbol, now))
            .collect::<Result<Vec<_>>>()?;
        Ok(PoolStats {
            tokens,
            status: self.store.operational_status()?,
        })
    }

    /// One reconciliation sweep, now.
    pub fn reconcile(&self) -> Result<ReconciliationReport> {
        self.reconciler.sweep(Utc::now())
    }

    /// Start the background sweeper at the configured interval. Must be
    /// called from within a tokio runtime.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        spawn_sweeper(
            Arc::clone(&self.reconciler),
            Duration::from_secs(self.config.sweep_interval_secs),
        )
    }

    /// Append a snapshot after a ledger event, when configured to.
    /// A failed snapshot does not fail the event.
    fn after_event(&self, token: &str) {
        if !self.config.record_metrics_on_events {
            return;
        }
        if let Err(err) = self.metrics.record(token) {
            tracing::warn!(token, error = %err, "Metrics snapshot after event failed");
        }
    }
}
