//! Storage boundary for all pool state.
//!
//! Each `modify_*` / `update_*` method is one atomic read-modify-write of a
//! single record: the closure receives the current value and returns the
//! replacement, or an error that aborts the step and leaves the record
//! unchanged. Orchestrations build on these steps and never assume atomicity
//! across two records.

use hedgepool_types::{
    LedgerEntry, PendingTransaction, PendingTransactionId, PolicyAllocation, PolicyId,
    PoolMetricsSnapshot, PoolOperationalStatus, PremiumDistributionRecord, ProviderBalance,
    ProviderId, Result, SettlementRecord,
};

/// What a balance step does when no record exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingBalance {
    /// Start from a zero balance (first deposit or first premium credit).
    Create,
    /// Fail with `BalanceNotFound`.
    Reject,
}

pub trait PoolStore: Send + Sync {
    // --- Balances ----------------------------------------------------

    fn balance(&self, provider: &ProviderId, token: &str) -> Result<Option<ProviderBalance>>;

    /// All balance records for a token, ordered by provider.
    fn balances(&self, token: &str) -> Result<Vec<ProviderBalance>>;

    fn modify_balance(
        &self,
        provider: &ProviderId,
        token: &str,
        missing: MissingBalance,
        apply: &dyn Fn(&ProviderBalance) -> Result<ProviderBalance>,
    ) -> Result<ProviderBalance>;

    // --- Allocations -------------------------------------------------

    /// Persist a policy's allocation batch in one step.
    ///
    /// # Errors
    /// `PolicyAlreadyFunded` if the policy already has allocations.
    fn insert_allocations(&self, policy_id: PolicyId, batch: Vec<PolicyAllocation>) -> Result<()>;

    fn allocations(&self, policy_id: PolicyId) -> Result<Vec<PolicyAllocation>>;

    fn allocations_by_token(&self, token: &str) -> Result<Vec<PolicyAllocation>>;

    fn update_allocation(
        &self,
        policy_id: PolicyId,
        provider: &ProviderId,
        apply: &dyn Fn(&PolicyAllocation) -> Result<PolicyAllocation>,
    ) -> Result<PolicyAllocation>;

    // --- Premium distribution records ---------------------------------

    /// Insert if no record exists for the allocation. Returns whether the
    /// record was written.
    fn insert_distribution(&self, record: PremiumDistributionRecord) -> Result<bool>;

    fn distributions(&self, policy_id: PolicyId) -> Result<Vec<PremiumDistributionRecord>>;

    fn distributions_by_token(&self, token: &str) -> Result<Vec<PremiumDistributionRecord>>;

    // --- Pending transactions ----------------------------------------

    fn insert_transaction(&self, tx: PendingTransaction) -> Result<()>;

    fn transaction(&self, id: PendingTransactionId) -> Result<Option<PendingTransaction>>;

    fn transactions(&self) -> Result<Vec<PendingTransaction>>;

    fn update_transaction(
        &self,
        id: PendingTransactionId,
        apply: &dyn Fn(&PendingTransaction) -> Result<PendingTransaction>,
    ) -> Result<PendingTransaction>;

    // --- Settlements -------------------------------------------------

    /// Insert if absent. Returns the existing record when one is present.
    fn insert_settlement(&self, record: SettlementRecord) -> Result<Option<SettlementRecord>>;

    fn settlement(&self, policy_id: PolicyId) -> Result<Option<SettlementRecord>>;

    fn settlements(&self) -> Result<Vec<SettlementRecord>>;

    fn update_settlement(
        &self,
        policy_id: PolicyId,
        apply: &dyn Fn(&SettlementRecord) -> Result<SettlementRecord>,
    ) -> Result<SettlementRecord>;

    // --- Payout ledger -----------------------------------------------

    fn append_ledger_entry(&self, entry: LedgerEntry) -> Result<()>;

    fn ledger_entries(&self) -> Result<Vec<LedgerEntry>>;

    // --- Metrics -----------------------------------------------------

    fn append_snapshot(&self, snapshot: PoolMetricsSnapshot) -> Result<()>;

    fn snapshots(&self, token: &str) -> Result<Vec<PoolMetricsSnapshot>>;

    // --- Operational status ------------------------------------------

    fn operational_status(&self) -> Result<PoolOperationalStatus>;

    fn modify_operational_status(
        &self,
        apply: &dyn Fn(&PoolOperationalStatus) -> PoolOperationalStatus,
    ) -> Result<PoolOperationalStatus>;
}
