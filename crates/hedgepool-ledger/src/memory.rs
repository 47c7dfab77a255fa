use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hedgepool_types::{
    LedgerEntry, PendingTransaction, PendingTransactionId, PolicyAllocation, PolicyId, PoolError,
    PoolMetricsSnapshot, PoolOperationalStatus, PremiumDistributionRecord, ProviderBalance,
    ProviderId, Result, SettlementRecord, Token,
};

use crate::store::{MissingBalance, PoolStore};

/// In-memory store for tests, local demos, and embedding.
///
/// A single `RwLock` guards all records, so every store step is
/// serializable against every other.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    balances: BTreeMap<(ProviderId, Token), ProviderBalance>,
    allocations: BTreeMap<PolicyId, Vec<PolicyAllocation>>,
    distributions: Vec<PremiumDistributionRecord>,
    transactions: BTreeMap<PendingTransactionId, PendingTransaction>,
    settlements: BTreeMap<PolicyId, SettlementRecord>,
    ledger: Vec<LedgerEntry>,
    snapshots: Vec<PoolMetricsSnapshot>,
    status: PoolOperationalStatus,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.inner
            .read()
            .map_err(|_| PoolError::Internal("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.inner
            .write()
            .map_err(|_| PoolError::Internal("store lock poisoned".into()))
    }
}

impl PoolStore for InMemoryStore {
    fn balance(&self, provider: &ProviderId, token: &str) -> Result<Option<ProviderBalance>> {
        let state = self.read()?;
        Ok(state
            .balances
            .get(&(provider.clone(), token.to_string()))
            .cloned())
    }

    fn balances(&self, token: &str) -> Result<Vec<ProviderBalance>> {
        let state = self.read()?;
        Ok(state
            .balances
            .values()
            .filter(|b| b.token == token)
            .cloned()
            .collect())
    }

    fn modify_balance(
        &self,
        provider: &ProviderId,
        token: &str,
        missing: MissingBalance,
        apply: &dyn Fn(&ProviderBalance) -> Result<ProviderBalance>,
    ) -> Result<ProviderBalance> {
        let mut state = self.write()?;
        let key = (provider.clone(), token.to_string());
        let current = match (state.balances.get(&key), missing) {
            (Some(existing), _) => existing.clone(),
            (None, MissingBalance::Create) => ProviderBalance::new(provider.clone(), token),
            (None, MissingBalance::Reject) => {
                return Err(PoolError::BalanceNotFound {
                    provider: provider.clone(),
                    token: token.to_string(),
                });
            }
        };
        let next = apply(&current)?;
        state.balances.insert(key, next.clone());
        Ok(next)
    }

    fn insert_allocations(&self, policy_id: PolicyId, batch: Vec<PolicyAllocation>) -> Result<()> {
        let mut state = self.write()?;
        if state.allocations.contains_key(&policy_id) {
            return Err(PoolError::PolicyAlreadyFunded(policy_id));
        }
        state.allocations.insert(policy_id, batch);
        Ok(())
    }

    fn allocations(&self, policy_id: PolicyId) -> Result<Vec<PolicyAllocation>> {
        let state = self.read()?;
        Ok(state
            .allocations
            .get(&policy_id)
            .cloned()
            .unwrap_or_default())
    }

    fn allocations_by_token(&self, token: &str) -> Result<Vec<PolicyAllocation>> {
        let state = self.read()?;
        Ok(state
            .allocations
            .values()
            .flatten()
            .filter(|a| a.token == token)
            .cloned()
            .collect())
    }

    fn update_allocation(
        &self,
        policy_id: PolicyId,
        provider: &ProviderId,
        apply: &dyn Fn(&PolicyAllocation) -> Result<PolicyAllocation>,
    ) -> Result<PolicyAllocation> {
        let mut state = self.write()?;
        let slot = state
            .allocations
            .get_mut(&policy_id)
            .and_then(|batch| batch.iter_mut().find(|a| &a.provider == provider))
            .ok_or(PoolError::PolicyNotFound(policy_id))?;
        let next = apply(slot)?;
        *slot = next.clone();
        Ok(next)
    }

    fn insert_distribution(&self, record: PremiumDistributionRecord) -> Result<bool> {
        let mut state = self.write()?;
        if state
            .distributions
            .iter()
            .any(|r| r.allocation_id == record.allocation_id)
        {
            return Ok(false);
        }
        state.distributions.push(record);
        Ok(true)
    }

    fn distributions(&self, policy_id: PolicyId) -> Result<Vec<PremiumDistributionRecord>> {
        let state = self.read()?;
        Ok(state
            .distributions
            .iter()
            .filter(|r| r.policy_id == policy_id)
            .cloned()
            .collect())
    }

    fn distributions_by_token(&self, token: &str) -> Result<Vec<PremiumDistributionRecord>> {
        let state = self.read()?;
        Ok(state
            .distributions
            .iter()
            .filter(|r| r.token == token)
            .cloned()
            .collect())
    }

    fn insert_transaction(&self, tx: PendingTransaction) -> Result<()> {
        let mut state = self.write()?;
        if state.transactions.contains_key(&tx.id) {
            return Err(PoolError::inconsistent(format!(
                "pending transaction {} already exists",
                tx.id
            )));
        }
        state.transactions.insert(tx.id, tx);
        Ok(())
    }

    fn transaction(&self, id: PendingTransactionId) -> Result<Option<PendingTransaction>> {
        Ok(self.read()?.transactions.get(&id).cloned())
    }

    fn transactions(&self) -> Result<Vec<PendingTransaction>> {
        Ok(self.read()?.transactions.values().cloned().collect())
    }

    fn update_transaction(
        &self,
        id: PendingTransactionId,
        apply: &dyn Fn(&PendingTransaction) -> Result<PendingTransaction>,
    ) -> Result<PendingTransaction> {
        let mut state = self.write()?;
        let slot = state
            .transactions
            .get_mut(&id)
            .ok_or(PoolError::TransactionNotFound(id))?;
        let next = apply(slot)?;
        *slot = next.clone();
        Ok(next)
    }

    fn insert_settlement(&self, record: SettlementRecord) -> Result<Option<SettlementRecord>> {
        let mut state = self.write()?;
        let policy_id = record.policy_id();
        if let Some(existing) = state.settlements.get(&policy_id) {
            return Ok(Some(existing.clone()));
        }
        state.settlements.insert(policy_id, record);
        Ok(None)
    }

    fn settlement(&self, policy_id: PolicyId) -> Result<Option<SettlementRecord>> {
        Ok(self.read()?.settlements.get(&policy_id).cloned())
    }

    fn settlements(&self) -> Result<Vec<SettlementRecord>> {
        Ok(self.read()?.settlements.values().cloned().collect())
    }

    fn update_settlement(
        &self,
        policy_id: PolicyId,
        apply: &dyn Fn(&SettlementRecord) -> Result<SettlementRecord>,
    ) -> Result<SettlementRecord> {
        let mut state = self.write()?;
        let slot = state
            .settlements
            .get_mut(&policy_id)
            .ok_or(PoolError::PolicyNotFound(policy_id))?;
        let next = apply(slot)?;
        *slot = next.clone();
        Ok(next)
    }

    fn append_ledger_entry(&self, entry: LedgerEntry) -> Result<()> {
        self.write()?.ledger.push(entry);
        Ok(())
    }

    fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.read()?.ledger.clone())
    }

    fn append_snapshot(&self, snapshot: PoolMetricsSnapshot) -> Result<()> {
        self.write()?.snapshots.push(snapshot);
        Ok(())
    }

    fn snapshots(&self, token: &str) -> Result<Vec<PoolMetricsSnapshot>> {
        let state = self.read()?;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.token == token)
            .cloned()
            .collect())
    }

    fn operational_status(&self) -> Result<PoolOperationalStatus> {
        Ok(self.read()?.status.clone())
    }

    fn modify_operational_status(
        &self,
        apply: &dyn Fn(&PoolOperationalStatus) -> PoolOperationalStatus,
    ) -> Result<PoolOperationalStatus> {
        let mut state = self.write()?;
        let next = apply(&state.status);
        state.status = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn modify_balance_missing_policy() {
        let store = InMemoryStore::new();
        let alice = ProviderId::new("SP2ALICE");
        let err = store
            .modify_balance(&alice, "STX", MissingBalance::Reject, &|b| Ok(b.clone()))
            .unwrap_err();
        assert!(matches!(err, PoolError::BalanceNotFound { .. }));

        let created = store
            .modify_balance(&alice, "STX", MissingBalance::Create, &|b| {
                b.credit_deposit(Decimal::TEN)
            })
            .unwrap();
        assert_eq!(created.available_balance, Decimal::TEN);
        assert_eq!(store.balances("STX").unwrap().len(), 1);
        assert!(store.balances("sBTC").unwrap().is_empty());
    }

    #[test]
    fn failed_closure_leaves_record_unchanged() {
        let store = InMemoryStore::new();
        let alice = ProviderId::new("SP2ALICE");
        store
            .modify_balance(&alice, "STX", MissingBalance::Create, &|b| {
                b.credit_deposit(Decimal::TEN)
            })
            .unwrap();
        let before = store.balance(&alice, "STX").unwrap().unwrap();
        assert!(
            store
                .modify_balance(&alice, "STX", MissingBalance::Reject, &|b| {
                    b.lock(Decimal::ONE_HUNDRED)
                })
                .is_err()
        );
        assert_eq!(store.balance(&alice, "STX").unwrap().unwrap(), before);
    }

    #[test]
    fn allocation_batch_inserted_once() {
        let store = InMemoryStore::new();
        let policy = PolicyId::new();
        let batch = vec![PolicyAllocation::dummy(policy, "SP2ALICE", Decimal::TEN)];
        store.insert_allocations(policy, batch.clone()).unwrap();
        let err = store.insert_allocations(policy, batch).unwrap_err();
        assert!(matches!(err, PoolError::PolicyAlreadyFunded(p) if p == policy));
        assert_eq!(store.allocations(policy).unwrap().len(), 1);
        assert_eq!(store.allocations_by_token("STX").unwrap().len(), 1);
    }

    #[test]
    fn settlement_insert_if_absent() {
        use chrono::Utc;
        use hedgepool_types::SettlementRequest;

        let store = InMemoryStore::new();
        let request = SettlementRequest {
            policy_id: PolicyId::new(),
            amount: Decimal::ONE,
            token: "STX".into(),
            contributions: Vec::new(),
            external_ref: "0x1".into(),
        };
        let record = SettlementRecord::new(request, Utc::now());
        assert!(store.insert_settlement(record.clone()).unwrap().is_none());
        assert_eq!(store.insert_settlement(record.clone()).unwrap(), Some(record));
    }

    #[test]
    fn distribution_inserted_once_per_allocation() {
        use chrono::Utc;
        use hedgepool_types::{AllocationId, DistributionBatchId};

        let store = InMemoryStore::new();
        let policy = PolicyId::new();
        let alice = ProviderId::new("SP2ALICE");
        let record = PremiumDistributionRecord {
            policy_id: policy,
            provider: alice.clone(),
            allocation_id: AllocationId::deterministic(policy, &alice),
            token: "STX".into(),
            amount: Decimal::TEN,
            batch_id: DistributionBatchId::new(),
            distributed_at: Utc::now(),
        };
        assert!(store.insert_distribution(record.clone()).unwrap());
        assert!(!store.insert_distribution(record).unwrap());
        assert_eq!(store.distributions(policy).unwrap().len(), 1);
        assert_eq!(store.distributions_by_token("STX").unwrap().len(), 1);
        assert!(store.distributions_by_token("sBTC").unwrap().is_empty());
    }
}
