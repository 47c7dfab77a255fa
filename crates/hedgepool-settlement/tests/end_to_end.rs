//! End-to-end tests through the `LiquidityPool` facade.
//!
//! These walk whole policy lifecycles:
//! deposit -> allocate -> premium -> {expire | exercise + settle} -> withdraw
//!
//! and check after each that the pool's capital is conserved and that
//! replays of external callbacks change nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hedgepool_allocation::{PremiumDistribution, ReleaseOutcome};
use hedgepool_ledger::{InMemoryStore, MissingBalance, OutcomeDisposition, PoolStore};
use hedgepool_settlement::{
    ConservationChecker, LiquidityPool, SettlementOutcome, spawn_sweeper,
};
use hedgepool_types::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rust_decimal::Decimal;

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

/// Helper: a pool plus the external-ledger side of each transfer.
struct PoolHarness {
    store: Arc<InMemoryStore>,
    pool: LiquidityPool<InMemoryStore>,
    next_ref: std::cell::Cell<u64>,
}

impl PoolHarness {
    fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    fn with_config(config: PoolConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let pool = LiquidityPool::new(Arc::clone(&store), Arc::new(EchoPreparer), config)
            .expect("default config is valid");
        Self {
            store,
            pool,
            next_ref: std::cell::Cell::new(0),
        }
    }

    fn external_ref(&self) -> String {
        let n = self.next_ref.get() + 1;
        self.next_ref.set(n);
        format!("0x{n:064x}")
    }

    /// Broadcast and report an outcome. Returns the report for replays.
    fn settle_tx(&self, tx: &PendingTransaction, status: OutcomeStatus) -> OutcomeReport {
        let external_ref = self.external_ref();
        self.pool.mark_submitted(tx.id, &external_ref).unwrap();
        let report = OutcomeReport {
            transaction_id: tx.id,
            external_ref,
            status,
            block_height: Some(150_000),
            error: (status == OutcomeStatus::Failed).then(|| "abort_by_response".to_string()),
        };
        self.pool.handle_outcome(&report).unwrap();
        report
    }

    fn deposit(&self, provider: &str, amount: i64) {
        let tx = self
            .pool
            .request_deposit(&ProviderId::new(provider), "STX", dec(amount))
            .unwrap();
        self.settle_tx(&tx, OutcomeStatus::Confirmed);
    }

    fn balance(&self, provider: &str) -> ProviderBalance {
        self.pool
            .provider_balance(&ProviderId::new(provider), "STX")
            .unwrap()
    }

    fn assert_conserved(&self) {
        let violations = ConservationChecker::new(Arc::clone(&self.store))
            .check("STX")
            .unwrap();
        assert!(violations.is_empty(), "conservation violated: {violations:?}");
    }
}

/// A store that refuses chosen writes, standing in for a process that
/// stops between two steps of an orchestration.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    refuse_balance_writes: AtomicBool,
    refuse_processed: AtomicBool,
}

impl FlakyStore {
    fn refused() -> PoolError {
        PoolError::Internal("store write refused".into())
    }
}

impl PoolStore for FlakyStore {
    fn balance(&self, provider: &ProviderId, token: &str) -> Result<Option<ProviderBalance>> {
        self.inner.balance(provider, token)
    }

    fn balances(&self, token: &str) -> Result<Vec<ProviderBalance>> {
        self.inner.balances(token)
    }

    fn modify_balance(
        &self,
        provider: &ProviderId,
        token: &str,
        missing: MissingBalance,
        apply: &dyn Fn(&ProviderBalance) -> Result<ProviderBalance>,
    ) -> Result<ProviderBalance> {
        if self.refuse_balance_writes.load(Ordering::SeqCst) {
            return Err(Self::refused());
        }
        self.inner.modify_balance(provider, token, missing, apply)
    }

    fn insert_allocations(&self, policy_id: PolicyId, batch: Vec<PolicyAllocation>) -> Result<()> {
        self.inner.insert_allocations(policy_id, batch)
    }

    fn allocations(&self, policy_id: PolicyId) -> Result<Vec<PolicyAllocation>> {
        self.inner.allocations(policy_id)
    }

    fn allocations_by_token(&self, token: &str) -> Result<Vec<PolicyAllocation>> {
        self.inner.allocations_by_token(token)
    }

    fn update_allocation(
        &self,
        policy_id: PolicyId,
        provider: &ProviderId,
        apply: &dyn Fn(&PolicyAllocation) -> Result<PolicyAllocation>,
    ) -> Result<PolicyAllocation> {
        self.inner.update_allocation(policy_id, provider, apply)
    }

    fn insert_distribution(&self, record: PremiumDistributionRecord) -> Result<bool> {
        self.inner.insert_distribution(record)
    }

    fn distributions(&self, policy_id: PolicyId) -> Result<Vec<PremiumDistributionRecord>> {
        self.inner.distributions(policy_id)
    }

    fn distributions_by_token(&self, token: &str) -> Result<Vec<PremiumDistributionRecord>> {
        self.inner.distributions_by_token(token)
    }

    fn insert_transaction(&self, tx: PendingTransaction) -> Result<()> {
        self.inner.insert_transaction(tx)
    }

    fn transaction(&self, id: PendingTransactionId) -> Result<Option<PendingTransaction>> {
        self.inner.transaction(id)
    }

    fn transactions(&self) -> Result<Vec<PendingTransaction>> {
        self.inner.transactions()
    }

    fn update_transaction(
        &self,
        id: PendingTransactionId,
        apply: &dyn Fn(&PendingTransaction) -> Result<PendingTransaction>,
    ) -> Result<PendingTransaction> {
        self.inner.update_transaction(id, &|t| {
            let next = apply(t)?;
            if next.status == TransactionStatus::Processed
                && self.refuse_processed.load(Ordering::SeqCst)
            {
                return Err(Self::refused());
            }
            Ok(next)
        })
    }

    fn insert_settlement(&self, record: SettlementRecord) -> Result<Option<SettlementRecord>> {
        self.inner.insert_settlement(record)
    }

    fn settlement(&self, policy_id: PolicyId) -> Result<Option<SettlementRecord>> {
        self.inner.settlement(policy_id)
    }

    fn settlements(&self) -> Result<Vec<SettlementRecord>> {
        self.inner.settlements()
    }

    fn update_settlement(
        &self,
        policy_id: PolicyId,
        apply: &dyn Fn(&SettlementRecord) -> Result<SettlementRecord>,
    ) -> Result<SettlementRecord> {
        self.inner.update_settlement(policy_id, apply)
    }

    fn append_ledger_entry(&self, entry: LedgerEntry) -> Result<()> {
        self.inner.append_ledger_entry(entry)
    }

    fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.inner.ledger_entries()
    }

    fn append_snapshot(&self, snapshot: PoolMetricsSnapshot) -> Result<()> {
        self.inner.append_snapshot(snapshot)
    }

    fn snapshots(&self, token: &str) -> Result<Vec<PoolMetricsSnapshot>> {
        self.inner.snapshots(token)
    }

    fn operational_status(&self) -> Result<PoolOperationalStatus> {
        self.inner.operational_status()
    }

    fn modify_operational_status(
        &self,
        apply: &dyn Fn(&PoolOperationalStatus) -> PoolOperationalStatus,
    ) -> Result<PoolOperationalStatus> {
        self.inner.modify_operational_status(apply)
    }
}

fn flaky_pool() -> (Arc<FlakyStore>, LiquidityPool<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let config = PoolConfig {
        stale_after_secs: 0,
        ..PoolConfig::default()
    };
    let pool = LiquidityPool::new(Arc::clone(&store), Arc::new(EchoPreparer), config)
        .expect("default config is valid");
    (store, pool)
}

fn confirm(pool: &LiquidityPool<FlakyStore>, tx: &PendingTransaction) -> Result<OutcomeDisposition> {
    let external_ref = format!("0xflaky-{}", tx.id);
    pool.mark_submitted(tx.id, &external_ref)?;
    pool.handle_outcome(&OutcomeReport {
        transaction_id: tx.id,
        external_ref,
        status: OutcomeStatus::Confirmed,
        block_height: Some(150_000),
        error: None,
    })
}

fn assert_flaky_conserved(store: &Arc<FlakyStore>) {
    let violations = ConservationChecker::new(Arc::clone(store))
        .check("STX")
        .unwrap();
    assert!(violations.is_empty(), "conservation violated: {violations:?}");
}

// =========================================================================
// Full lifecycles
// =========================================================================

#[test]
fn expiry_lifecycle_returns_collateral_and_keeps_premium() {
    let h = PoolHarness::new();
    h.deposit("SP2ALICE", 700);
    h.deposit("SP2BOB", 300);

    let policy = PolicyId::new();
    h.pool
        .allocate_capital(policy, "STX", dec(1000), dec(120))
        .unwrap();
    assert_eq!(h.balance("SP2ALICE").locked_balance, dec(700));
    h.assert_conserved();

    let PremiumDistribution::Distributed { records, .. } =
        h.pool.distribute_premium(policy, dec(120), "STX").unwrap()
    else {
        panic!("expected a distribution");
    };
    assert_eq!(records.len(), 2);
    assert_eq!(h.balance("SP2ALICE").earned_premiums, dec(84));
    assert_eq!(h.balance("SP2BOB").earned_premiums, dec(36));

    let outcome = h
        .pool
        .release_collateral(policy, ReleaseReason::Expired)
        .unwrap();
    assert!(matches!(outcome, ReleaseOutcome::Released { returned, .. } if returned == dec(1000)));
    assert_eq!(h.balance("SP2ALICE").available_balance, dec(700));
    assert_eq!(h.balance("SP2ALICE").locked_balance, Decimal::ZERO);
    assert_eq!(
        h.pool
            .release_collateral(policy, ReleaseReason::Expired)
            .unwrap(),
        ReleaseOutcome::NoActiveAllocations
    );
    h.assert_conserved();

    // ALICE takes out her premium, then all her capital.
    let alice = ProviderId::new("SP2ALICE");
    let premium_tx = h
        .pool
        .request_premium_withdrawal(&alice, "STX", dec(84))
        .unwrap();
    assert_eq!(h.balance("SP2ALICE").pending_premiums, dec(84));
    h.assert_conserved();
    h.settle_tx(&premium_tx, OutcomeStatus::Confirmed);
    assert_eq!(h.balance("SP2ALICE").withdrawn_premiums, dec(84));
    assert_eq!(h.balance("SP2ALICE").pending_premiums, Decimal::ZERO);

    let capital_tx = h.pool.request_withdrawal(&alice, "STX", dec(700)).unwrap();
    h.assert_conserved();
    h.settle_tx(&capital_tx, OutcomeStatus::Confirmed);
    assert_eq!(h.balance("SP2ALICE").total_deposited, Decimal::ZERO);
    h.assert_conserved();

    let stats = h.pool.get_pool_stats().unwrap();
    assert_eq!(stats.token("STX").unwrap().provider_count, 1);
    assert_eq!(stats.token("STX").unwrap().active_policy_count, 0);
}

#[test]
fn exercise_lifecycle_settles_payout() {
    let h = PoolHarness::new();
    h.deposit("SP2ALICE", 750);
    h.deposit("SP2BOB", 50);

    let policy = PolicyId::new();
    let allocations = h
        .pool
        .allocate_capital(policy, "STX", dec(700), dec(70))
        .unwrap();
    let amounts: Vec<Decimal> = allocations.iter().map(|a| a.allocated_amount).collect();
    assert_eq!(amounts, vec![Decimal::new(65625, 2), Decimal::new(4375, 2)]);

    let request = SettlementRequest {
        policy_id: policy,
        amount: dec(350),
        token: "STX".into(),
        contributions: vec![
            ProviderContribution::new(ProviderId::new("SP2ALICE"), Decimal::new(328_125, 3)),
            ProviderContribution::new(ProviderId::new("SP2BOB"), Decimal::new(21_875, 3)),
        ],
        external_ref: "0xsettle".into(),
    };
    let outcome = h.pool.process_settlement(&request).unwrap();
    assert!(matches!(outcome, SettlementOutcome::Settled(ref r) if r.is_complete()));

    let alice = h.balance("SP2ALICE");
    assert_eq!(alice.total_deposited, Decimal::new(421_875, 3));
    assert_eq!(alice.available_balance, Decimal::new(421_875, 3));
    assert_eq!(alice.locked_balance, Decimal::ZERO);
    assert_eq!(h.balance("SP2BOB").total_deposited, Decimal::new(28_125, 3));
    h.assert_conserved();

    assert_eq!(
        h.pool.process_settlement(&request).unwrap(),
        SettlementOutcome::AlreadySettled
    );
    assert_eq!(h.store.ledger_entries().unwrap().len(), 1);
    assert!(h.pool.reconcile().unwrap().is_clean());
}

// =========================================================================
// Pending transactions
// =========================================================================

#[test]
fn failed_withdrawal_restores_exactly_the_reservation() {
    let h = PoolHarness::new();
    h.deposit("SP2ALICE", 100);
    let alice = ProviderId::new("SP2ALICE");

    let tx = h.pool.request_withdrawal(&alice, "STX", dec(50)).unwrap();
    assert_eq!(h.balance("SP2ALICE").available_balance, dec(50));

    let report = h.settle_tx(&tx, OutcomeStatus::Failed);
    assert_eq!(h.balance("SP2ALICE").available_balance, dec(100));
    assert_eq!(
        h.pool.handle_outcome(&report).unwrap(),
        OutcomeDisposition::Duplicate
    );
    assert_eq!(h.balance("SP2ALICE").available_balance, dec(100));
    h.assert_conserved();

    // Retry re-reserves and can then succeed.
    h.pool.retry_transaction(tx.id).unwrap();
    assert_eq!(h.balance("SP2ALICE").available_balance, dec(50));
    h.settle_tx(&h.pool.transaction(tx.id).unwrap(), OutcomeStatus::Confirmed);
    assert_eq!(h.balance("SP2ALICE").total_deposited, dec(50));
    h.assert_conserved();
}

#[test]
fn overdrawn_withdrawal_rejected_unchanged() {
    let h = PoolHarness::new();
    h.deposit("SP2ALICE", 100);
    let before = h.balance("SP2ALICE");
    let err = h
        .pool
        .request_withdrawal(&ProviderId::new("SP2ALICE"), "STX", dec(150))
        .unwrap_err();
    assert!(matches!(err, PoolError::InsufficientBalance { .. }));
    assert_eq!(h.balance("SP2ALICE"), before);
    assert!(
        h.pool
            .transactions_for(&ProviderId::new("SP2ALICE"))
            .unwrap()
            .iter()
            .all(|tx| tx.kind() == TransactionKind::Deposit)
    );
}

#[test]
fn replayed_confirmation_applies_once() {
    let h = PoolHarness::new();
    let tx = h
        .pool
        .request_deposit(&ProviderId::new("SP2ALICE"), "STX", dec(500))
        .unwrap();
    let report = h.settle_tx(&tx, OutcomeStatus::Confirmed);
    for _ in 0..3 {
        assert_eq!(
            h.pool.handle_outcome(&report).unwrap(),
            OutcomeDisposition::Duplicate
        );
    }
    assert_eq!(h.balance("SP2ALICE").total_deposited, dec(500));

    let mut forged = report;
    forged.external_ref = "0xforged".into();
    assert!(matches!(
        h.pool.handle_outcome(&forged),
        Err(PoolError::InconsistentState { .. })
    ));
    assert_eq!(h.balance("SP2ALICE").total_deposited, dec(500));
}

#[test]
fn concurrent_withdrawals_and_outcomes_conserve_capital() {
    let h = PoolHarness::new();
    let providers = ["SP2ALICE", "SP2BOB", "SP2CAROL"];
    for provider in providers {
        h.deposit(provider, 1_000);
    }
    let pool = &h.pool;

    std::thread::scope(|s| {
        for worker in 0..4u64 {
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(0x5354_5800 + worker);
                for round in 0..25 {
                    let provider = ProviderId::new(providers[rng.gen_range(0..providers.len())]);
                    let amount = Decimal::from(rng.gen_range(1i64..400));
                    // Overdraws are expected once a provider runs low.
                    let Ok(tx) = pool.request_withdrawal(&provider, "STX", amount) else {
                        continue;
                    };
                    let external_ref = format!("0xw{worker}r{round}");
                    pool.mark_submitted(tx.id, &external_ref).unwrap();
                    let status = if rng.gen_bool(0.5) {
                        OutcomeStatus::Confirmed
                    } else {
                        OutcomeStatus::Failed
                    };
                    let report = OutcomeReport {
                        transaction_id: tx.id,
                        external_ref,
                        status,
                        block_height: None,
                        error: None,
                    };
                    pool.handle_outcome(&report).unwrap();
                    assert_eq!(
                        pool.handle_outcome(&report).unwrap(),
                        OutcomeDisposition::Duplicate
                    );
                }
            });
        }
    });

    for provider in providers {
        let balance = h.balance(provider);
        balance.check_invariants().unwrap();
        let withdrawn: Decimal = h
            .pool
            .transactions_for(&ProviderId::new(provider))
            .unwrap()
            .iter()
            .filter(|tx| {
                tx.kind() == TransactionKind::Withdrawal
                    && tx.status == TransactionStatus::Processed
            })
            .map(|tx| tx.amount)
            .sum();
        assert_eq!(balance.total_deposited, dec(1_000) - withdrawn);
    }
    h.assert_conserved();
}

// =========================================================================
// Operations
// =========================================================================

#[test]
fn paused_allocations_leave_deposits_open() {
    let h = PoolHarness::new();
    h.deposit("SP2ALICE", 1000);
    h.pool
        .pause_operations(PauseFlags::only(Operation::Allocations), "oracle halt")
        .unwrap();

    let err = h
        .pool
        .allocate_capital(PolicyId::new(), "STX", dec(100), Decimal::ZERO)
        .unwrap_err();
    assert!(matches!(err, PoolError::OperationPaused { .. }));
    h.deposit("SP2ALICE", 10);
    assert_eq!(h.balance("SP2ALICE").available_balance, dec(1010));

    let stats = h.pool.get_pool_stats().unwrap();
    assert!(stats.status.allocations_paused);
    assert_eq!(stats.status.reason.as_deref(), Some("oracle halt"));
}

#[test]
fn stale_confirmation_finalized_by_reconcile() {
    let h = PoolHarness::with_config(PoolConfig {
        stale_after_secs: 0,
        ..PoolConfig::default()
    });
    let tx = h
        .pool
        .request_deposit(&ProviderId::new("SP2ALICE"), "STX", dec(250))
        .unwrap();
    h.pool.mark_submitted(tx.id, "0xlost").unwrap();
    // The confirmation was recorded but finalization never ran.
    h.store
        .update_transaction(tx.id, &|t| {
            t.apply_outcome(
                &OutcomeReport {
                    transaction_id: t.id,
                    external_ref: "0xlost".into(),
                    status: OutcomeStatus::Confirmed,
                    block_height: None,
                    error: None,
                },
                chrono::Utc::now(),
            )
        })
        .unwrap();
    assert_eq!(h.balance("SP2ALICE").total_deposited, Decimal::ZERO);

    let report = h.pool.reconcile().unwrap();
    assert_eq!(report.transactions_finalized, vec![tx.id]);
    assert_eq!(h.balance("SP2ALICE").total_deposited, dec(250));
    assert_eq!(
        h.pool.transaction(tx.id).unwrap().status,
        TransactionStatus::Processed
    );
}

#[tokio::test]
async fn background_sweeper_resumes_interrupted_settlement() {
    let h = PoolHarness::with_config(PoolConfig {
        stale_after_secs: 0,
        ..PoolConfig::default()
    });
    h.deposit("SP2ALICE", 600);
    h.deposit("SP2BOB", 400);
    let policy = PolicyId::new();
    h.pool
        .allocate_capital(policy, "STX", dec(1000), Decimal::ZERO)
        .unwrap();

    // A settlement that stopped right after being recorded.
    let request = SettlementRequest {
        policy_id: policy,
        amount: dec(100),
        token: "STX".into(),
        contributions: vec![
            ProviderContribution::new(ProviderId::new("SP2ALICE"), dec(60)),
            ProviderContribution::new(ProviderId::new("SP2BOB"), dec(40)),
        ],
        external_ref: "0xpayout".into(),
    };
    h.store
        .insert_settlement(SettlementRecord::new(request, chrono::Utc::now()))
        .unwrap();

    let reconciler = Arc::new(hedgepool_settlement::Reconciler::new(
        Arc::clone(&h.store),
        Arc::new(EchoPreparer),
        Arc::new(h.pool.config().clone()),
    ));
    let handle = spawn_sweeper(reconciler, Duration::from_millis(10));
    let mut reports = handle.reports();
    tokio::time::timeout(Duration::from_secs(5), reports.changed())
        .await
        .unwrap()
        .unwrap();
    let report = reports.borrow().clone().unwrap();
    assert_eq!(report.settlements_resumed, vec![policy]);
    handle.shutdown().await.unwrap();

    assert!(h.store.settlement(policy).unwrap().unwrap().is_complete());
    assert_eq!(h.balance("SP2ALICE").total_deposited, dec(540));
    assert_eq!(h.balance("SP2ALICE").available_balance, dec(540));
    assert_eq!(h.balance("SP2BOB").total_deposited, dec(360));
    h.assert_conserved();
}

// =========================================================================
// Interrupted orchestrations
// =========================================================================

#[test]
fn premium_claimed_before_failed_credit_is_repaired() {
    let (store, pool) = flaky_pool();
    for (provider, amount) in [("SP2ALICE", 700), ("SP2BOB", 300)] {
        let tx = pool
            .request_deposit(&ProviderId::new(provider), "STX", dec(amount))
            .unwrap();
        confirm(&pool, &tx).unwrap();
    }
    let policy = PolicyId::new();
    pool.allocate_capital(policy, "STX", dec(1000), dec(120))
        .unwrap();

    // The first allocation's claim lands; its credit does not.
    store.refuse_balance_writes.store(true, Ordering::SeqCst);
    let err = pool.distribute_premium(policy, dec(120), "STX").unwrap_err();
    assert!(matches!(err, PoolError::InconsistentState { .. }));
    store.refuse_balance_writes.store(false, Ordering::SeqCst);

    let claimed: Vec<PolicyAllocation> = store
        .allocations(policy)
        .unwrap()
        .into_iter()
        .filter(|a| a.premium_distributed)
        .collect();
    assert_eq!(claimed.len(), 1);
    assert!(store.distributions(policy).unwrap().is_empty());

    let report = pool.reconcile().unwrap();
    assert_eq!(report.premiums_repaired, vec![claimed[0].id]);
    assert!(report.is_clean(), "{report:?}");

    // The unclaimed share still goes out through the normal path.
    let PremiumDistribution::Distributed { records, .. } =
        pool.distribute_premium(policy, dec(120), "STX").unwrap()
    else {
        panic!("expected the remaining share");
    };
    assert_eq!(records.len(), 1);

    let earned = |provider: &str| {
        pool.provider_balance(&ProviderId::new(provider), "STX")
            .unwrap()
            .earned_premiums
    };
    assert_eq!(earned("SP2ALICE"), dec(84));
    assert_eq!(earned("SP2BOB"), dec(36));
    assert_eq!(store.distributions(policy).unwrap().len(), 2);
    assert!(pool.reconcile().unwrap().premiums_repaired.is_empty());
    assert_flaky_conserved(&store);
}

#[test]
fn deposit_applied_before_failed_mark_is_not_credited_twice() {
    let (store, pool) = flaky_pool();
    let alice = ProviderId::new("SP2ALICE");
    let tx = pool.request_deposit(&alice, "STX", dec(500)).unwrap();

    // The balance absorbs the deposit; PROCESSED is never written.
    store.refuse_processed.store(true, Ordering::SeqCst);
    assert!(confirm(&pool, &tx).is_err());
    store.refuse_processed.store(false, Ordering::SeqCst);
    assert_eq!(
        pool.transaction(tx.id).unwrap().status,
        TransactionStatus::Finalizing
    );
    assert_eq!(pool.provider_balance(&alice, "STX").unwrap().total_deposited, dec(500));
    assert_flaky_conserved(&store);

    let report = pool.reconcile().unwrap();
    assert_eq!(report.transactions_finalized, vec![tx.id]);
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(
        pool.transaction(tx.id).unwrap().status,
        TransactionStatus::Processed
    );
    let balance = pool.provider_balance(&alice, "STX").unwrap();
    assert_eq!(balance.total_deposited, dec(500));
    assert_eq!(balance.available_balance, dec(500));
    assert_flaky_conserved(&store);
}

#[test]
fn withdrawal_at_token_ceiling_round_trips() {
    let h = PoolHarness::new();
    let max = h.pool.config().token("STX").unwrap().max_amount;
    let alice = ProviderId::new("SP2ALICE");
    let tx = h.pool.request_deposit(&alice, "STX", max).unwrap();
    h.settle_tx(&tx, OutcomeStatus::Confirmed);

    let policy = PolicyId::new();
    h.pool.allocate_capital(policy, "STX", max, max).unwrap();
    h.pool.distribute_premium(policy, max, "STX").unwrap();
    assert_eq!(h.balance("SP2ALICE").earned_premiums, max);
    h.pool
        .release_collateral(policy, ReleaseReason::Expired)
        .unwrap();

    let withdrawal = h.pool.request_withdrawal(&alice, "STX", max).unwrap();
    h.settle_tx(&withdrawal, OutcomeStatus::Confirmed);
    assert_eq!(h.balance("SP2ALICE").total_deposited, Decimal::ZERO);
    h.assert_conserved();
}
