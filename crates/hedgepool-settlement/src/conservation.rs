//! Capital conservation checker.
//!
//! Per provider and token:
//! ```text
//! total_deposited == available + locked + Σ reserved by in-flight withdrawals
//! locked          == Σ allocated (ACTIVE) + Σ allocated (terminal, balance step pending)
//! pending_premium == Σ reserved by in-flight premium withdrawals
//! earned_premium  == Σ shares recorded or credited for claimed allocations
//! ```
//!
//! A withdrawal holds its reservation from request until the balance
//! absorbs its finalization or it is compensated (FAILED). A claimed
//! premium with neither a record nor a credit is an interrupted
//! distribution the sweep completes, not a violation. Violations are
//! reported, never patched: a broken equation means a step was lost and
//! needs an operator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use hedgepool_ledger::PoolStore;
use hedgepool_types::{
    AllocationId, PendingTransaction, ProviderBalance, ProviderId, Result, TransactionKind,
    TransactionStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which equation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    Deposited,
    Locked,
    PendingPremiums,
    EarnedPremiums,
    /// A stored balance breaks a field invariant on its own.
    BalanceInvariant,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposited => write!(f, "deposited"),
            Self::Locked => write!(f, "locked"),
            Self::PendingPremiums => write!(f, "pending premiums"),
            Self::EarnedPremiums => write!(f, "earned premiums"),
            Self::BalanceInvariant => write!(f, "balance invariant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConservationViolation {
    pub provider: ProviderId,
    pub token: String,
    pub kind: ViolationKind,
    /// Value implied by the allocation and transaction records.
    pub expected: Decimal,
    /// Value held by the balance record.
    pub actual: Decimal,
}

impl fmt::Display for ConservationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {}: expected {}, balance holds {}",
            self.provider, self.token, self.kind, self.expected, self.actual
        )
    }
}

/// Expected sums collected from allocation and transaction records.
#[derive(Default)]
struct Expected {
    locked: Decimal,
    withdrawal_reserved: Decimal,
    premium_reserved: Decimal,
    earned: Decimal,
}

pub struct ConservationChecker<S: PoolStore> {
    store: Arc<S>,
}

impl<S: PoolStore> ConservationChecker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Check every provider holding a balance, an allocation, or an
    /// in-flight transaction in `token`.
    pub fn check(&self, token: &str) -> Result<Vec<ConservationViolation>> {
        let balances: BTreeMap<ProviderId, _> = self
            .store
            .balances(token)?
            .into_iter()
            .map(|b| (b.provider.clone(), b))
            .collect();

        let recorded: BTreeSet<AllocationId> = self
            .store
            .distributions_by_token(token)?
            .into_iter()
            .map(|record| record.allocation_id)
            .collect();

        let mut expected: BTreeMap<ProviderId, Expected> = BTreeMap::new();
        for allocation in self.store.allocations_by_token(token)? {
            let credited = allocation.premium_distributed
                && (recorded.contains(&allocation.id)
                    || balances
                        .get(&allocation.provider)
                        .is_some_and(|b| b.credited_premiums.contains(&allocation.id)));
            let entry = expected.entry(allocation.provider.clone()).or_default();
            if allocation.is_active() || !allocation.balance_applied {
                entry.locked += allocation.allocated_amount;
            }
            if credited {
                entry.earned += allocation.premium_share;
            }
        }
        for tx in self.store.transactions()? {
            if tx.token != token || !holds_reservation(&tx, balances.get(&tx.provider)) {
                continue;
            }
            let entry = expected.entry(tx.provider.clone()).or_default();
            match tx.kind() {
                TransactionKind::Withdrawal => entry.withdrawal_reserved += tx.amount,
                TransactionKind::PremiumWithdrawal => entry.premium_reserved += tx.amount,
                TransactionKind::Deposit => {}
            }
        }

        let providers: BTreeSet<&ProviderId> = balances.keys().chain(expected.keys()).collect();
        let empty = Expected::default();
        let mut violations = Vec::new();

        for provider in providers {
            let sums = expected.get(provider).unwrap_or(&empty);
            let mut report = |kind, expected: Decimal, actual: Decimal| {
                if expected != actual {
                    violations.push(ConservationViolation {
                        provider: provider.clone(),
                        token: token.to_string(),
                        kind,
                        expected,
                        actual,
                    });
                }
            };

            let Some(balance) = balances.get(provider) else {
                report(ViolationKind::Locked, sums.locked, Decimal::ZERO);
                report(ViolationKind::Deposited, sums.withdrawal_reserved, Decimal::ZERO);
                report(ViolationKind::PendingPremiums, sums.premium_reserved, Decimal::ZERO);
                report(ViolationKind::EarnedPremiums, sums.earned, Decimal::ZERO);
                continue;
            };

            if balance.check_invariants().is_err() {
                report(ViolationKind::BalanceInvariant, Decimal::ZERO, Decimal::ONE);
            }
            report(
                ViolationKind::Deposited,
                balance.available_balance + balance.locked_balance + sums.withdrawal_reserved,
                balance.total_deposited,
            );
            report(ViolationKind::Locked, sums.locked, balance.locked_balance);
            report(
                ViolationKind::PendingPremiums,
                sums.premium_reserved,
                balance.pending_premiums,
            );
            report(ViolationKind::EarnedPremiums, sums.earned, balance.earned_premiums);
        }

        for violation in &violations {
            tracing::error!(
                provider = %violation.provider,
                token,
                kind = %violation.kind,
                expected = %violation.expected,
                actual = %violation.actual,
                "Conservation violated"
            );
        }
        Ok(violations)
    }
}

/// Reservations are taken at request and retry, and given back on FAILED
/// or consumed when the balance absorbs the finalization.
fn holds_reservation(tx: &PendingTransaction, balance: Option<&ProviderBalance>) -> bool {
    let in_flight = matches!(
        tx.status,
        TransactionStatus::Pending
            | TransactionStatus::Submitted
            | TransactionStatus::Confirmed
            | TransactionStatus::Finalizing
    );
    in_flight && !balance.is_some_and(|b| b.finalized_transfers.contains(&tx.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hedgepool_ledger::{BalanceLedger, InMemoryStore};
    use hedgepool_types::{PolicyAllocation, PolicyId};

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn setup() -> (Arc<InMemoryStore>, BalanceLedger<InMemoryStore>, ProviderId) {
        let store = Arc::new(InMemoryStore::new());
        let ledger = BalanceLedger::new(Arc::clone(&store));
        let alice = ProviderId::new("SP2ALICE");
        ledger.credit_deposit(&alice, "STX", dec(1000)).unwrap();
        (store, ledger, alice)
    }

    #[test]
    fn consistent_pool_passes() {
        let (store, ledger, alice) = setup();
        ledger.lock(&alice, "STX", dec(300)).unwrap();
        let policy = PolicyId::new();
        store
            .insert_allocations(policy, vec![PolicyAllocation::dummy(policy, "SP2ALICE", dec(300))])
            .unwrap();

        ledger.reserve_withdrawal(&alice, "STX", dec(200)).unwrap();
        let mut tx = PendingTransaction::dummy(TransactionKind::Withdrawal, "SP2ALICE", dec(200));
        tx.status = TransactionStatus::Submitted;
        store.insert_transaction(tx).unwrap();

        let violations = ConservationChecker::new(store).check("STX").unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn lost_lock_reported() {
        let (store, ledger, alice) = setup();
        // Lock applied but the allocation record never written.
        ledger.lock(&alice, "STX", dec(300)).unwrap();
        let violations = ConservationChecker::new(store).check("STX").unwrap();
        assert_eq!(
            violations,
            vec![ConservationViolation {
                provider: alice,
                token: "STX".into(),
                kind: ViolationKind::Locked,
                expected: Decimal::ZERO,
                actual: dec(300),
            }]
        );
    }

    #[test]
    fn lost_compensation_reported() {
        let (store, ledger, alice) = setup();
        // Reserved, then marked FAILED, but the release never ran.
        ledger.reserve_withdrawal(&alice, "STX", dec(50)).unwrap();
        let mut tx = PendingTransaction::dummy(TransactionKind::Withdrawal, "SP2ALICE", dec(50));
        tx.status = TransactionStatus::Failed;
        store.insert_transaction(tx).unwrap();

        let violations = ConservationChecker::new(store).check("STX").unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::Deposited);
        assert_eq!(violations[0].expected, dec(950));
        assert_eq!(violations[0].actual, dec(1000));
    }

    #[test]
    fn absorbed_finalization_releases_reservation() {
        let (store, ledger, alice) = setup();
        ledger.reserve_withdrawal(&alice, "STX", dec(200)).unwrap();
        let mut tx = PendingTransaction::dummy(TransactionKind::Withdrawal, "SP2ALICE", dec(200));
        tx.status = TransactionStatus::Finalizing;
        store.insert_transaction(tx.clone()).unwrap();
        let checker = ConservationChecker::new(Arc::clone(&store));
        assert!(checker.check("STX").unwrap().is_empty());

        // The balance step landed; PROCESSED did not.
        ledger.finalize_transfer(&tx).unwrap();
        assert!(checker.check("STX").unwrap().is_empty());
    }

    #[test]
    fn uncredited_earnings_reported() {
        let (store, ledger, alice) = setup();
        // Earnings with no distribution behind them.
        ledger.credit_earned(&alice, "STX", dec(12)).unwrap();
        let violations = ConservationChecker::new(store).check("STX").unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::EarnedPremiums);
        assert_eq!(violations[0].expected, Decimal::ZERO);
        assert_eq!(violations[0].actual, dec(12));
    }

    #[test]
    fn credited_premium_awaiting_record_is_consistent() {
        let (store, ledger, alice) = setup();
        ledger.lock(&alice, "STX", dec(300)).unwrap();
        let policy = PolicyId::new();
        let mut allocation = PolicyAllocation::dummy(policy, "SP2ALICE", dec(300));
        allocation.premium_share = dec(30);
        let allocation = allocation.claim_premium(chrono::Utc::now()).unwrap();
        store.insert_allocations(policy, vec![allocation.clone()]).unwrap();
        let checker = ConservationChecker::new(Arc::clone(&store));
        // Claimed only: nothing credited yet, nothing expected.
        assert!(checker.check("STX").unwrap().is_empty());

        ledger
            .credit_premium(&alice, "STX", allocation.id, dec(30))
            .unwrap();
        assert!(checker.check("STX").unwrap().is_empty());
    }

    #[test]
    fn unapplied_terminal_allocation_still_counts_as_locked() {
        let (store, ledger, alice) = setup();
        ledger.lock(&alice, "STX", dec(300)).unwrap();
        let policy = PolicyId::new();
        let allocation = PolicyAllocation::dummy(policy, "SP2ALICE", dec(300))
            .terminate(hedgepool_types::AllocationStatus::Expired, chrono::Utc::now())
            .unwrap();
        store.insert_allocations(policy, vec![allocation]).unwrap();
        assert!(ConservationChecker::new(store).check("STX").unwrap().is_empty());
    }
}
