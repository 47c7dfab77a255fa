//! Pool metrics aggregation.
//!
//! ```text
//! total        = Σ (available + locked)
//! utilization  = locked / total
//! yield        = (Σ earned / total) × (365 / avg allocation days)
//! ```
//!
//! Ratios are rounded to 6 dp and are zero whenever a denominator is.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hedgepool_ledger::PoolStore;
use hedgepool_types::{PoolMetricsSnapshot, Result, constants};
use rust_decimal::Decimal;

const SECONDS_PER_DAY: i64 = 86_400;

pub struct MetricsAggregator<S: PoolStore> {
    store: Arc<S>,
}

impl<S: PoolStore> Clone for MetricsAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: PoolStore> MetricsAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Aggregate the current state of one token's pool. Writes nothing.
    pub fn compute(&self, token: &str, now: DateTime<Utc>) -> Result<PoolMetricsSnapshot> {
        let balances = self.store.balances(token)?;
        let allocations = self.store.allocations_by_token(token)?;

        let available: Decimal = balances.iter().map(|b| b.available_balance).sum();
        let locked: Decimal = balances.iter().map(|b| b.locked_balance).sum();
        let total = available + locked;
        let earned: Decimal = balances.iter().map(|b| b.earned_premiums).sum();

        let provider_count = balances
            .iter()
            .filter(|b| b.total_deposited > Decimal::ZERO)
            .count();
        let active_policy_count = allocations
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.policy_id)
            .collect::<BTreeSet<_>>()
            .len();

        let utilization = ratio(locked, total);

        let average_days = if allocations.is_empty() {
            Decimal::ZERO
        } else {
            let seconds: i64 = allocations
                .iter()
                .map(|a| a.duration(now).num_seconds().max(0))
                .sum();
            Decimal::from(seconds)
                / Decimal::from(allocations.len())
                / Decimal::from(SECONDS_PER_DAY)
        };
        let annualized_yield = if total.is_zero() || average_days.is_zero() {
            Decimal::ZERO
        } else {
            (earned / total * (Decimal::from(constants::DAYS_PER_YEAR) / average_days))
                .round_dp(constants::RATIO_PRECISION)
        };

        Ok(PoolMetricsSnapshot {
            token: token.to_string(),
            timestamp: now,
            total_liquidity: total,
            available_liquidity: available,
            locked_liquidity: locked,
            provider_count,
            active_policy_count,
            utilization,
            annualized_yield,
        })
    }

    /// Compute and append a snapshot.
    pub fn record(&self, token: &str) -> Result<PoolMetricsSnapshot> {
        let snapshot = self.compute(token, Utc::now())?;
        self.store.append_snapshot(snapshot.clone())?;
        tracing::debug!(
            token,
            total = %snapshot.total_liquidity,
            locked = %snapshot.locked_liquidity,
            utilization = %snapshot.utilization,
            providers = snapshot.provider_count,
            policies = snapshot.active_policy_count,
            "Metrics snapshot recorded"
        );
        Ok(snapshot)
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        return Decimal::ZERO;
    }
    (numerator / denominator).round_dp(constants::RATIO_PRECISION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hedgepool_ledger::{BalanceLedger, InMemoryStore};
    use hedgepool_types::{PolicyAllocation, PolicyId, ProviderId};

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[test]
    fn empty_pool_is_all_zero() {
        let metrics = MetricsAggregator::new(Arc::new(InMemoryStore::new()));
        let snap = metrics.compute("STX", Utc::now()).unwrap();
        assert_eq!(snap.total_liquidity, Decimal::ZERO);
        assert_eq!(snap.utilization, Decimal::ZERO);
        assert_eq!(snap.annualized_yield, Decimal::ZERO);
        assert_eq!(snap.provider_count, 0);
    }

    #[test]
    fn utilization_and_yield() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = BalanceLedger::new(Arc::clone(&store));
        let alice = ProviderId::new("SP2ALICE");
        let bob = ProviderId::new("SP2BOB");
        ledger.credit_deposit(&alice, "STX", dec(750)).unwrap();
        ledger.credit_deposit(&bob, "STX", dec(50)).unwrap();
        ledger.lock(&alice, "STX", dec(600)).unwrap();
        ledger.credit_earned(&alice, "STX", dec(8)).unwrap();

        let now = Utc::now();
        let policy = PolicyId::new();
        let mut allocation = PolicyAllocation::dummy(policy, "SP2ALICE", dec(600));
        allocation.created_at = now - Duration::days(73);
        store.insert_allocations(policy, vec![allocation]).unwrap();

        let snap = MetricsAggregator::new(Arc::clone(&store))
            .compute("STX", now)
            .unwrap();
        assert_eq!(snap.total_liquidity, dec(800));
        assert_eq!(snap.locked_liquidity, dec(600));
        assert_eq!(snap.utilization, Decimal::new(75, 2));
        assert_eq!(snap.provider_count, 2);
        assert_eq!(snap.active_policy_count, 1);
        // 8 / 800 × 365 / 73 = 0.05
        assert_eq!(snap.annualized_yield, Decimal::new(5, 2));
    }

    #[test]
    fn record_appends_and_compute_does_not() {
        let store = Arc::new(InMemoryStore::new());
        let metrics = MetricsAggregator::new(Arc::clone(&store));
        metrics.compute("STX", Utc::now()).unwrap();
        assert!(store.snapshots("STX").unwrap().is_empty());
        metrics.record("STX").unwrap();
        metrics.record("STX").unwrap();
        assert_eq!(store.snapshots("STX").unwrap().len(), 2);
    }

    #[test]
    fn withdrawn_provider_not_counted() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = BalanceLedger::new(Arc::clone(&store));
        let alice = ProviderId::new("SP2ALICE");
        ledger.credit_deposit(&alice, "STX", dec(100)).unwrap();
        ledger.reserve_withdrawal(&alice, "STX", dec(100)).unwrap();
        ledger.finalize_withdrawal(&alice, "STX", dec(100)).unwrap();
        let snap = MetricsAggregator::new(store).compute("STX", Utc::now()).unwrap();
        assert_eq!(snap.provider_count, 0);
    }
}
