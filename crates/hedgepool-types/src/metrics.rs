//! Pool-wide metrics snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Token;

/// Point-in-time aggregate of one token's pool. Snapshots are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetricsSnapshot {
    pub token: Token,
    pub timestamp: DateTime<Utc>,
    pub total_liquidity: Decimal,
    pub available_liquidity: Decimal,
    pub locked_liquidity: Decimal,
    pub provider_count: usize,
    pub active_policy_count: usize,
    /// locked / total, as a fraction in `[0, 1]`.
    pub utilization: Decimal,
    /// Annualized premium yield, as a fraction.
    pub annualized_yield: Decimal,
}

impl PoolMetricsSnapshot {
    /// Utilization expressed in percent.
    #[must_use]
    pub fn utilization_percent(&self) -> Decimal {
        self.utilization * Decimal::ONE_HUNDRED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_percent() {
        let snap = PoolMetricsSnapshot {
            token: "STX".into(),
            timestamp: Utc::now(),
            total_liquidity: Decimal::new(800, 0),
            available_liquidity: Decimal::new(100, 0),
            locked_liquidity: Decimal::new(700, 0),
            provider_count: 2,
            active_policy_count: 1,
            utilization: Decimal::new(875, 3),
            annualized_yield: Decimal::ZERO,
        };
        assert_eq!(snap.utilization_percent(), Decimal::new(875, 1));
    }
}
