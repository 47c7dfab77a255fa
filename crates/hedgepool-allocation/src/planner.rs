//! Deterministic collateral split.
//!
//! Given the same balances and inputs, every node computes the same plan.
//!
//! ## Algorithm
//!
//! ```text
//! 1. eligible = providers with available > min_provider_balance
//! 2. sort by available DESC, provider ASC
//! 3. share_i = trunc(required × available_i / Σ available) capped at available_i
//! 4. shortfall = required − Σ share → sweep sorted list, topping up to capacity
//! 5. drop zero shares; derive percentage and premium share per allocation
//! ```
//!
//! Truncation makes the proportional pass never over-allocate; the sweep
//! then absorbs the dust, so Σ share == required exactly whenever
//! Σ available ≥ required.

use hedgepool_types::{
    PolicyId, PoolError, ProviderBalance, ProviderId, Result, TokenConfig, constants,
};
use rust_decimal::{Decimal, RoundingStrategy};

/// One provider's planned contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedShare {
    pub provider: ProviderId,
    pub amount: Decimal,
    /// Percent of the policy's collateral, 4 dp.
    pub percentage: Decimal,
    pub premium_share: Decimal,
}

/// The full funding plan of one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub policy_id: PolicyId,
    pub token: String,
    pub required: Decimal,
    pub premium: Decimal,
    /// Ordered by available balance descending, provider ascending.
    pub shares: Vec<PlannedShare>,
}

impl AllocationPlan {
    #[must_use]
    pub fn total_allocated(&self) -> Decimal {
        self.shares.iter().map(|s| s.amount).sum()
    }

    #[must_use]
    pub fn total_premium(&self) -> Decimal {
        self.shares.iter().map(|s| s.premium_share).sum()
    }
}

/// Split `required` collateral across eligible providers.
///
/// # Errors
/// - `InvalidAmount` if `required` is not positive or not representable at
///   the token's decimals, or `premium` is negative or not representable
/// - `InsufficientPoolLiquidity` if eligible capital is below `required`
pub fn plan_allocation(
    policy_id: PolicyId,
    token: &TokenConfig,
    required: Decimal,
    premium: Decimal,
    balances: &[ProviderBalance],
) -> Result<AllocationPlan> {
    token.check_amount(required)?;
    if !premium.is_zero() {
        token.check_amount(premium)?;
    }

    let mut eligible: Vec<(&ProviderId, Decimal)> = balances
        .iter()
        .filter(|b| b.token == token.symbol && b.available_balance > token.min_provider_balance)
        .map(|b| (&b.provider, b.available_balance))
        .collect();
    eligible.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let pool: Decimal = eligible.iter().map(|(_, available)| *available).sum();
    if pool < required {
        return Err(PoolError::InsufficientPoolLiquidity {
            token: token.symbol.clone(),
            needed: required,
            available: pool,
        });
    }

    // Proportional pass
    let mut amounts: Vec<Decimal> = eligible
        .iter()
        .map(|(_, available)| {
            truncate(pro_rata(required, *available, pool), token.decimals).min(*available)
        })
        .collect();

    // Shortfall sweep
    let mut shortfall = required - amounts.iter().copied().sum::<Decimal>();
    for (amount, (_, available)) in amounts.iter_mut().zip(&eligible) {
        if shortfall <= Decimal::ZERO {
            break;
        }
        let top_up = shortfall.min(*available - *amount);
        *amount += top_up;
        shortfall -= top_up;
    }
    if shortfall > Decimal::ZERO {
        return Err(PoolError::InsufficientPoolLiquidity {
            token: token.symbol.clone(),
            needed: required,
            available: required - shortfall,
        });
    }

    let mut shares: Vec<PlannedShare> = eligible
        .iter()
        .zip(amounts)
        .filter(|(_, amount)| *amount > Decimal::ZERO)
        .map(|((provider, _), amount)| PlannedShare {
            provider: (*provider).clone(),
            amount,
            percentage: (amount / required * Decimal::ONE_HUNDRED)
                .round_dp(constants::PERCENTAGE_PRECISION),
            premium_share: truncate(pro_rata(premium, amount, required), token.decimals),
        })
        .collect();

    let dust = premium - shares.iter().map(|s| s.premium_share).sum::<Decimal>();
    if !dust.is_zero() {
        if let Some(largest) = largest_share(&mut shares) {
            largest.premium_share += dust;
        }
    }

    Ok(AllocationPlan {
        policy_id,
        token: token.symbol.clone(),
        required,
        premium,
        shares,
    })
}

/// `amount × part / whole` for `part ≤ whole`.
///
/// Exact while the product fits in a `Decimal`; past that the ratio is taken
/// first, which cannot overflow and loses only digits far below any token's
/// precision.
fn pro_rata(amount: Decimal, part: Decimal, whole: Decimal) -> Decimal {
    amount
        .checked_mul(part)
        .and_then(|product| product.checked_div(whole))
        .unwrap_or_else(|| amount * (part / whole))
}

fn truncate(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// First share with the maximum amount (shares are already in sort order).
fn largest_share(shares: &mut [PlannedShare]) -> Option<&mut PlannedShare> {
    let max = shares.iter().map(|s| s.amount).max()?;
    shares.iter_mut().find(|s| s.amount == max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn funded(provider: &str, token: &str, available: Decimal) -> ProviderBalance {
        ProviderBalance::new(ProviderId::new(provider), token)
            .credit_deposit(available)
            .unwrap()
    }

    fn amounts(plan: &AllocationPlan) -> Vec<(String, Decimal)> {
        plan.shares
            .iter()
            .map(|s| (s.provider.to_string(), s.amount))
            .collect()
    }

    #[test]
    fn proportional_split_750_50() {
        let balances = [
            funded("SP2BOB", "STX", dec(50)),
            funded("SP2ALICE", "STX", dec(750)),
        ];
        let plan = plan_allocation(
            PolicyId::new(),
            &TokenConfig::stx(),
            dec(700),
            Decimal::ZERO,
            &balances,
        )
        .unwrap();
        assert_eq!(
            amounts(&plan),
            vec![
                ("SP2ALICE".to_string(), Decimal::new(65625, 2)),
                ("SP2BOB".to_string(), Decimal::new(4375, 2)),
            ]
        );
        assert_eq!(plan.total_allocated(), dec(700));
        assert_eq!(plan.shares[0].percentage, Decimal::new(9375, 2));
        assert_eq!(plan.shares[1].percentage, Decimal::new(625, 2));
    }

    #[test]
    fn premium_follows_allocation() {
        let balances = [
            funded("SP2ALICE", "STX", dec(700)),
            funded("SP2BOB", "STX", dec(300)),
        ];
        let plan = plan_allocation(
            PolicyId::new(),
            &TokenConfig::stx(),
            dec(1000),
            dec(120),
            &balances,
        )
        .unwrap();
        assert_eq!(plan.shares[0].premium_share, dec(84));
        assert_eq!(plan.shares[1].premium_share, dec(36));
    }

    #[test]
    fn truncation_dust_swept_exactly() {
        let balances = [
            funded("SP2A", "STX", dec(1)),
            funded("SP2B", "STX", dec(1)),
            funded("SP2C", "STX", dec(1)),
        ];
        // 1 / 3 per provider truncates at 6 dp; the sweep tops up the first.
        let plan = plan_allocation(
            PolicyId::new(),
            &TokenConfig::stx(),
            dec(1),
            dec(1),
            &balances,
        )
        .unwrap();
        assert_eq!(plan.total_allocated(), dec(1));
        assert_eq!(plan.total_premium(), dec(1));
        assert_eq!(plan.shares[0].amount, Decimal::new(333_334, 6));
        assert_eq!(plan.shares[1].amount, Decimal::new(333_333, 6));
        assert_eq!(plan.shares[0].premium_share, Decimal::new(333_334, 6));
    }

    #[test]
    fn full_pool_uses_everything() {
        let balances = [
            funded("SP2ALICE", "STX", dec(600)),
            funded("SP2BOB", "STX", dec(400)),
        ];
        let plan = plan_allocation(
            PolicyId::new(),
            &TokenConfig::stx(),
            dec(1000),
            Decimal::ZERO,
            &balances,
        )
        .unwrap();
        assert_eq!(plan.shares[0].amount, dec(600));
        assert_eq!(plan.shares[1].amount, dec(400));
    }

    #[test]
    fn insufficient_pool_liquidity() {
        let balances = [funded("SP2ALICE", "STX", dec(100))];
        let err = plan_allocation(
            PolicyId::new(),
            &TokenConfig::stx(),
            dec(101),
            Decimal::ZERO,
            &balances,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PoolError::InsufficientPoolLiquidity { needed, available, .. }
                if needed == dec(101) && available == dec(100)
        ));
    }

    #[test]
    fn threshold_and_token_filter() {
        let mut token = TokenConfig::stx();
        token.min_provider_balance = dec(50);
        let balances = [
            funded("SP2ALICE", "STX", dec(500)),
            funded("SP2BOB", "STX", dec(50)),
            funded("SP2CAROL", "sBTC", dec(500)),
        ];
        let plan =
            plan_allocation(PolicyId::new(), &token, dec(100), Decimal::ZERO, &balances).unwrap();
        assert_eq!(amounts(&plan), vec![("SP2ALICE".to_string(), dec(100))]);
    }

    #[test]
    fn ties_broken_by_provider() {
        let balances = [
            funded("SP2ZED", "STX", dec(100)),
            funded("SP2AMY", "STX", dec(100)),
        ];
        let plan = plan_allocation(
            PolicyId::new(),
            &TokenConfig::stx(),
            Decimal::new(1, 6),
            Decimal::ZERO,
            &balances,
        )
        .unwrap();
        assert_eq!(amounts(&plan), vec![("SP2AMY".to_string(), Decimal::new(1, 6))]);
    }

    #[test]
    fn amounts_at_token_ceiling_do_not_overflow() {
        let token = TokenConfig::stx();
        let max = token.max_amount;
        let balances = [
            funded("SP2ALICE", "STX", max),
            funded("SP2BOB", "STX", max),
            funded("SP2CAROL", "STX", max),
        ];
        let plan = plan_allocation(PolicyId::new(), &token, max, max, &balances).unwrap();
        assert_eq!(plan.total_allocated(), max);
        assert_eq!(plan.total_premium(), max);
        assert_eq!(plan.shares.len(), 3);

        let single = [funded("SP2ALICE", "STX", max)];
        let plan = plan_allocation(PolicyId::new(), &token, max, Decimal::ZERO, &single).unwrap();
        assert_eq!(amounts(&plan), vec![("SP2ALICE".to_string(), max)]);

        assert!(matches!(
            plan_allocation(PolicyId::new(), &token, max + Decimal::ONE, Decimal::ZERO, &balances),
            Err(PoolError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn unrepresentable_amounts_rejected() {
        let balances = [funded("SP2ALICE", "STX", dec(500))];
        let token = TokenConfig::stx();
        assert!(matches!(
            plan_allocation(PolicyId::new(), &token, Decimal::new(1, 7), Decimal::ZERO, &balances),
            Err(PoolError::InvalidAmount { .. })
        ));
        assert!(matches!(
            plan_allocation(PolicyId::new(), &token, dec(10), dec(-1), &balances),
            Err(PoolError::InvalidAmount { .. })
        ));
        assert!(matches!(
            plan_allocation(PolicyId::new(), &token, Decimal::ZERO, Decimal::ZERO, &balances),
            Err(PoolError::InvalidAmount { .. })
        ));
    }
}
