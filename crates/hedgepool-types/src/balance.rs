//! Provider balance records.
//!
//! Every provider has one [`ProviderBalance`] per token. Capital is either
//! `available` (free to back new policies or be withdrawn) or `locked`
//! (collateral for active allocations). Premium income is tracked separately
//! as `earned`, of which some is `withdrawn` and some `pending` (reserved by
//! an in-flight premium withdrawal).
//!
//! The mutation methods here are pure: each returns an updated copy after
//! checking the record's invariants, or an error leaving `self` untouched.
//! The ledger applies them inside a single atomic store step.
//!
//! Effects that complete a multi-record orchestration (a transfer's
//! finalization, a premium credit) are keyed: the record remembers the
//! transaction or allocation it absorbed in the same write as the effect,
//! so re-applying after an interruption is a no-op.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AllocationId, BalanceField, PendingTransactionId, PoolError, ProviderId, Result, Token,
    TransactionKind,
};

/// Balance of one provider in one token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderBalance {
    pub provider: ProviderId,
    pub token: Token,
    /// Confirmed deposits minus confirmed withdrawals and consumed collateral.
    pub total_deposited: Decimal,
    /// Free capital.
    pub available_balance: Decimal,
    /// Capital locked as collateral.
    pub locked_balance: Decimal,
    pub earned_premiums: Decimal,
    pub withdrawn_premiums: Decimal,
    /// Earned premiums reserved by in-flight premium withdrawals.
    pub pending_premiums: Decimal,
    /// Transfers whose finalization this record has absorbed.
    #[serde(default)]
    pub finalized_transfers: BTreeSet<PendingTransactionId>,
    /// Allocations whose premium share this record has absorbed.
    #[serde(default)]
    pub credited_premiums: BTreeSet<AllocationId>,
    pub last_updated: DateTime<Utc>,
}

impl ProviderBalance {
    /// Create a zero balance.
    #[must_use]
    pub fn new(provider: ProviderId, token: impl Into<Token>) -> Self {
        Self {
            provider,
            token: token.into(),
            total_deposited: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            locked_balance: Decimal::ZERO,
            earned_premiums: Decimal::ZERO,
            withdrawn_premiums: Decimal::ZERO,
            pending_premiums: Decimal::ZERO,
            finalized_transfers: BTreeSet::new(),
            credited_premiums: BTreeSet::new(),
            last_updated: Utc::now(),
        }
    }

    /// Available + locked capital.
    #[must_use]
    pub fn total_liquidity(&self) -> Decimal {
        self.available_balance + self.locked_balance
    }

    /// Earned premiums that are neither withdrawn nor reserved.
    #[must_use]
    pub fn withdrawable_premiums(&self) -> Decimal {
        self.earned_premiums - self.withdrawn_premiums - self.pending_premiums
    }

    /// Check the record's invariants.
    ///
    /// # Errors
    /// Returns `BalanceInvariant` naming the first violated invariant.
    pub fn check_invariants(&self) -> Result<()> {
        let fields = [
            ("total_deposited", self.total_deposited),
            ("available_balance", self.available_balance),
            ("locked_balance", self.locked_balance),
            ("earned_premiums", self.earned_premiums),
            ("withdrawn_premiums", self.withdrawn_premiums),
            ("pending_premiums", self.pending_premiums),
        ];
        for (name, value) in fields {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(self.invariant(format!("{name} is negative ({value})")));
            }
        }
        if self.earned_premiums < self.withdrawn_premiums + self.pending_premiums {
            return Err(self.invariant(format!(
                "earned {} < withdrawn {} + pending {}",
                self.earned_premiums, self.withdrawn_premiums, self.pending_premiums
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Capital
    // -----------------------------------------------------------------

    /// Confirmed deposit: total_deposited and available grow.
    pub fn credit_deposit(&self, amount: Decimal) -> Result<Self> {
        let mut next = self.clone();
        next.total_deposited = grow(self.total_deposited, amount)?;
        next.available_balance = grow(self.available_balance, amount)?;
        next.finish()
    }

    /// Optimistic withdrawal reservation: available shrinks.
    pub fn reserve_withdrawal(&self, amount: Decimal) -> Result<Self> {
        self.require(BalanceField::Available, self.available_balance, amount)?;
        let mut next = self.clone();
        next.available_balance -= amount;
        next.finish()
    }

    /// Compensation for a failed withdrawal: the reservation returns.
    pub fn release_withdrawal(&self, amount: Decimal) -> Result<Self> {
        self.require(
            BalanceField::Deposited,
            self.total_deposited - self.total_liquidity(),
            amount,
        )?;
        let mut next = self.clone();
        next.available_balance += amount;
        next.finish()
    }

    /// Confirmed withdrawal: the reserved amount leaves total_deposited.
    pub fn finalize_withdrawal(&self, amount: Decimal) -> Result<Self> {
        self.reduce_deposited(amount)
    }

    /// Collateral lock: available → locked.
    pub fn lock(&self, amount: Decimal) -> Result<Self> {
        self.require(BalanceField::Available, self.available_balance, amount)?;
        let mut next = self.clone();
        next.available_balance -= amount;
        next.locked_balance += amount;
        next.finish()
    }

    /// Collateral unlock: locked → available.
    pub fn unlock(&self, amount: Decimal) -> Result<Self> {
        self.require(BalanceField::Locked, self.locked_balance, amount)?;
        let mut next = self.clone();
        next.locked_balance -= amount;
        next.available_balance += amount;
        next.finish()
    }

    /// Locked collateral leaves the pool entirely.
    pub fn consume_locked(&self, amount: Decimal) -> Result<Self> {
        self.require(BalanceField::Locked, self.locked_balance, amount)?;
        let mut next = self.clone();
        next.locked_balance -= amount;
        next.finish()
    }

    /// Exercised allocation with a known consumption: the whole allocation
    /// leaves `locked`, the unconsumed part returns to `available`.
    pub fn settle_locked(&self, allocated: Decimal, consumed: Decimal) -> Result<Self> {
        if consumed > allocated {
            return Err(PoolError::InvalidAmount {
                amount: consumed,
                reason: format!("consumed exceeds allocated {allocated}"),
            });
        }
        self.require(BalanceField::Locked, self.locked_balance, allocated)?;
        let mut next = self.clone();
        next.locked_balance -= allocated;
        next.available_balance += allocated - consumed;
        next.finish()
    }

    /// Settlement payout reduces the provider's deposited capital.
    pub fn reduce_deposited(&self, amount: Decimal) -> Result<Self> {
        self.require(BalanceField::Deposited, self.total_deposited, amount)?;
        let mut next = self.clone();
        next.total_deposited -= amount;
        next.finish()
    }

    // -----------------------------------------------------------------
    // Premiums
    // -----------------------------------------------------------------

    pub fn credit_earned(&self, amount: Decimal) -> Result<Self> {
        let mut next = self.clone();
        next.earned_premiums = grow(self.earned_premiums, amount)?;
        next.finish()
    }

    /// Reserve earned premiums for an in-flight premium withdrawal.
    pub fn reserve_pending_premium(&self, amount: Decimal) -> Result<Self> {
        self.require(
            BalanceField::WithdrawablePremiums,
            self.withdrawable_premiums(),
            amount,
        )?;
        let mut next = self.clone();
        next.pending_premiums += amount;
        next.finish()
    }

    pub fn release_pending_premium(&self, amount: Decimal) -> Result<Self> {
        self.require(BalanceField::PendingPremiums, self.pending_premiums, amount)?;
        let mut next = self.clone();
        next.pending_premiums -= amount;
        next.finish()
    }

    /// Confirmed premium withdrawal: pending → withdrawn.
    pub fn move_earned_to_withdrawn(&self, amount: Decimal) -> Result<Self> {
        self.require(BalanceField::PendingPremiums, self.pending_premiums, amount)?;
        let mut next = self.clone();
        next.pending_premiums -= amount;
        next.withdrawn_premiums += amount;
        next.finish()
    }

    // -----------------------------------------------------------------
    // Keyed effects
    // -----------------------------------------------------------------

    /// Apply a confirmed transfer's ledger effect, once per transaction.
    /// Returns an unchanged copy if `tx` was already absorbed.
    pub fn finalize_transfer(
        &self,
        tx: PendingTransactionId,
        kind: TransactionKind,
        amount: Decimal,
    ) -> Result<Self> {
        if self.finalized_transfers.contains(&tx) {
            return Ok(self.clone());
        }
        let mut next = match kind {
            TransactionKind::Deposit => self.credit_deposit(amount)?,
            TransactionKind::Withdrawal => self.finalize_withdrawal(amount)?,
            TransactionKind::PremiumWithdrawal => self.move_earned_to_withdrawn(amount)?,
        };
        next.finalized_transfers.insert(tx);
        Ok(next)
    }

    /// Credit an allocation's premium share, once per allocation.
    /// Returns an unchanged copy if `allocation` was already credited.
    pub fn credit_premium(&self, allocation: AllocationId, amount: Decimal) -> Result<Self> {
        if self.credited_premiums.contains(&allocation) {
            return Ok(self.clone());
        }
        let mut next = self.credit_earned(amount)?;
        next.credited_premiums.insert(allocation);
        Ok(next)
    }

    /// Drop markers whose orchestrations are complete and past replay.
    #[must_use]
    pub fn forget_markers(
        &self,
        transfers: &[PendingTransactionId],
        premiums: &[AllocationId],
    ) -> Self {
        let mut next = self.clone();
        for tx in transfers {
            next.finalized_transfers.remove(tx);
        }
        for allocation in premiums {
            next.credited_premiums.remove(allocation);
        }
        next.last_updated = Utc::now();
        next
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn require(&self, field: BalanceField, have: Decimal, needed: Decimal) -> Result<()> {
        if have < needed {
            return Err(PoolError::InsufficientBalance {
                provider: self.provider.clone(),
                token: self.token.clone(),
                field,
                needed,
                available: have,
            });
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Self> {
        self.check_invariants()?;
        self.last_updated = Utc::now();
        Ok(self)
    }

    fn invariant(&self, reason: String) -> PoolError {
        PoolError::BalanceInvariant {
            provider: self.provider.clone(),
            token: self.token.clone(),
            reason,
        }
    }
}

/// Credits are the only unbounded additions; everything else moves value
/// between fields of the same record.
fn grow(field: Decimal, amount: Decimal) -> Result<Decimal> {
    field
        .checked_add(amount)
        .ok_or_else(|| PoolError::InvalidAmount {
            amount,
            reason: format!("credit overflows balance {field}"),
        })
}
