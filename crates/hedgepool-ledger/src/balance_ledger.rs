//! Balance ledger for liquidity providers.
//!
//! Wraps the pure [`ProviderBalance`] mutations in single-record store
//! steps. Every primitive either applies fully or leaves the record as it
//! was; no primitive ever touches two records.

use std::sync::Arc;

use hedgepool_types::{
    AllocationId, BalanceField, PendingTransaction, PendingTransactionId, PoolError,
    ProviderBalance, ProviderId, Result, TransactionKind,
};
use rust_decimal::Decimal;

use crate::store::{MissingBalance, PoolStore};

/// Per-(provider, token) capital and premium accounting.
pub struct BalanceLedger<S: PoolStore> {
    store: Arc<S>,
}

impl<S: PoolStore> Clone for BalanceLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: PoolStore> BalanceLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Current balance, or a zero balance if the provider has none.
    pub fn balance(&self, provider: &ProviderId, token: &str) -> Result<ProviderBalance> {
        Ok(self
            .store
            .balance(provider, token)?
            .unwrap_or_else(|| ProviderBalance::new(provider.clone(), token)))
    }

    // -----------------------------------------------------------------
    // Capital
    // -----------------------------------------------------------------

    /// Confirmed deposit. Creates the balance record on first deposit.
    pub fn credit_deposit(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply("credit_deposit", provider, token, amount, Missing::Create, &|b| {
            b.credit_deposit(amount)
        })
    }

    /// Optimistic reservation of available capital for a withdrawal.
    ///
    /// # Errors
    /// `InsufficientBalance` if available < amount (also when no record exists).
    pub fn reserve_withdrawal(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply(
            "reserve_withdrawal",
            provider,
            token,
            amount,
            Missing::Insufficient(BalanceField::Available),
            &|b| b.reserve_withdrawal(amount),
        )
    }

    /// Compensation for a failed withdrawal.
    pub fn release_withdrawal(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply("release_withdrawal", provider, token, amount, Missing::NotFound, &|b| {
            b.release_withdrawal(amount)
        })
    }

    /// Confirmed withdrawal leaves the pool.
    pub fn finalize_withdrawal(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply("finalize_withdrawal", provider, token, amount, Missing::NotFound, &|b| {
            b.finalize_withdrawal(amount)
        })
    }

    /// available → locked.
    ///
    /// # Errors
    /// `InsufficientBalance` if available < amount (also when no record exists).
    pub fn lock(&self, provider: &ProviderId, token: &str, amount: Decimal) -> Result<ProviderBalance> {
        self.apply(
            "lock",
            provider,
            token,
            amount,
            Missing::Insufficient(BalanceField::Available),
            &|b| b.lock(amount),
        )
    }

    /// locked → available.
    pub fn unlock(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply("unlock", provider, token, amount, Missing::NotFound, &|b| b.unlock(amount))
    }

    /// locked → gone.
    pub fn consume_locked(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply("consume_locked", provider, token, amount, Missing::NotFound, &|b| {
            b.consume_locked(amount)
        })
    }

    /// Release an exercised allocation: `allocated` leaves locked and the
    /// part not `consumed` by the payout returns to available.
    pub fn settle_locked(
        &self,
        provider: &ProviderId,
        token: &str,
        allocated: Decimal,
        consumed: Decimal,
    ) -> Result<ProviderBalance> {
        check_non_negative(consumed)?;
        let balance = self.store.modify_balance(
            provider,
            token,
            MissingBalance::Reject,
            &|b| b.settle_locked(allocated, consumed),
        )?;
        tracing::debug!(
            provider = %provider,
            token,
            %allocated,
            %consumed,
            locked = %balance.locked_balance,
            "Locked collateral settled"
        );
        Ok(balance)
    }

    /// Settlement payout reduces deposited capital.
    pub fn reduce_deposited(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply("reduce_deposited", provider, token, amount, Missing::NotFound, &|b| {
            b.reduce_deposited(amount)
        })
    }

    // -----------------------------------------------------------------
    // Premiums
    // -----------------------------------------------------------------

    pub fn credit_earned(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply("credit_earned", provider, token, amount, Missing::Create, &|b| {
            b.credit_earned(amount)
        })
    }

    /// # Errors
    /// `InsufficientBalance` if withdrawable premiums < amount.
    pub fn reserve_pending_premium(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply(
            "reserve_pending_premium",
            provider,
            token,
            amount,
            Missing::Insufficient(BalanceField::WithdrawablePremiums),
            &|b| b.reserve_pending_premium(amount),
        )
    }

    pub fn release_pending_premium(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply(
            "release_pending_premium",
            provider,
            token,
            amount,
            Missing::NotFound,
            &|b| b.release_pending_premium(amount),
        )
    }

    pub fn move_earned_to_withdrawn(
        &self,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply(
            "move_earned_to_withdrawn",
            provider,
            token,
            amount,
            Missing::NotFound,
            &|b| b.move_earned_to_withdrawn(amount),
        )
    }

    // -----------------------------------------------------------------
    // Keyed effects
    // -----------------------------------------------------------------

    /// Apply a confirmed transaction's effect to its provider's balance.
    /// Re-applying the same transaction leaves the record unchanged.
    pub fn finalize_transfer(&self, tx: &PendingTransaction) -> Result<ProviderBalance> {
        let kind = tx.kind();
        let missing = match kind {
            TransactionKind::Deposit => Missing::Create,
            TransactionKind::Withdrawal | TransactionKind::PremiumWithdrawal => Missing::NotFound,
        };
        self.apply("finalize_transfer", &tx.provider, &tx.token, tx.amount, missing, &|b| {
            b.finalize_transfer(tx.id, kind, tx.amount)
        })
    }

    /// Credit one allocation's premium share. Re-crediting the same
    /// allocation leaves the record unchanged.
    pub fn credit_premium(
        &self,
        provider: &ProviderId,
        token: &str,
        allocation: AllocationId,
        amount: Decimal,
    ) -> Result<ProviderBalance> {
        self.apply("credit_premium", provider, token, amount, Missing::Create, &|b| {
            b.credit_premium(allocation, amount)
        })
    }

    /// Drop finalization and premium markers that can no longer be replayed.
    pub fn forget_markers(
        &self,
        provider: &ProviderId,
        token: &str,
        transfers: &[PendingTransactionId],
        premiums: &[AllocationId],
    ) -> Result<ProviderBalance> {
        let balance = self.store.modify_balance(provider, token, MissingBalance::Reject, &|b| {
            Ok(b.forget_markers(transfers, premiums))
        })?;
        tracing::debug!(
            provider = %provider,
            token,
            transfers = transfers.len(),
            premiums = premiums.len(),
            "Markers pruned"
        );
        Ok(balance)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn apply(
        &self,
        op: &'static str,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
        missing: Missing,
        mutate: &dyn Fn(&ProviderBalance) -> Result<ProviderBalance>,
    ) -> Result<ProviderBalance> {
        check_positive(amount)?;
        let policy = match missing {
            Missing::Create => MissingBalance::Create,
            Missing::Insufficient(_) | Missing::NotFound => MissingBalance::Reject,
        };
        let balance = match (self.store.modify_balance(provider, token, policy, mutate), missing) {
            (Ok(balance), _) => balance,
            (Err(PoolError::BalanceNotFound { .. }), Missing::Insufficient(field)) => {
                return Err(PoolError::InsufficientBalance {
                    provider: provider.clone(),
                    token: token.to_string(),
                    field,
                    needed: amount,
                    available: Decimal::ZERO,
                });
            }
            (Err(err), _) => return Err(err),
        };
        tracing::debug!(
            op,
            provider = %provider,
            token,
            %amount,
            available = %balance.available_balance,
            locked = %balance.locked_balance,
            "Balance updated"
        );
        Ok(balance)
    }
}

/// How a primitive treats a provider with no balance record.
#[derive(Clone, Copy)]
enum Missing {
    Create,
    /// Report as insufficient funds in this field.
    Insufficient(BalanceField),
    NotFound,
}

fn check_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(PoolError::InvalidAmount {
            amount,
            reason: "must be positive".into(),
        });
    }
    Ok(())
}

fn check_non_negative(amount: Decimal) -> Result<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(PoolError::InvalidAmount {
            amount,
            reason: "must not be negative".into(),
        });
    }
    Ok(())
}
