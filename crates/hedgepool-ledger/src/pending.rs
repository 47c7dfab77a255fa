//! Pending transaction machine.
//!
//! Capital movements are recorded as [`PendingTransaction`]s and only
//! reach the balance ledger once the external ledger confirms them.
//! Withdrawals reserve their funds up front so concurrent requests cannot
//! double-spend the same balance; a failed outcome releases the
//! reservation.
//!
//! Exactly-once application: whichever caller moves a transaction into
//! CONFIRMED (or FAILED) is the only one that applies the ledger effect
//! (or the compensation). Every other caller observes the transition as
//! already done and gets [`OutcomeDisposition::Duplicate`].
//!
//! Finalization spans two records. The transaction is claimed as
//! FINALIZING, the balance absorbs the effect keyed by the transaction id,
//! and only then is the transaction marked PROCESSED. An interruption
//! between the steps leaves a FINALIZING transaction that
//! [`PendingTransactions::finalize_confirmed`] completes without applying
//! the effect twice.

use std::sync::Arc;

use chrono::Utc;
use hedgepool_types::{
    Operation, OutcomeReport, OutcomeStatus, PendingTransaction, PendingTransactionId, PoolConfig,
    PoolError, ProviderId, Result, TransactionKind, TransactionPayload, TransactionStatus,
    TransferPreparer,
};
use rust_decimal::Decimal;

use crate::balance_ledger::BalanceLedger;
use crate::store::PoolStore;

/// What handling an outcome report did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeDisposition {
    /// This call applied the transition; the transaction is now in `status`.
    Applied(TransactionStatus),
    /// The outcome was already applied. Nothing changed.
    Duplicate,
}

/// The operation class a transaction kind is gated by.
#[must_use]
pub fn gating_operation(kind: TransactionKind) -> Operation {
    match kind {
        TransactionKind::Deposit => Operation::Deposits,
        TransactionKind::Withdrawal | TransactionKind::PremiumWithdrawal => Operation::Withdrawals,
    }
}

pub struct PendingTransactions<S: PoolStore> {
    store: Arc<S>,
    ledger: BalanceLedger<S>,
    preparer: Arc<dyn TransferPreparer>,
    config: Arc<PoolConfig>,
}

impl<S: PoolStore> PendingTransactions<S> {
    pub fn new(
        store: Arc<S>,
        preparer: Arc<dyn TransferPreparer>,
        config: Arc<PoolConfig>,
    ) -> Self {
        Self {
            ledger: BalanceLedger::new(Arc::clone(&store)),
            store,
            preparer,
            config,
        }
    }

    pub fn transaction(&self, id: PendingTransactionId) -> Result<PendingTransaction> {
        self.store
            .transaction(id)?
            .ok_or(PoolError::TransactionNotFound(id))
    }

    pub fn transactions_for(&self, provider: &ProviderId) -> Result<Vec<PendingTransaction>> {
        Ok(self
            .store
            .transactions()?
            .into_iter()
            .filter(|tx| &tx.provider == provider)
            .collect())
    }

    // -----------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------

    /// Record a new capital movement awaiting external confirmation.
    ///
    /// 1. Validate the amount against the token's precision and minimums
    /// 2. Check the pause flag for the kind's operation class
    /// 3. Reserve funds (withdrawals only)
    /// 4. Prepare the unsigned transfer and persist a PENDING transaction
    ///
    /// If step 4 fails the reservation is released before returning.
    ///
    /// # Errors
    /// `InvalidAmount`, `UnsupportedToken`, `OperationPaused`,
    /// `InsufficientBalance`, or the preparer's error.
    pub fn request(
        &self,
        kind: TransactionKind,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<PendingTransaction> {
        self.validate_request(kind, token, amount)?;
        self.store
            .operational_status()?
            .check(gating_operation(kind))?;

        self.reserve(kind, provider, token, amount)?;
        let created = self.prepare(kind, provider, amount).and_then(|payload| {
            let tx = PendingTransaction::new(provider.clone(), token, amount, payload, Utc::now());
            self.store.insert_transaction(tx.clone())?;
            Ok(tx)
        });

        match created {
            Ok(tx) => {
                tracing::info!(
                    tx = %tx.id,
                    kind = %kind,
                    provider = %provider,
                    token,
                    %amount,
                    "Pending transaction requested"
                );
                Ok(tx)
            }
            Err(err) => {
                self.release_reservation(kind, provider, token, amount);
                Err(err)
            }
        }
    }

    fn validate_request(&self, kind: TransactionKind, token: &str, amount: Decimal) -> Result<()> {
        let token_config = self.config.token(token)?;
        token_config.check_amount(amount)?;
        let minimum = match kind {
            TransactionKind::Deposit => token_config.min_deposit,
            TransactionKind::Withdrawal => token_config.min_withdrawal,
            TransactionKind::PremiumWithdrawal => Decimal::ZERO,
        };
        if amount < minimum {
            return Err(PoolError::InvalidAmount {
                amount,
                reason: format!("below {kind} minimum {minimum} {token}"),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // External outcomes
    // -----------------------------------------------------------------

    /// PENDING → SUBMITTED once the transfer has been broadcast.
    /// Repeating the call with the same reference is a no-op.
    pub fn mark_submitted(
        &self,
        id: PendingTransactionId,
        external_ref: &str,
    ) -> Result<PendingTransaction> {
        let tx = self.transaction(id)?;
        if tx.status == TransactionStatus::Submitted
            && tx.external_ref.as_deref() == Some(external_ref)
        {
            return Ok(tx);
        }
        let now = Utc::now();
        let submitted = self
            .store
            .update_transaction(id, &|t| t.submit(external_ref, now))?;
        tracing::debug!(tx = %id, external_ref, "Transaction submitted");
        Ok(submitted)
    }

    /// Apply an outcome reported by the external ledger.
    ///
    /// An outcome for a still-PENDING transaction implies its submission.
    /// Replayed outcomes are no-ops.
    ///
    /// # Errors
    /// `InconsistentState` if the outcome conflicts with what is recorded
    /// (different external reference, or a confirmation for an attempt
    /// that was recorded as failed). Finalization errors surface as
    /// `InconsistentState` with the transaction left CONFIRMED.
    pub fn handle_outcome(&self, report: &OutcomeReport) -> Result<OutcomeDisposition> {
        let id = report.transaction_id;
        let now = Utc::now();
        let tx = self.transaction(id)?;

        if tx.already_reported(report) {
            tracing::debug!(tx = %id, external_ref = %report.external_ref, "Duplicate outcome ignored");
            return Ok(OutcomeDisposition::Duplicate);
        }
        if let Some(recorded) = tx.earlier_attempt_outcome(&report.external_ref) {
            if recorded == Some(report.status) {
                tracing::debug!(tx = %id, external_ref = %report.external_ref, "Outcome for superseded attempt ignored");
                return Ok(OutcomeDisposition::Duplicate);
            }
            tracing::error!(
                tx = %id,
                external_ref = %report.external_ref,
                reported = ?report.status,
                recorded = ?recorded,
                "Outcome contradicts a superseded attempt"
            );
            return Err(PoolError::inconsistent(format!(
                "{:?} reported for superseded attempt {} of {id}, recorded {recorded:?}",
                report.status, report.external_ref
            )));
        }

        if tx.status == TransactionStatus::Pending {
            if let Err(err) = self
                .store
                .update_transaction(id, &|t| t.submit(&report.external_ref, now))
            {
                let current = self.transaction(id)?;
                if current.external_ref.as_deref() != Some(report.external_ref.as_str()) {
                    return Err(Self::conflict(&current, report, err));
                }
            }
        }

        let updated = match self
            .store
            .update_transaction(id, &|t| t.apply_outcome(report, now))
        {
            Ok(updated) => updated,
            Err(err) => {
                let current = self.transaction(id)?;
                if current.already_reported(report) {
                    return Ok(OutcomeDisposition::Duplicate);
                }
                return Err(Self::conflict(&current, report, err));
            }
        };

        match report.status {
            OutcomeStatus::Confirmed => {
                let done = self.finalize(&updated)?;
                Ok(OutcomeDisposition::Applied(done.status))
            }
            OutcomeStatus::Failed => {
                self.compensate(&updated)?;
                Ok(OutcomeDisposition::Applied(updated.status))
            }
        }
    }

    /// Re-drive finalization of a CONFIRMED or interrupted FINALIZING
    /// transaction, e.g. after a finalization error was fixed.
    ///
    /// # Errors
    /// `InvalidTransition` for any other status.
    pub fn finalize_confirmed(&self, id: PendingTransactionId) -> Result<PendingTransaction> {
        let tx = self.transaction(id)?;
        if !matches!(
            tx.status,
            TransactionStatus::Confirmed | TransactionStatus::Finalizing
        ) {
            return Err(PoolError::InvalidTransition {
                id,
                from: tx.status,
                to: TransactionStatus::Processed,
            });
        }
        self.finalize(&tx)
    }

    // -----------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------

    /// FAILED → PENDING with a freshly prepared transfer.
    ///
    /// The reservation released by the failure is taken again first; if
    /// that is no longer possible the transaction stays FAILED.
    ///
    /// # Errors
    /// `InvalidTransition` unless FAILED, `RetryLimitExceeded`,
    /// `OperationPaused`, `InsufficientBalance`.
    pub fn retry(&self, id: PendingTransactionId) -> Result<PendingTransaction> {
        let max = self.config.max_transaction_attempts;
        let tx = self.transaction(id)?;
        if tx.status != TransactionStatus::Failed {
            return Err(PoolError::InvalidTransition {
                id,
                from: tx.status,
                to: TransactionStatus::Pending,
            });
        }
        if tx.retries_exhausted(max) {
            return Err(PoolError::RetryLimitExceeded {
                id,
                attempts: tx.attempt(),
            });
        }
        let kind = tx.kind();
        self.store
            .operational_status()?
            .check(gating_operation(kind))?;

        self.reserve(kind, &tx.provider, &tx.token, tx.amount)?;
        let now = Utc::now();
        let retried = self
            .prepare(kind, &tx.provider, tx.amount)
            .and_then(|payload| {
                self.store
                    .update_transaction(id, &|t| t.retry(max, payload.clone(), now))
            });

        match retried {
            Ok(next) => {
                tracing::info!(tx = %id, attempt = next.attempt(), "Transaction retried");
                Ok(next)
            }
            Err(err) => {
                self.release_reservation(kind, &tx.provider, &tx.token, tx.amount);
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn finalize(&self, tx: &PendingTransaction) -> Result<PendingTransaction> {
        let now = Utc::now();
        if tx.status == TransactionStatus::Confirmed {
            match self
                .store
                .update_transaction(tx.id, &|t| t.begin_finalization(now))
            {
                Ok(_) => {}
                Err(PoolError::InvalidTransition {
                    from: TransactionStatus::Finalizing | TransactionStatus::Processed,
                    ..
                }) => return self.transaction(tx.id),
                Err(err) => return Err(err),
            }
        }

        if let Err(err) = self.ledger.finalize_transfer(tx) {
            let reason = err.to_string();
            tracing::error!(
                tx = %tx.id,
                kind = %tx.kind(),
                provider = %tx.provider,
                error = %reason,
                "Finalization rejected by ledger, transaction reverted to CONFIRMED"
            );
            self.store
                .update_transaction(tx.id, &|t| t.revert_finalization(&reason, now))?;
            return Err(PoolError::inconsistent(format!(
                "finalizing {} {}: {reason}",
                tx.kind(),
                tx.id
            )));
        }

        let processed = match self.store.update_transaction(tx.id, &|t| t.mark_processed(now)) {
            Ok(processed) => processed,
            Err(PoolError::InvalidTransition {
                from: TransactionStatus::Processed,
                ..
            }) => return self.transaction(tx.id),
            Err(err) => return Err(err),
        };

        tracing::info!(
            tx = %tx.id,
            kind = %tx.kind(),
            provider = %tx.provider,
            amount = %tx.amount,
            "Transaction processed"
        );
        Ok(processed)
    }

    fn compensate(&self, tx: &PendingTransaction) -> Result<()> {
        let released = match tx.kind() {
            TransactionKind::Deposit => Ok(()),
            TransactionKind::Withdrawal => self
                .ledger
                .release_withdrawal(&tx.provider, &tx.token, tx.amount)
                .map(|_| ()),
            TransactionKind::PremiumWithdrawal => self
                .ledger
                .release_pending_premium(&tx.provider, &tx.token, tx.amount)
                .map(|_| ()),
        };
        if let Err(err) = released {
            tracing::error!(
                tx = %tx.id,
                provider = %tx.provider,
                error = %err,
                "Compensation for failed transaction rejected by ledger"
            );
            return Err(PoolError::inconsistent(format!(
                "compensating {} {}: {err}",
                tx.kind(),
                tx.id
            )));
        }
        tracing::warn!(
            tx = %tx.id,
            kind = %tx.kind(),
            provider = %tx.provider,
            error = tx.error.as_deref().unwrap_or_default(),
            "Transaction failed"
        );
        Ok(())
    }

    fn reserve(
        &self,
        kind: TransactionKind,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        match kind {
            TransactionKind::Deposit => Ok(()),
            TransactionKind::Withdrawal => self
                .ledger
                .reserve_withdrawal(provider, token, amount)
                .map(|_| ()),
            TransactionKind::PremiumWithdrawal => self
                .ledger
                .reserve_pending_premium(provider, token, amount)
                .map(|_| ()),
        }
    }

    /// Undo a reservation taken by this call. A failure here leaves the
    /// funds reserved, which the conservation check reports.
    fn release_reservation(
        &self,
        kind: TransactionKind,
        provider: &ProviderId,
        token: &str,
        amount: Decimal,
    ) {
        let released = match kind {
            TransactionKind::Deposit => return,
            TransactionKind::Withdrawal => self.ledger.release_withdrawal(provider, token, amount),
            TransactionKind::PremiumWithdrawal => {
                self.ledger.release_pending_premium(provider, token, amount)
            }
        };
        if let Err(err) = released {
            tracing::error!(
                kind = %kind,
                provider = %provider,
                %amount,
                error = %err,
                "Failed to release reservation"
            );
        }
    }

    fn prepare(
        &self,
        kind: TransactionKind,
        provider: &ProviderId,
        amount: Decimal,
    ) -> Result<TransactionPayload> {
        let transfer = self.preparer.prepare_transfer(kind, amount, provider)?;
        Ok(TransactionPayload::for_kind(kind, provider.clone(), amount, transfer))
    }

    /// An outcome that cannot be applied. A second, different outcome for
    /// the same reference is a contradiction rather than a bad transition.
    fn conflict(current: &PendingTransaction, report: &OutcomeReport, err: PoolError) -> PoolError {
        let err = match err {
            PoolError::InvalidTransition { .. }
                if current.external_ref.as_deref() == Some(report.external_ref.as_str()) =>
            {
                PoolError::inconsistent(format!(
                    "{:?} reported for {} which is already {}",
                    report.status, current.id, current.status
                ))
            }
            other => other,
        };
        if matches!(err, PoolError::InconsistentState { .. }) {
            tracing::error!(tx = %current.id, error = %err, "Conflicting outcome report");
        }
        err
    }
}
