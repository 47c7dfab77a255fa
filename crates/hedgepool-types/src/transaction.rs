//! # PendingTransaction: capital movements awaiting external confirmation
//!
//! Deposits, withdrawals, and premium withdrawals are not applied to the
//! balance ledger until the external ledger confirms them.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐ submit  ┌───────────┐ confirmed ┌───────────┐ claim ┌────────────┐ applied ┌───────────┐
//!   │ PENDING ├────────▶│ SUBMITTED ├──────────▶│ CONFIRMED ├──────▶│ FINALIZING ├────────▶│ PROCESSED │
//!   └────▲────┘         └─────┬─────┘           └─────▲─────┘       └─────┬──────┘         └───────────┘
//!        │ retry (bounded)    │ failed                └───────────────────┘
//!        │              ┌─────▼──┐                      ledger rejected
//!        └──────────────┤ FAILED │
//!                       └────────┘
//! ```
//!
//! A transaction left in FINALIZING by an interruption is completed by the
//! reconciliation sweep; the balance record remembers which transfers it
//! absorbed, so completing it never applies the effect twice.
//!
//! Every transition appends an [`AttemptRecord`] to an immutable history;
//! the retry count is derived from it rather than stored.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PendingTransactionId, PoolError, ProviderId, Result, Token, UnsignedTransfer};

/// What kind of capital movement a transaction is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    PremiumWithdrawal,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => write!(f, "DEPOSIT"),
            Self::Withdrawal => write!(f, "WITHDRAWAL"),
            Self::PremiumWithdrawal => write!(f, "PREMIUM_WITHDRAWAL"),
        }
    }
}

/// Lifecycle state of a pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Submitted,
    Confirmed,
    /// Ledger effect claimed but not yet acknowledged as applied.
    Finalizing,
    Failed,
    Processed,
}

impl TransactionStatus {
    /// Can this transaction transition to the given target state?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Submitted)
                | (Self::Submitted, Self::Confirmed | Self::Failed)
                | (Self::Failed, Self::Pending)
                | (Self::Confirmed, Self::Finalizing)
                | (Self::Finalizing, Self::Processed)
        )
    }

    /// Whether the transaction still awaits an external outcome.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Submitted)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Finalizing => write!(f, "FINALIZING"),
            Self::Failed => write!(f, "FAILED"),
            Self::Processed => write!(f, "PROCESSED"),
        }
    }
}

/// Kind-specific transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionPayload {
    Deposit {
        from: ProviderId,
        transfer: UnsignedTransfer,
    },
    Withdrawal {
        to: ProviderId,
        transfer: UnsignedTransfer,
        /// Available balance reserved at request time.
        reserved_available: Decimal,
    },
    PremiumWithdrawal {
        to: ProviderId,
        transfer: UnsignedTransfer,
        /// Earned premiums reserved as pending at request time.
        reserved_premium: Decimal,
    },
}

impl TransactionPayload {
    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Deposit { .. } => TransactionKind::Deposit,
            Self::Withdrawal { .. } => TransactionKind::Withdrawal,
            Self::PremiumWithdrawal { .. } => TransactionKind::PremiumWithdrawal,
        }
    }

    #[must_use]
    pub fn transfer(&self) -> &UnsignedTransfer {
        match self {
            Self::Deposit { transfer, .. }
            | Self::Withdrawal { transfer, .. }
            | Self::PremiumWithdrawal { transfer, .. } => transfer,
        }
    }

    /// Build the payload for `kind` around a prepared transfer.
    #[must_use]
    pub fn for_kind(
        kind: TransactionKind,
        provider: ProviderId,
        amount: Decimal,
        transfer: UnsignedTransfer,
    ) -> Self {
        match kind {
            TransactionKind::Deposit => Self::Deposit {
                from: provider,
                transfer,
            },
            TransactionKind::Withdrawal => Self::Withdrawal {
                to: provider,
                transfer,
                reserved_available: amount,
            },
            TransactionKind::PremiumWithdrawal => Self::PremiumWithdrawal {
                to: provider,
                transfer,
                reserved_premium: amount,
            },
        }
    }
}

/// One entry of a transaction's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt this event belongs to.
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub event: AttemptEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AttemptEvent {
    Requested,
    Submitted {
        external_ref: String,
    },
    Confirmed {
        external_ref: String,
        block_height: Option<u64>,
    },
    Failed {
        external_ref: String,
        error: String,
    },
    FinalizationStarted,
    Processed,
    FinalizationFailed {
        error: String,
    },
    Retried,
}

/// Outcome status reported by the external ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Confirmed,
    Failed,
}

impl From<OutcomeStatus> for TransactionStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Confirmed => Self::Confirmed,
            OutcomeStatus::Failed => Self::Failed,
        }
    }
}

/// Callback from the external ledger about a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub transaction_id: PendingTransactionId,
    pub external_ref: String,
    pub status: OutcomeStatus,
    pub block_height: Option<u64>,
    pub error: Option<String>,
}

/// A capital movement awaiting (or having received) external confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: PendingTransactionId,
    pub provider: ProviderId,
    pub token: Token,
    pub amount: Decimal,
    pub status: TransactionStatus,
    /// External ledger reference of the current attempt.
    pub external_ref: Option<String>,
    pub payload: TransactionPayload,
    pub error: Option<String>,
    pub block_height: Option<u64>,
    pub history: Vec<AttemptRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingTransaction {
    /// Create a new PENDING transaction on its first attempt.
    #[must_use]
    pub fn new(
        provider: ProviderId,
        token: impl Into<Token>,
        amount: Decimal,
        payload: TransactionPayload,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PendingTransactionId::new(),
            provider,
            token: token.into(),
            amount,
            status: TransactionStatus::Pending,
            external_ref: None,
            payload,
            error: None,
            block_height: None,
            history: vec![AttemptRecord {
                attempt: 1,
                at,
                event: AttemptEvent::Requested,
            }],
            created_at: at,
            updated_at: at,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.payload.kind()
    }

    /// The current attempt number (1-based).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.history
            .iter()
            .filter(|r| matches!(r.event, AttemptEvent::Requested | AttemptEvent::Retried))
            .count()
            .try_into()
            .unwrap_or(u32::MAX)
    }

    /// Number of retries performed so far.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.attempt().saturating_sub(1)
    }

    /// Whether the last recorded event matches this outcome exactly.
    #[must_use]
    pub fn already_reported(&self, report: &OutcomeReport) -> bool {
        self.external_ref.as_deref() == Some(report.external_ref.as_str())
            && match report.status {
                OutcomeStatus::Confirmed => matches!(
                    self.status,
                    TransactionStatus::Confirmed
                        | TransactionStatus::Finalizing
                        | TransactionStatus::Processed
                ),
                OutcomeStatus::Failed => self.status == TransactionStatus::Failed,
            }
    }

    /// If `external_ref` belonged to an earlier (retried) attempt, the
    /// outcome recorded for it at the time.
    #[must_use]
    pub fn earlier_attempt_outcome(&self, external_ref: &str) -> Option<Option<OutcomeStatus>> {
        let current = self.attempt();
        let mut found = None;
        for record in self.history.iter().filter(|r| r.attempt < current) {
            match &record.event {
                AttemptEvent::Submitted { external_ref: r } if r == external_ref => {
                    found.get_or_insert(None);
                }
                AttemptEvent::Confirmed { external_ref: r, .. } if r == external_ref => {
                    found = Some(Some(OutcomeStatus::Confirmed));
                }
                AttemptEvent::Failed { external_ref: r, .. } if r == external_ref => {
                    found = Some(Some(OutcomeStatus::Failed));
                }
                _ => {}
            }
        }
        found
    }

    /// PENDING → SUBMITTED with the external reference of this attempt.
    pub fn submit(&self, external_ref: &str, at: DateTime<Utc>) -> Result<Self> {
        if let Some(existing) = &self.external_ref {
            if existing != external_ref {
                return Err(self.ref_conflict(existing, external_ref));
            }
        }
        let mut next = self.transition(TransactionStatus::Submitted, at)?;
        next.external_ref = Some(external_ref.to_string());
        next.record(
            AttemptEvent::Submitted {
                external_ref: external_ref.to_string(),
            },
            at,
        );
        Ok(next)
    }

    /// SUBMITTED → CONFIRMED / FAILED per the external outcome.
    pub fn apply_outcome(&self, report: &OutcomeReport, at: DateTime<Utc>) -> Result<Self> {
        if let Some(existing) = &self.external_ref {
            if existing != &report.external_ref {
                return Err(self.ref_conflict(existing, &report.external_ref));
            }
        }
        let mut next = self.transition(report.status.into(), at)?;
        next.external_ref = Some(report.external_ref.clone());
        match report.status {
            OutcomeStatus::Confirmed => {
                next.block_height = report.block_height;
                next.record(
                    AttemptEvent::Confirmed {
                        external_ref: report.external_ref.clone(),
                        block_height: report.block_height,
                    },
                    at,
                );
            }
            OutcomeStatus::Failed => {
                let error = report
                    .error
                    .clone()
                    .unwrap_or_else(|| "external ledger reported failure".to_string());
                next.error = Some(error.clone());
                next.record(
                    AttemptEvent::Failed {
                        external_ref: report.external_ref.clone(),
                        error,
                    },
                    at,
                );
            }
        }
        Ok(next)
    }

    /// CONFIRMED → FINALIZING. Claims the right to finalize into the ledger.
    pub fn begin_finalization(&self, at: DateTime<Utc>) -> Result<Self> {
        let mut next = self.transition(TransactionStatus::Finalizing, at)?;
        next.record(AttemptEvent::FinalizationStarted, at);
        Ok(next)
    }

    /// FINALIZING → PROCESSED once the ledger holds the effect.
    pub fn mark_processed(&self, at: DateTime<Utc>) -> Result<Self> {
        let mut next = self.transition(TransactionStatus::Processed, at)?;
        next.record(AttemptEvent::Processed, at);
        Ok(next)
    }

    /// FINALIZING → CONFIRMED after the ledger rejected the finalization.
    ///
    /// This is the only backwards edge; it restores the last valid state so
    /// the record is never left claiming an application that did not happen.
    pub fn revert_finalization(&self, error: &str, at: DateTime<Utc>) -> Result<Self> {
        if self.status != TransactionStatus::Finalizing {
            return Err(PoolError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: TransactionStatus::Confirmed,
            });
        }
        let mut next = self.clone();
        next.status = TransactionStatus::Confirmed;
        next.error = Some(error.to_string());
        next.updated_at = at;
        next.record(
            AttemptEvent::FinalizationFailed {
                error: error.to_string(),
            },
            at,
        );
        Ok(next)
    }

    /// FAILED → PENDING for a new attempt, bounded by `max_attempts`.
    pub fn retry(
        &self,
        max_attempts: u32,
        payload: TransactionPayload,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        let attempts = self.attempt();
        if self.status == TransactionStatus::Failed && attempts >= max_attempts {
            return Err(PoolError::RetryLimitExceeded {
                id: self.id,
                attempts,
            });
        }
        let mut next = self.transition(TransactionStatus::Pending, at)?;
        next.external_ref = None;
        next.error = None;
        next.payload = payload;
        next.record(AttemptEvent::Retried, at);
        Ok(next)
    }

    /// Whether a FAILED transaction has no retries left.
    #[must_use]
    pub fn retries_exhausted(&self, max_attempts: u32) -> bool {
        self.status == TransactionStatus::Failed && self.attempt() >= max_attempts
    }

    fn transition(&self, to: TransactionStatus, at: DateTime<Utc>) -> Result<Self> {
        if !self.status.can_transition_to(to) {
            return Err(PoolError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        let mut next = self.clone();
        next.status = to;
        next.updated_at = at;
        Ok(next)
    }

    fn record(&mut self, event: AttemptEvent, at: DateTime<Utc>) {
        let attempt = self.attempt() + u32::from(matches!(event, AttemptEvent::Retried));
        self.history.push(AttemptRecord { attempt, at, event });
    }

    fn ref_conflict(&self, existing: &str, reported: &str) -> PoolError {
        PoolError::inconsistent(format!(
            "transaction {} already bound to external ref {existing}, outcome reported for {reported}",
            self.id
        ))
    }
}

/// Fixture transactions for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl PendingTransaction {
    pub fn dummy(kind: TransactionKind, provider: &str, amount: Decimal) -> Self {
        let provider = ProviderId::new(provider);
        let transfer = UnsignedTransfer {
            kind,
            amount,
            counterparty: provider.clone(),
            payload_hex: String::new(),
        };
        let payload = TransactionPayload::for_kind(kind, provider.clone(), amount, transfer);
        Self::new(provider, "STX", amount, payload, Utc::now())
    }
}
