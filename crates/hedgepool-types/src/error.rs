//! Error types for the HedgePool liquidity engine.
//!
//! All errors use the `HP_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors (bad input, nothing persisted)
//! - 2xx: Balance / liquidity errors (business-rule rejection, retryable)
//! - 3xx: Pending transaction errors
//! - 4xx: Allocation / settlement state errors
//! - 5xx: External ledger errors
//! - 6xx: Operational errors
//! - 9xx: General / internal errors

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PendingTransactionId, PolicyId, ProviderId, TransactionStatus};

/// Which balance field an operation ran short on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceField {
    Available,
    Locked,
    Deposited,
    /// Earned premiums not yet withdrawn or reserved.
    WithdrawablePremiums,
    PendingPremiums,
}

impl fmt::Display for BalanceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Locked => write!(f, "locked"),
            Self::Deposited => write!(f, "deposited"),
            Self::WithdrawablePremiums => write!(f, "withdrawable premiums"),
            Self::PendingPremiums => write!(f, "pending premiums"),
        }
    }
}

/// Coarse classification of a [`PoolError`], used by callers to decide
/// whether to retry, surface to the user, or page an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input. Rejected synchronously, nothing persisted.
    Validation,
    /// Business-rule rejection. Nothing mutated; retryable once conditions change.
    BusinessRule,
    /// Conflicting or missing state. Logged as critical, never patched.
    InconsistentState,
    /// The external ledger failed; retried up to a bound.
    TransientExternal,
    /// Store or configuration failure.
    Internal,
}

/// Central error enum for all HedgePool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// Amount is zero, negative, or too precise for the token.
    #[error("HP_ERR_100: Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    /// The token is not configured for this pool.
    #[error("HP_ERR_101: Unsupported token: {0}")]
    UnsupportedToken(String),

    /// Generic input validation failure.
    #[error("HP_ERR_102: Validation failed: {reason}")]
    Validation { reason: String },

    // =================================================================
    // Balance / Liquidity Errors (2xx)
    // =================================================================
    /// A single provider's balance cannot cover the operation.
    #[error(
        "HP_ERR_200: Insufficient {field} balance for {provider} ({token}): need {needed}, have {available}"
    )]
    InsufficientBalance {
        provider: ProviderId,
        token: String,
        field: BalanceField,
        needed: Decimal,
        available: Decimal,
    },

    /// The eligible providers together cannot cover a policy's collateral.
    #[error("HP_ERR_201: Insufficient pool liquidity for {token}: need {needed}, eligible {available}")]
    InsufficientPoolLiquidity {
        token: String,
        needed: Decimal,
        available: Decimal,
    },

    /// No balance record exists for the (provider, token) pair.
    #[error("HP_ERR_202: Balance record not found for {provider} ({token})")]
    BalanceNotFound { provider: ProviderId, token: String },

    /// A balance operation would violate a ProviderBalance invariant.
    #[error("HP_ERR_203: Balance invariant violated for {provider} ({token}): {reason}")]
    BalanceInvariant {
        provider: ProviderId,
        token: String,
        reason: String,
    },

    // =================================================================
    // Pending Transaction Errors (3xx)
    // =================================================================
    /// No pending transaction with this ID.
    #[error("HP_ERR_300: Pending transaction not found: {0}")]
    TransactionNotFound(PendingTransactionId),

    /// The requested state transition is not allowed.
    #[error("HP_ERR_301: Invalid transaction transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: PendingTransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// The transaction has used every allowed attempt.
    #[error("HP_ERR_302: Retry limit exceeded for {id} after {attempts} attempts")]
    RetryLimitExceeded {
        id: PendingTransactionId,
        attempts: u32,
    },

    // =================================================================
    // Allocation / Settlement State Errors (4xx)
    // =================================================================
    /// No allocations exist for the policy.
    #[error("HP_ERR_400: Policy not found: {0}")]
    PolicyNotFound(PolicyId),

    /// The policy already has a funded allocation batch.
    #[error("HP_ERR_401: Policy already funded: {0}")]
    PolicyAlreadyFunded(PolicyId),

    /// Internal and external state disagree. Critical; never patched silently.
    #[error("HP_ERR_402: Inconsistent state: {reason}")]
    InconsistentState { reason: String },

    // =================================================================
    // External Ledger Errors (5xx)
    // =================================================================
    /// The external ledger or its collaborator failed transiently.
    #[error("HP_ERR_500: Transient external failure: {reason}")]
    TransientExternalFailure { reason: String },

    // =================================================================
    // Operational Errors (6xx)
    // =================================================================
    /// The operation class is paused by an operator.
    #[error("HP_ERR_600: {operation} paused: {reason}")]
    OperationPaused { operation: String, reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error (poisoned store lock, etc.).
    #[error("HP_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("HP_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("HP_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Classify this error per the engine's error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. }
            | Self::UnsupportedToken(_)
            | Self::Validation { .. }
            | Self::PolicyNotFound(_)
            | Self::PolicyAlreadyFunded(_)
            | Self::TransactionNotFound(_)
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::InsufficientBalance { .. }
            | Self::InsufficientPoolLiquidity { .. }
            | Self::RetryLimitExceeded { .. }
            | Self::OperationPaused { .. } => ErrorKind::BusinessRule,
            Self::BalanceNotFound { .. }
            | Self::BalanceInvariant { .. }
            | Self::InconsistentState { .. } => ErrorKind::InconsistentState,
            Self::TransientExternalFailure { .. } => ErrorKind::TransientExternal,
            Self::Internal(_) | Self::Serialization(_) | Self::Configuration(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the same request may succeed later without operator action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. }
                | Self::InsufficientPoolLiquidity { .. }
                | Self::OperationPaused { .. }
                | Self::TransientExternalFailure { .. }
        )
    }

    /// Shorthand for a [`PoolError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`PoolError::InconsistentState`].
    pub fn inconsistent(reason: impl Into<String>) -> Self {
        Self::InconsistentState {
            reason: reason.into(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PoolError>;

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
