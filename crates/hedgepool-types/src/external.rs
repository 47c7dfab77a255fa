//! Collaborator boundaries.
//!
//! The engine consumes two collaborators it does not implement: a pricing
//! source for policy premiums, and a transaction preparer that builds
//! unsigned external-ledger transfers. Signing and broadcasting happen
//! outside the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PolicyId, ProviderId, Result, TransactionKind};

/// An unsigned transfer produced by the transaction-preparation collaborator.
///
/// The engine stores it opaquely and never signs or broadcasts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransfer {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub counterparty: ProviderId,
    /// Hex-encoded unsigned transaction bytes.
    pub payload_hex: String,
}

/// Supplies the premium for a policy.
pub trait PremiumSource: Send + Sync {
    fn premium(&self, policy_id: PolicyId) -> Result<Decimal>;
}

/// Builds unsigned transfers for capital movements.
pub trait TransferPreparer: Send + Sync {
    /// # Errors
    /// Implementations return `TransientExternalFailure` when the
    /// preparation service is unreachable.
    fn prepare_transfer(
        &self,
        kind: TransactionKind,
        amount: Decimal,
        counterparty: &ProviderId,
    ) -> Result<UnsignedTransfer>;
}

/// Preparer that encodes the transfer fields directly. Used by tests and
/// local demos where no external preparation service exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoPreparer;

impl TransferPreparer for EchoPreparer {
    fn prepare_transfer(
        &self,
        kind: TransactionKind,
        amount: Decimal,
        counterparty: &ProviderId,
    ) -> Result<UnsignedTransfer> {
        let body = format!("{kind}:{amount}:{counterparty}");
        Ok(UnsignedTransfer {
            kind,
            amount,
            counterparty: counterparty.clone(),
            payload_hex: hex::encode(body.as_bytes()),
        })
    }
}

/// Fixed-premium source for tests.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Clone, Copy)]
pub struct FixedPremium(pub Decimal);

#[cfg(any(test, feature = "test-helpers"))]
impl PremiumSource for FixedPremium {
    fn premium(&self, _policy_id: PolicyId) -> Result<Decimal> {
        Ok(self.0)
    }
}
