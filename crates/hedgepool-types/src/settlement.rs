//! Settlement inputs, progress records, and payout ledger entries.
//!
//! A settlement spans several atomic steps. Its [`SettlementRecord`] carries
//! one marker per step so an interrupted settlement can be resumed without
//! re-applying a step that already ran.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{LedgerEntryId, PolicyId, ProviderId, Token};

/// How much of one provider's collateral a payout consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContribution {
    pub provider: ProviderId,
    pub consumed: Decimal,
}

impl ProviderContribution {
    #[must_use]
    pub fn new(provider: ProviderId, consumed: Decimal) -> Self {
        Self { provider, consumed }
    }
}

/// Input of `process_settlement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub policy_id: PolicyId,
    pub amount: Decimal,
    pub token: Token,
    pub contributions: Vec<ProviderContribution>,
    pub external_ref: String,
}

impl SettlementRequest {
    /// Sum of all per-provider consumed amounts.
    #[must_use]
    pub fn total_consumed(&self) -> Decimal {
        self.contributions.iter().map(|c| c.consumed).sum()
    }

    /// Consumed amount for one provider (zero if absent).
    #[must_use]
    pub fn consumed_by(&self, provider: &ProviderId) -> Decimal {
        self.contributions
            .iter()
            .filter(|c| &c.provider == provider)
            .map(|c| c.consumed)
            .sum()
    }
}

/// Step markers of one settlement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementProgress {
    pub payout_logged: bool,
    /// Providers whose deposit reduction has been claimed.
    pub deposits_reduced: BTreeSet<ProviderId>,
    pub collateral_released: bool,
    pub metrics_recorded: bool,
}

/// Durable record of a settlement and how far it got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub request: SettlementRequest,
    pub progress: SettlementProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    #[must_use]
    pub fn new(request: SettlementRequest, at: DateTime<Utc>) -> Self {
        Self {
            request,
            progress: SettlementProgress::default(),
            created_at: at,
            updated_at: at,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn policy_id(&self) -> PolicyId {
        self.request.policy_id
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Every contributor with a non-zero consumption has been reduced.
    #[must_use]
    pub fn all_deposits_reduced(&self) -> bool {
        self.request
            .contributions
            .iter()
            .filter(|c| !c.consumed.is_zero())
            .all(|c| self.progress.deposits_reduced.contains(&c.provider))
    }
}

/// Kind of a payout ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerEntryKind {
    SettlementPayout,
}

/// Append-only log line for funds leaving the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub kind: LedgerEntryKind,
    pub policy_id: PolicyId,
    pub token: Token,
    pub amount: Decimal,
    pub external_ref: String,
    pub recorded_at: DateTime<Utc>,
}
