//! Premium distribution records.
//!
//! One [`PremiumDistributionRecord`] is appended per allocation when a
//! policy's premium is split among its providers. Records are immutable;
//! the allocation's `premium_distributed` flag guards against a second one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AllocationId, DistributionBatchId, PolicyId, ProviderId, Token};

/// Proof that a provider was credited its share of a policy's premium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumDistributionRecord {
    pub policy_id: PolicyId,
    pub provider: ProviderId,
    pub allocation_id: AllocationId,
    pub token: Token,
    pub amount: Decimal,
    pub batch_id: DistributionBatchId,
    pub distributed_at: DateTime<Utc>,
}
