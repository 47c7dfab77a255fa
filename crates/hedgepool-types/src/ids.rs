//! Identifiers used throughout HedgePool.
//!
//! Entity IDs use UUIDv7 for time-ordered lexicographic sorting. Providers
//! are identified by their ledger principal, and allocation IDs are derived
//! deterministically from the (policy, provider) pair.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ProviderId
// ---------------------------------------------------------------------------

/// A liquidity provider, identified by its principal on the external ledger.
///
/// Ordering is lexicographic on the principal; the allocation engine relies
/// on it as the stable tie-break between equal balances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    #[must_use]
    pub fn new(principal: impl Into<String>) -> Self {
        Self(principal.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Random principal for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl ProviderId {
    pub fn random() -> Self {
        Self(format!("SP{:016X}", rand::random::<u64>()))
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// PolicyId
// ---------------------------------------------------------------------------

/// Identifier of a protection policy, issued by the policy lifecycle owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PolicyId(pub Uuid);

impl PolicyId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for PolicyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AllocationId
// ---------------------------------------------------------------------------

/// Identifier of one provider's allocation against one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AllocationId(pub Uuid);

impl AllocationId {
    /// Deterministic `AllocationId` from the policy and provider.
    ///
    /// A policy holds at most one allocation per provider, so the pair is a
    /// natural key; hashing it lets replays and reconciliation recompute the
    /// same ID.
    #[must_use]
    pub fn deterministic(policy_id: PolicyId, provider: &ProviderId) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"hedgepool:allocation_id:v1:");
        hasher.update(policy_id.0.as_bytes());
        hasher.update(provider.0.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc:{}", hex::encode(&self.0.as_bytes()[..8]))
    }
}

// ---------------------------------------------------------------------------
// PendingTransactionId
// ---------------------------------------------------------------------------

/// Identifier of a capital movement awaiting external confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PendingTransactionId(pub Uuid);

impl PendingTransactionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PendingTransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PendingTransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ptx:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DistributionBatchId
// ---------------------------------------------------------------------------

/// Groups the premium distribution records produced by one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DistributionBatchId(pub Uuid);

impl DistributionBatchId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DistributionBatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DistributionBatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// LedgerEntryId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LedgerEntryId(pub Uuid);

impl LedgerEntryId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for LedgerEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LedgerEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry:{}", self.0)
    }
}

/// Type alias for token identifiers (e.g., "STX", "sBTC").
pub type Token = String;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_id_ordering() {
        let a = PolicyId::new();
        let b = PolicyId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn allocation_id_deterministic() {
        let policy = PolicyId::new();
        let alice = ProviderId::new("SP2ALICE");
        let bob = ProviderId::new("SP3BOB");
        assert_eq!(
            AllocationId::deterministic(policy, &alice),
            AllocationId::deterministic(policy, &alice)
        );
        assert_ne!(
            AllocationId::deterministic(policy, &alice),
            AllocationId::deterministic(policy, &bob)
        );
        assert_ne!(
            AllocationId::deterministic(policy, &alice),
            AllocationId::deterministic(PolicyId::new(), &alice)
        );
    }

    #[test]
    fn provider_ordering_is_lexicographic() {
        let mut providers = vec![
            ProviderId::new("SP3C"),
            ProviderId::new("SP1A"),
            ProviderId::new("SP2B"),
        ];
        providers.sort();
        assert_eq!(providers[0].as_str(), "SP1A");
        assert_eq!(providers[2].as_str(), "SP3C");
    }

    #[test]
    fn display_prefixes() {
        assert!(PendingTransactionId::new().to_string().starts_with("ptx:"));
        assert!(PolicyId::new().to_string().starts_with("policy:"));
        assert_eq!(ProviderId::new("SP2ALICE").to_string(), "SP2ALICE");
    }
}
