//! # hedgepool-types
//!
//! Shared types, errors, and configuration for the **HedgePool** liquidity
//! engine.
//!
//! This crate is the leaf dependency of the workspace. Every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`ProviderId`], [`PolicyId`], [`AllocationId`], [`PendingTransactionId`], [`DistributionBatchId`], [`LedgerEntryId`]
//! - **Balance model**: [`ProviderBalance`] and its invariant-checked mutations
//! - **Allocation model**: [`PolicyAllocation`], [`AllocationStatus`], [`ReleaseReason`]
//! - **Transaction model**: [`PendingTransaction`], [`TransactionStatus`], [`TransactionPayload`], [`OutcomeReport`]
//! - **Premium model**: [`PremiumDistributionRecord`]
//! - **Settlement model**: [`SettlementRequest`], [`SettlementRecord`], [`LedgerEntry`]
//! - **Metrics**: [`PoolMetricsSnapshot`]
//! - **Operations**: [`PoolOperationalStatus`], [`PauseFlags`]
//! - **Collaborators**: [`PremiumSource`], [`TransferPreparer`]
//! - **Configuration**: [`PoolConfig`], [`TokenConfig`]
//! - **Errors**: [`PoolError`] with `HP_ERR_` prefix codes

pub mod allocation;
pub mod balance;
pub mod config;
pub mod constants;
pub mod error;
pub mod external;
pub mod ids;
pub mod metrics;
pub mod premium;
pub mod settlement;
pub mod status;
pub mod transaction;

pub use allocation::*;
pub use balance::*;
pub use config::*;
pub use error::*;
pub use external::*;
pub use ids::*;
pub use metrics::*;
pub use premium::*;
pub use settlement::*;
pub use status::*;
pub use transaction::*;

// Constants are accessed via `hedgepool_types::constants::FOO`
// (not re-exported to avoid name collisions).
