//! # hedgepool-settlement
//!
//! Settlement, metrics, reconciliation, and the [`LiquidityPool`] facade.
//!
//! ## Architecture
//!
//! ```text
//!   policy lifecycle ──┐        ┌── providers (deposit / withdraw)
//!                      ▼        ▼
//!                  ┌──────────────────┐
//!                  │  LiquidityPool   │
//!                  └──────────────────┘
//!         ┌──────────┬─────┴──────┬──────────────┐
//!         ▼          ▼            ▼              ▼
//!   AllocationEngine  Premium   Settlement   PendingTransactions
//!   CollateralRelease Distributor Processor        │
//!         └──────────┴─────┬──────┴──────────────┘
//!                          ▼
//!                 BalanceLedger ── PoolStore
//!                          ▲
//!     Reconciler ──────────┘  (resume, repair, report; run by the sweeper)
//! ```
//!
//! A settlement:
//! 1. Validates the payout breakdown against the policy's allocations
//! 2. Logs the payout as a ledger entry
//! 3. Reduces each contributor's deposited capital by what it consumed
//! 4. Releases the allocations as EXERCISED, returning the unconsumed part
//! 5. Records a metrics snapshot

pub mod conservation;
pub mod metrics;
pub mod pool;
pub mod processor;
pub mod reconciliation;
pub mod sweeper;
pub mod telemetry;

pub use conservation::{ConservationChecker, ConservationViolation, ViolationKind};
pub use metrics::MetricsAggregator;
pub use pool::{LiquidityPool, PoolStats};
pub use processor::{SettlementOutcome, SettlementProcessor};
pub use reconciliation::{AllocationDrift, ReconciliationReport, Reconciler, SweepFailure};
pub use sweeper::{SweeperHandle, spawn_sweeper};
pub use telemetry::{LogConfig, LogFormat, init_tracing};
