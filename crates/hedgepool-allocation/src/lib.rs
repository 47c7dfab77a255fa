//! # hedgepool-allocation
//!
//! **Allocation plane**: funds policies with provider collateral, pays out
//! their premiums, and releases the collateral when they resolve.
//!
//! ## Policy Flow
//!
//! ```text
//! plan_allocation (pure) → AllocationEngine::apply (lock + record batch)
//!     → PremiumDistributor::distribute (credit earned, once per allocation)
//!     → CollateralRelease::release (ACTIVE → EXPIRED | EXERCISED | CANCELLED)
//! ```
//!
//! Every multi-record effect claims a marker on the allocation record
//! before touching a balance, so repeated or concurrent calls apply each
//! effect at most once.

pub mod engine;
pub mod planner;
pub mod premium;
pub mod release;

pub use engine::AllocationEngine;
pub use planner::{AllocationPlan, PlannedShare, plan_allocation};
pub use premium::{PremiumDistribution, PremiumDistributor};
pub use release::{CollateralRelease, ReleaseOutcome};
