//! System-wide constants for the HedgePool liquidity engine.

/// Decimal places of the STX token (micro-STX).
pub const STX_DECIMALS: u32 = 6;

/// Decimal places of the sBTC token (satoshis).
pub const SBTC_DECIMALS: u32 = 8;

/// Highest precision any configured token may use.
pub const MAX_TOKEN_DECIMALS: u32 = 18;

/// Default ceiling, in whole tokens, on any single amount a token accepts.
pub const DEFAULT_MAX_AMOUNT: i64 = 1_000_000_000_000_000;

/// Precision of an allocation's percentage of its policy.
pub const PERCENTAGE_PRECISION: u32 = 4;

/// Precision of utilization and yield ratios in metrics snapshots.
pub const RATIO_PRECISION: u32 = 6;

/// Days used to annualize premium yield.
pub const DAYS_PER_YEAR: i64 = 365;

/// Default maximum attempts (first try + retries) for a pending transaction.
pub const DEFAULT_MAX_TRANSACTION_ATTEMPTS: u32 = 3;

/// Default age after which a non-terminal record is surfaced by reconciliation.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 3_600;

/// Default interval between reconciliation sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "HedgePool";
