//! Configuration types for a HedgePool deployment.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PoolError, Result, constants};

/// Top-level pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Tokens the pool accepts.
    pub tokens: Vec<TokenConfig>,
    /// Maximum attempts (first try + retries) for a pending transaction.
    #[serde(default = "default_max_attempts")]
    pub max_transaction_attempts: u32,
    /// Age after which non-terminal records are surfaced by reconciliation.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Interval between background reconciliation sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Append a metrics snapshot after every ledger-affecting event.
    #[serde(default = "default_true")]
    pub record_metrics_on_events: bool,
}

fn default_max_attempts() -> u32 {
    constants::DEFAULT_MAX_TRANSACTION_ATTEMPTS
}

fn default_stale_after() -> u64 {
    constants::DEFAULT_STALE_AFTER_SECS
}

fn default_sweep_interval() -> u64 {
    constants::DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tokens: vec![TokenConfig::stx(), TokenConfig::sbtc()],
            max_transaction_attempts: default_max_attempts(),
            stale_after_secs: default_stale_after(),
            sweep_interval_secs: default_sweep_interval(),
            record_metrics_on_events: true,
        }
    }
}

impl PoolConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PoolError::Configuration(format!("invalid pool config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tokens.is_empty() {
            return Err(PoolError::Configuration("no tokens configured".into()));
        }
        if self.max_transaction_attempts == 0 {
            return Err(PoolError::Configuration(
                "max_transaction_attempts must be at least 1".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(PoolError::Configuration(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for token in &self.tokens {
            if !seen.insert(token.symbol.as_str()) {
                return Err(PoolError::Configuration(format!(
                    "token {} configured twice",
                    token.symbol
                )));
            }
            token.validate()?;
        }
        Ok(())
    }

    /// Look up a token's configuration.
    ///
    /// # Errors
    /// Returns `UnsupportedToken` if the token is not configured.
    pub fn token(&self, symbol: &str) -> Result<&TokenConfig> {
        self.tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .ok_or_else(|| PoolError::UnsupportedToken(symbol.to_string()))
    }

    #[must_use]
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX))
    }
}

/// Per-token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token symbol (e.g., "STX").
    pub symbol: String,
    /// Smallest representable unit, as decimal places.
    pub decimals: u32,
    pub min_deposit: Decimal,
    pub min_withdrawal: Decimal,
    /// Providers need strictly more available balance than this to be
    /// eligible for new allocations.
    pub min_provider_balance: Decimal,
    /// Largest single deposit, withdrawal, policy requirement or premium.
    #[serde(default = "default_max_amount")]
    pub max_amount: Decimal,
}

fn default_max_amount() -> Decimal {
    Decimal::from(constants::DEFAULT_MAX_AMOUNT)
}

impl TokenConfig {
    /// Default STX token config.
    #[must_use]
    pub fn stx() -> Self {
        Self {
            symbol: "STX".to_string(),
            decimals: constants::STX_DECIMALS,
            min_deposit: Decimal::ONE,  // 1 STX
            min_withdrawal: Decimal::ONE,
            min_provider_balance: Decimal::ZERO,
            max_amount: default_max_amount(),
        }
    }

    /// Default sBTC token config.
    #[must_use]
    pub fn sbtc() -> Self {
        Self {
            symbol: "sBTC".to_string(),
            decimals: constants::SBTC_DECIMALS,
            min_deposit: Decimal::new(1, 4),     // 0.0001 sBTC
            min_withdrawal: Decimal::new(1, 4),
            min_provider_balance: Decimal::ZERO,
            max_amount: default_max_amount(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(PoolError::Configuration("token symbol is empty".into()));
        }
        if self.decimals > constants::MAX_TOKEN_DECIMALS {
            return Err(PoolError::Configuration(format!(
                "token {} has {} decimals, max {}",
                self.symbol,
                self.decimals,
                constants::MAX_TOKEN_DECIMALS
            )));
        }
        for (name, value) in [
            ("min_deposit", self.min_deposit),
            ("min_withdrawal", self.min_withdrawal),
            ("min_provider_balance", self.min_provider_balance),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(PoolError::Configuration(format!(
                    "token {} {name} is negative",
                    self.symbol
                )));
            }
        }
        if self.max_amount <= Decimal::ZERO || self.max_amount < self.min_deposit {
            return Err(PoolError::Configuration(format!(
                "token {} max_amount {} is below its minimums",
                self.symbol, self.max_amount
            )));
        }
        Ok(())
    }

    /// Check that `amount` is positive, at most `max_amount`, and
    /// representable at this token's precision.
    ///
    /// # Errors
    /// Returns `InvalidAmount` otherwise.
    pub fn check_amount(&self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(PoolError::InvalidAmount {
                amount,
                reason: "must be positive".into(),
            });
        }
        if amount > self.max_amount {
            return Err(PoolError::InvalidAmount {
                amount,
                reason: format!("{} accepts at most {}", self.symbol, self.max_amount),
            });
        }
        if amount.normalize().scale() > self.decimals {
            return Err(PoolError::InvalidAmount {
                amount,
                reason: format!("{} supports {} decimals", self.symbol, self.decimals),
            });
        }
        Ok(())
    }
}
