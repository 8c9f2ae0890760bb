//! Runtime settings.
//!
//! Defaults are built in and can be overridden by an optional `p2p.toml`
//! file and by environment variables prefixed with `P2P_` (nested fields
//! separated using `__`), e.g. `P2P_MARKET__RESERVE_FACTOR=1500`.
//!
//! Annual rates are decimal strings (`"0.05"` for 5% APR) and are converted
//! to per-second ray rates with [`PoolSettings::rates`].

use primitive_types::U256;
use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::interest::PoolRates;
use crate::market::MarketConfig;
use crate::math::decimal::to_ray;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
/// Top-level settings.
pub struct Settings {
    pub market: MarketSettings,
    pub pool: PoolSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
/// Default parameters of newly created markets.
pub struct MarketSettings {
    pub reserve_factor: u64,
    pub p2p_index_cursor: u64,
    pub max_sorted_users: usize,
    pub default_repay_iterations: u32,
    pub default_withdraw_iterations: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
/// Rates of the in-memory fixed-rate pool used by the demo binary.
pub struct PoolSettings {
    pub supply_apr: String,
    pub borrow_apr: String,
}

impl Settings {
    /// Load settings from defaults, `p2p.toml` (optional), and environment.
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        Self::builder()?
            .add_source(config::File::with_name("p2p").required(false))
            .add_source(
                config::Environment::with_prefix("P2P")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Built-in defaults only.
    pub fn defaults() -> std::result::Result<Self, config::ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    fn builder() -> std::result::Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let market = MarketConfig::default();
        config::Config::builder()
            .set_default("market.reserve_factor", market.reserve_factor)?
            .set_default("market.p2p_index_cursor", market.p2p_index_cursor)?
            .set_default("market.max_sorted_users", market.max_sorted_users as u64)?
            .set_default("market.default_repay_iterations", market.default_repay_iterations)?
            .set_default("market.default_withdraw_iterations", market.default_withdraw_iterations)?
            .set_default("pool.supply_apr", "0.02")?
            .set_default("pool.borrow_apr", "0.05")
    }
}

impl MarketSettings {
    /// Validated market parameters.
    pub fn market_config(&self) -> Result<MarketConfig> {
        let config = MarketConfig {
            reserve_factor: self.reserve_factor,
            p2p_index_cursor: self.p2p_index_cursor,
            max_sorted_users: self.max_sorted_users,
            default_repay_iterations: self.default_repay_iterations,
            default_withdraw_iterations: self.default_withdraw_iterations,
        };
        config.validate()?;
        Ok(config)
    }
}

impl PoolSettings {
    /// Per-second ray rates.
    pub fn rates(&self) -> Result<PoolRates> {
        Ok(PoolRates::from_annual(parse_rate(&self.supply_apr)?, parse_rate(&self.borrow_apr)?))
    }
}

fn parse_rate(value: &str) -> Result<U256> {
    to_ray(value).ok_or_else(|| CoreError::Serialization(format!("invalid rate {value:?}")))
}
