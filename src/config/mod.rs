//! Configuration loading.
//!
//! Everything comes from environment variables (with `.env` support in
//! the binaries), organized per concern: core runtime, LLM providers,
//! risk limits, and the gateway. Invalid values fail startup with a
//! one-line diagnostic.

mod gateway_config;
mod provider_config;
mod risk_env_config;

pub use gateway_config::GatewayEnvConfig;
pub use provider_config::providers_from_env;
pub use risk_env_config::RiskEnvConfig;

use crate::domain::calendar::MarketCalendar;
use crate::domain::mode::Mode;
use crate::domain::provider::ProviderDescriptor;
use crate::domain::risk::RiskConfig;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {} ({})", key, raw, e)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

pub(crate) fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub default_mode: Mode,
    pub instrument: String,
    pub timeframe: String,
    pub cycle_interval_secs: u64,
    pub min_trade_confidence: f64,
    pub force_when_closed: bool,
    pub initial_equity: Decimal,
    pub database_url: String,
    pub mode_config_path: String,
    pub redis_url: Option<String>,
    /// UTC offset of the traded market, seconds east.
    pub market_utc_offset_secs: i32,
    pub calendar: MarketCalendar,
    pub providers: Vec<ProviderDescriptor>,
    pub risk: RiskConfig,
    pub gateway: GatewayEnvConfig,
    pub alert_webhook_url: Option<String>,
    pub usage_rollover_hour: u32,
    pub sim_seed: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let default_mode = match env_opt("TRADING_MODE") {
            Some(raw) => Mode::from_str(&raw)
                .with_context(|| format!("Invalid TRADING_MODE: {}", raw))?,
            None => Mode::SimClosed,
        };

        let calendar = match env_opt("MARKET_CALENDAR").as_deref() {
            None | Some("nse") => MarketCalendar::nse(),
            Some("always_open") | Some("crypto") => MarketCalendar::AlwaysOpen,
            Some(other) => {
                anyhow::bail!(
                    "Invalid MARKET_CALENDAR: {}. Must be 'nse' or 'always_open'",
                    other
                )
            }
        };

        let risk = RiskEnvConfig::from_env()?.into_risk_config();
        risk.validate().map_err(anyhow::Error::msg)?;

        Ok(Self {
            default_mode,
            instrument: env_or("INSTRUMENT", "NIFTY".to_string())?,
            timeframe: env_or("TIMEFRAME", "15m".to_string())?,
            cycle_interval_secs: env_or("CYCLE_INTERVAL_SECS", 900u64)?,
            min_trade_confidence: env_or("MIN_TRADE_CONFIDENCE", 0.6f64)?,
            force_when_closed: env_flag("FORCE_WHEN_CLOSED", false),
            initial_equity: env_or("INITIAL_EQUITY", Decimal::from(100_000))?,
            database_url: env_or(
                "DATABASE_URL",
                "sqlite://data/tradecouncil.db".to_string(),
            )?,
            mode_config_path: env_or("MODE_CONFIG_PATH", ".mode_config.json".to_string())?,
            redis_url: env_opt("REDIS_URL"),
            market_utc_offset_secs: env_or("MARKET_UTC_OFFSET_SECS", 5 * 3600 + 30 * 60)?,
            calendar,
            providers: providers_from_env(),
            risk,
            gateway: GatewayEnvConfig::from_env()?,
            alert_webhook_url: env_opt("ALERT_WEBHOOK_URL"),
            usage_rollover_hour: env_or("USAGE_ROLLOVER_HOUR", 9u32)?,
            sim_seed: env_or("SIM_SEED", 7u64)?,
        })
    }
}
