//! Risk limits from the environment, defaulting to the engine's
//! conservative baseline.

use crate::config::env_or;
use crate::domain::risk::RiskConfig;
use anyhow::Result;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub max_risk_per_trade_pct: Decimal,
    pub max_portfolio_risk_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_consecutive_losses: u32,
    pub min_reward_ratio: Decimal,
    pub max_position_size_pct: Decimal,
    pub margin_requirement_pct: Decimal,
    pub max_open_positions: usize,
    pub cooldown_after_loss_minutes: i64,
    pub circuit_breaker_loss_pct: Decimal,
    pub daily_reset_hour: u32,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = RiskConfig::default();
        Ok(Self {
            max_risk_per_trade_pct: env_or(
                "RISK_MAX_PER_TRADE_PCT",
                defaults.max_risk_per_trade_pct,
            )?,
            max_portfolio_risk_pct: env_or(
                "RISK_MAX_PORTFOLIO_PCT",
                defaults.max_portfolio_risk_pct,
            )?,
            max_daily_loss_pct: env_or("RISK_MAX_DAILY_LOSS_PCT", defaults.max_daily_loss_pct)?,
            max_consecutive_losses: env_or(
                "RISK_MAX_CONSECUTIVE_LOSSES",
                defaults.max_consecutive_losses,
            )?,
            min_reward_ratio: env_or("RISK_MIN_REWARD_RATIO", defaults.min_reward_ratio)?,
            max_position_size_pct: env_or(
                "RISK_MAX_POSITION_SIZE_PCT",
                defaults.max_position_size_pct,
            )?,
            margin_requirement_pct: env_or(
                "RISK_MARGIN_REQUIREMENT_PCT",
                defaults.margin_requirement_pct,
            )?,
            max_open_positions: env_or("RISK_MAX_OPEN_POSITIONS", defaults.max_open_positions)?,
            cooldown_after_loss_minutes: env_or(
                "RISK_COOLDOWN_AFTER_LOSS_MIN",
                defaults.cooldown_after_loss_minutes,
            )?,
            circuit_breaker_loss_pct: env_or(
                "RISK_CIRCUIT_BREAKER_LOSS_PCT",
                defaults.circuit_breaker_loss_pct,
            )?,
            daily_reset_hour: env_or("RISK_DAILY_RESET_HOUR", defaults.daily_reset_hour)?,
        })
    }

    pub fn into_risk_config(self) -> RiskConfig {
        RiskConfig {
            max_risk_per_trade_pct: self.max_risk_per_trade_pct,
            max_portfolio_risk_pct: self.max_portfolio_risk_pct,
            max_daily_loss_pct: self.max_daily_loss_pct,
            max_consecutive_losses: self.max_consecutive_losses,
            min_reward_ratio: self.min_reward_ratio,
            max_position_size_pct: self.max_position_size_pct,
            margin_requirement_pct: self.margin_requirement_pct,
            max_open_positions: self.max_open_positions,
            cooldown_after_loss_minutes: self.cooldown_after_loss_minutes,
            circuit_breaker_loss_pct: self.circuit_breaker_loss_pct,
            daily_reset_hour: self.daily_reset_hour,
        }
    }
}
