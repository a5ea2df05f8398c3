use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk engine limits. Percentages are of `total_equity`; counts are
/// absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
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
    /// Local hour (0-23) at which daily counters reset.
    pub daily_reset_hour: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade_pct: Decimal::ONE,
            max_portfolio_risk_pct: Decimal::from(5),
            max_daily_loss_pct: Decimal::from(3),
            max_consecutive_losses: 5,
            min_reward_ratio: Decimal::new(15, 1),
            max_position_size_pct: Decimal::from(5),
            margin_requirement_pct: Decimal::from(10),
            max_open_positions: 3,
            cooldown_after_loss_minutes: 15,
            circuit_breaker_loss_pct: Decimal::from(10),
            daily_reset_hour: 9,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        let pct_fields = [
            ("max_risk_per_trade_pct", self.max_risk_per_trade_pct),
            ("max_portfolio_risk_pct", self.max_portfolio_risk_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_position_size_pct", self.max_position_size_pct),
            ("margin_requirement_pct", self.margin_requirement_pct),
            ("circuit_breaker_loss_pct", self.circuit_breaker_loss_pct),
        ];
        for (name, value) in pct_fields {
            if value <= Decimal::ZERO || value > Decimal::ONE_HUNDRED {
                return Err(format!("{} must be in (0, 100], got {}", name, value));
            }
        }
        if self.min_reward_ratio <= Decimal::ZERO {
            return Err(format!(
                "min_reward_ratio must be positive, got {}",
                self.min_reward_ratio
            ));
        }
        if self.max_open_positions == 0 {
            return Err("max_open_positions must be at least 1".into());
        }
        if self.daily_reset_hour > 23 {
            return Err(format!(
                "daily_reset_hour must be 0-23, got {}",
                self.daily_reset_hour
            ));
        }
        Ok(())
    }

    pub fn pct(value: Decimal) -> Decimal {
        value / Decimal::ONE_HUNDRED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_is_valid() {
        assert!(RiskConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_percentage_rejected() {
        let config = RiskConfig {
            max_daily_loss_pct: dec!(120),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_positions_rejected() {
        let config = RiskConfig {
            max_open_positions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
