use crate::domain::trading::position::Position;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate of open positions and account totals. Owned by the
/// position manager; the risk engine holds a shared read/update handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub total_equity: Decimal,
    pub available_cash: Decimal,
    pub margin_used: Decimal,
    pub positions: HashMap<String, Position>,
    pub total_risk_exposure: Decimal,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub max_daily_loss: Decimal,
    pub consecutive_losses: u32,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub emergency_stop: bool,
    pub emergency_reasons: Vec<String>,
}

impl PortfolioState {
    pub fn with_equity(initial_equity: Decimal) -> Self {
        Self {
            total_equity: initial_equity,
            available_cash: initial_equity,
            margin_used: Decimal::ZERO,
            positions: HashMap::new(),
            total_risk_exposure: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            max_daily_loss: Decimal::ZERO,
            consecutive_losses: 0,
            last_trade_at: None,
            emergency_stop: false,
            emergency_reasons: Vec::new(),
        }
    }

    pub fn active_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_active())
    }

    pub fn open_position_count(&self) -> usize {
        self.active_positions().count()
    }

    pub fn positions_for(&self, instrument: &str) -> Vec<String> {
        self.positions
            .values()
            .filter(|p| p.is_active() && p.instrument == instrument)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn total_unrealized_pnl(&self) -> Decimal {
        self.active_positions().map(|p| p.unrealized_pnl()).sum()
    }

    /// Cash plus the market value of open positions.
    pub fn portfolio_value(&self) -> Decimal {
        let positions_value: Decimal = self.active_positions().map(|p| p.market_value()).sum();
        self.available_cash + positions_value
    }

    pub fn daily_pnl_pct(&self) -> Decimal {
        if self.total_equity.is_zero() {
            return Decimal::ZERO;
        }
        self.daily_pnl / self.total_equity * Decimal::ONE_HUNDRED
    }

    /// Book a realized trade result into the daily/total aggregates.
    pub fn record_trade_result(&mut self, pnl: Decimal, at: DateTime<Utc>) {
        self.daily_pnl += pnl;
        self.total_pnl += pnl;
        self.total_equity += pnl;
        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
            if pnl < self.max_daily_loss {
                self.max_daily_loss = pnl;
            }
        } else {
            self.consecutive_losses = 0;
        }
        self.last_trade_at = Some(at);
    }

    /// Zero the daily aggregates. Clears the emergency stop only when
    /// every recorded reason was the daily loss limit.
    pub fn daily_reset(&mut self) {
        self.daily_pnl = Decimal::ZERO;
        self.max_daily_loss = Decimal::ZERO;
        self.consecutive_losses = 0;
        if self.emergency_stop
            && !self.emergency_reasons.is_empty()
            && self
                .emergency_reasons
                .iter()
                .all(|r| r.contains("daily loss"))
        {
            self.emergency_stop = false;
            self.emergency_reasons.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn losses_accumulate_and_wins_reset_streak() {
        let mut portfolio = PortfolioState::with_equity(dec!(100000));
        portfolio.record_trade_result(dec!(-100), now());
        portfolio.record_trade_result(dec!(-50), now());
        assert_eq!(portfolio.consecutive_losses, 2);
        assert_eq!(portfolio.daily_pnl, dec!(-150));
        assert_eq!(portfolio.total_equity, dec!(99850));

        portfolio.record_trade_result(dec!(200), now());
        assert_eq!(portfolio.consecutive_losses, 0);
        assert_eq!(portfolio.daily_pnl, dec!(50));
    }

    #[test]
    fn daily_reset_clears_daily_loss_stop_only() {
        let mut portfolio = PortfolioState::with_equity(dec!(100000));
        portfolio.emergency_stop = true;
        portfolio.emergency_reasons.push("daily loss limit".into());
        portfolio.daily_reset();
        assert!(!portfolio.emergency_stop);

        portfolio.emergency_stop = true;
        portfolio.emergency_reasons.push("manual halt".into());
        portfolio.daily_reset();
        assert!(portfolio.emergency_stop);
    }
}
