use crate::domain::signal::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    Closed,
    Pending,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    Decision,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::Manual => "MANUAL",
            CloseReason::Decision => "DECISION",
        };
        write!(f, "{}", name)
    }
}

/// An open market position. Created by `PositionManager::open`, mutated
/// by price updates, closed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub instrument: String,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: PositionStatus,
    pub entry_at: DateTime<Utc>,
    pub exit_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub commission: Decimal,
    pub tags: Vec<String>,
}

impl Position {
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    pub fn quantity_dec(&self) -> Decimal {
        Decimal::from(self.quantity)
    }

    /// Mark-to-market P&L while the position is active; zero otherwise.
    pub fn unrealized_pnl(&self) -> Decimal {
        if !self.is_active() {
            return Decimal::ZERO;
        }
        match self.side {
            Side::Buy => (self.current_price - self.entry_price) * self.quantity_dec(),
            Side::Sell => (self.entry_price - self.current_price) * self.quantity_dec(),
        }
    }

    /// Realized P&L once closed.
    pub fn realized_pnl(&self) -> Option<Decimal> {
        let exit = self.exit_price?;
        Some(match self.side {
            Side::Buy => (exit - self.entry_price) * self.quantity_dec(),
            Side::Sell => (self.entry_price - exit) * self.quantity_dec(),
        })
    }

    pub fn market_value(&self) -> Decimal {
        self.current_price * self.quantity_dec()
    }

    /// Capital at risk between entry and stop. Zero without a stop.
    pub fn risk_amount(&self) -> Decimal {
        let Some(stop) = self.stop_loss else {
            return Decimal::ZERO;
        };
        match self.side {
            Side::Buy => (self.entry_price - stop) * self.quantity_dec(),
            Side::Sell => (stop - self.entry_price) * self.quantity_dec(),
        }
    }

    /// Whether `price` breaches the stop for this side.
    pub fn stop_hit(&self, price: Decimal) -> bool {
        match (self.side, self.stop_loss) {
            (Side::Buy, Some(stop)) => price <= stop,
            (Side::Sell, Some(stop)) => price >= stop,
            _ => false,
        }
    }

    /// Whether `price` reaches the target for this side.
    pub fn target_hit(&self, price: Decimal) -> bool {
        match (self.side, self.take_profit) {
            (Side::Buy, Some(target)) => price >= target,
            (Side::Sell, Some(target)) => price <= target,
            _ => false,
        }
    }

    /// Apply a price update and report a triggered exit, if any. The
    /// position itself is not closed here; the manager realizes the exit
    /// so portfolio totals reconcile in one place. Stop wins over target
    /// when both trigger on the same print.
    pub fn apply_price(&mut self, price: Decimal) -> Option<CloseReason> {
        if !self.is_active() {
            return None;
        }
        self.current_price = price;
        if self.stop_hit(price) {
            Some(CloseReason::StopLoss)
        } else if self.target_hit(price) {
            Some(CloseReason::TakeProfit)
        } else {
            None
        }
    }

    /// Close exactly once.
    pub fn close(&mut self, exit_price: Decimal, at: DateTime<Utc>, reason: CloseReason) {
        debug_assert!(self.is_active(), "position {} closed twice", self.id);
        self.current_price = exit_price;
        self.exit_price = Some(exit_price);
        self.exit_at = Some(at);
        self.status = PositionStatus::Closed;
        self.tags.push(format!("exit_reason:{}", reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position {
            id: "pos-1".into(),
            instrument: "NIFTY".into(),
            side: Side::Buy,
            quantity: 10,
            entry_price: dec!(100),
            current_price: dec!(100),
            stop_loss: Some(dec!(98)),
            take_profit: Some(dec!(105)),
            status: PositionStatus::Active,
            entry_at: Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
            exit_at: None,
            exit_price: None,
            commission: Decimal::ZERO,
            tags: vec![],
        }
    }

    #[test]
    fn unrealized_pnl_tracks_price() {
        let mut position = long_position();
        assert!(position.apply_price(dec!(102)).is_none());
        assert_eq!(position.unrealized_pnl(), dec!(20));
    }

    #[test]
    fn stop_triggers_below_threshold() {
        let mut position = long_position();
        assert_eq!(position.apply_price(dec!(97.5)), Some(CloseReason::StopLoss));
    }

    #[test]
    fn target_triggers_for_short() {
        let mut position = long_position();
        position.side = Side::Sell;
        position.stop_loss = Some(dec!(102));
        position.take_profit = Some(dec!(95));
        assert_eq!(
            position.apply_price(dec!(94.8)),
            Some(CloseReason::TakeProfit)
        );
    }

    #[test]
    fn close_realizes_pnl_and_sets_exit() {
        let mut position = long_position();
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 11, 0, 0).unwrap();
        position.close(dec!(97.5), at, CloseReason::StopLoss);
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.realized_pnl(), Some(dec!(-25)));
        assert_eq!(position.exit_at, Some(at));
        assert!(position.tags.iter().any(|t| t == "exit_reason:STOP_LOSS"));
        assert_eq!(position.unrealized_pnl(), Decimal::ZERO);
    }

    #[test]
    fn closed_position_ignores_prices() {
        let mut position = long_position();
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 11, 0, 0).unwrap();
        position.close(dec!(101), at, CloseReason::Manual);
        assert!(position.apply_price(dec!(90)).is_none());
        assert_eq!(position.current_price, dec!(101));
    }
}
