//! Pre-trade risk assessment and portfolio-level guardrails.
//!
//! The engine holds a shared handle into the portfolio state owned by
//! the position manager; it never calls back into the manager. Position
//! sizing flows from per-trade risk and stop distance, then clamps by
//! position-size and margin limits.

use crate::application::alerts::AlertRouter;
use crate::application::clock::SharedClock;
use crate::domain::alert::AlertSeverity;
use crate::domain::risk::{RiskAssessment, RiskConfig, RiskLevel};
use crate::domain::signal::TradeSignal;
use crate::domain::trading::PortfolioState;
use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

pub struct RiskEngine {
    config: RiskConfig,
    portfolio: Arc<RwLock<PortfolioState>>,
    clock: Arc<SharedClock>,
    alerts: Arc<AlertRouter>,
    utc_offset_secs: i32,
}

impl RiskEngine {
    pub fn new(
        config: RiskConfig,
        portfolio: Arc<RwLock<PortfolioState>>,
        clock: Arc<SharedClock>,
        alerts: Arc<AlertRouter>,
        utc_offset_secs: i32,
    ) -> Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(Self {
            config,
            portfolio,
            clock,
            alerts,
            utc_offset_secs,
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Full pre-trade assessment per the configured limits.
    pub async fn assess(&self, signal: &TradeSignal) -> RiskAssessment {
        let now = self.clock.now().await;
        let portfolio = self.portfolio.read().await;

        if portfolio.emergency_stop {
            return RiskAssessment::rejected(RiskLevel::Critical, "emergency stop active");
        }

        if let Err(e) = signal.validate() {
            return RiskAssessment::rejected(RiskLevel::High, e.to_string());
        }

        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();
        let equity = portfolio.total_equity;

        let max_daily_loss = equity * RiskConfig::pct(self.config.max_daily_loss_pct);
        if portfolio.daily_pnl.abs() >= max_daily_loss {
            warnings.push(format!(
                "Daily loss limit exceeded: {} >= {}",
                portfolio.daily_pnl.abs(),
                max_daily_loss
            ));
        }

        if portfolio.consecutive_losses >= self.config.max_consecutive_losses {
            warnings.push(format!(
                "Too many consecutive losses: {}",
                portfolio.consecutive_losses
            ));
        }

        if portfolio.consecutive_losses > 0
            && let Some(last_trade) = portfolio.last_trade_at
        {
            let cooldown_end =
                last_trade + Duration::minutes(self.config.cooldown_after_loss_minutes);
            if now < cooldown_end {
                warnings.push(format!(
                    "In cooldown after loss until {}",
                    cooldown_end.to_rfc3339()
                ));
            }
        }

        if portfolio.open_position_count() >= self.config.max_open_positions {
            warnings.push(format!(
                "Open position limit reached ({})",
                self.config.max_open_positions
            ));
        }

        let max_portfolio_risk = equity * RiskConfig::pct(self.config.max_portfolio_risk_pct);
        if portfolio.total_risk_exposure >= max_portfolio_risk {
            warnings.push(format!(
                "Portfolio risk limit exceeded: {} >= {}",
                portfolio.total_risk_exposure, max_portfolio_risk
            ));
        }

        // Position sizing from per-trade risk and stop distance.
        let max_risk_amount = equity * RiskConfig::pct(self.config.max_risk_per_trade_pct);
        let stop_distance = signal.stop_distance();
        let entry = signal.entry_price;

        let mut position_value = if stop_distance.is_zero() {
            Decimal::ZERO
        } else {
            max_risk_amount * entry / stop_distance
        };
        position_value =
            position_value.min(equity * RiskConfig::pct(self.config.max_position_size_pct));

        let margin_rate = RiskConfig::pct(self.config.margin_requirement_pct);
        if !margin_rate.is_zero() {
            let affordable = portfolio.available_cash / margin_rate;
            if position_value > affordable {
                position_value = affordable;
                recommendations
                    .push("position reduced to fit available margin capacity".to_string());
            }
        }

        let quantity = (position_value / entry).floor().to_u32().unwrap_or(0);
        if quantity == 0 {
            warnings.push("Position size calculation resulted in zero".to_string());
        }
        let risk_amount = stop_distance * Decimal::from(quantity);
        let risk_pct = if equity.is_zero() {
            Decimal::ZERO
        } else {
            risk_amount / equity * Decimal::ONE_HUNDRED
        };

        let reward_ratio = if stop_distance.is_zero() {
            Decimal::ZERO
        } else {
            signal.reward_distance() / stop_distance
        };
        if reward_ratio < self.config.min_reward_ratio {
            warnings.push(format!(
                "Reward ratio {:.2} below minimum {:.2}",
                reward_ratio, self.config.min_reward_ratio
            ));
            recommendations.push("widen the target or tighten the stop".to_string());
        }

        let risk_pct_f = risk_pct.to_f64().unwrap_or(0.0);
        let win_probability = estimate_win_probability(signal.confidence, risk_pct_f);
        let reward_ratio_f = reward_ratio.to_f64().unwrap_or(0.0);
        let expected_value = expected_value(risk_amount, reward_ratio_f, win_probability);

        let risk_score = risk_score(risk_pct_f, reward_ratio_f, win_probability);
        let risk_level = RiskLevel::from_score(risk_score);

        let can_trade = warnings.is_empty();
        RiskAssessment {
            can_trade,
            risk_level,
            risk_score,
            warnings,
            recommendations,
            position_size: if can_trade { quantity } else { 0 },
            risk_amount,
            risk_pct,
            reward_ratio,
            win_probability,
            expected_value,
            max_risk_amount,
        }
    }

    /// Book a realized trade result and trip the circuit breaker when
    /// the daily loss crosses the configured share of equity.
    pub async fn update_on_trade_result(&self, pnl: Decimal) {
        let now = self.clock.now().await;
        let tripped = {
            let mut portfolio = self.portfolio.write().await;
            portfolio.record_trade_result(pnl, now);

            let threshold =
                portfolio.total_equity * RiskConfig::pct(self.config.circuit_breaker_loss_pct);
            if !portfolio.emergency_stop && portfolio.daily_pnl.abs() >= threshold {
                portfolio.emergency_stop = true;
                let daily_pnl_abs = portfolio.daily_pnl.abs();
                portfolio.emergency_reasons.push(format!(
                    "circuit breaker: daily loss {} breached limit {}",
                    daily_pnl_abs, threshold
                ));
                Some((portfolio.daily_pnl, threshold))
            } else {
                None
            }
        };

        if let Some((daily_pnl, threshold)) = tripped {
            error!(
                "EMERGENCY STOP: daily P&L {} breached circuit breaker {}",
                daily_pnl, threshold
            );
            self.alerts
                .route(
                    "circuit_breaker_tripped",
                    "Daily loss breached the circuit breaker; trading halted",
                    AlertSeverity::Critical,
                    json!({ "daily_pnl": daily_pnl.to_f64(), "threshold": threshold.to_f64() }),
                    "risk_engine",
                )
                .await;
        }
    }

    /// Accounting day for the daily reset, rolling at the configured
    /// local hour.
    pub fn reset_date(&self, at: DateTime<Utc>) -> NaiveDate {
        let offset = FixedOffset::east_opt(self.utc_offset_secs)
            .unwrap_or(FixedOffset::east_opt(0).unwrap());
        let local = at.with_timezone(&offset);
        (local - Duration::hours(self.config.daily_reset_hour as i64)).date_naive()
    }

    /// Zero daily counters; clears an emergency stop only when it was
    /// triggered by the daily loss limit alone.
    pub async fn daily_reset(&self) {
        let mut portfolio = self.portfolio.write().await;
        let was_stopped = portfolio.emergency_stop;
        portfolio.daily_reset();
        info!(
            "Daily risk reset complete{}",
            if was_stopped && !portfolio.emergency_stop {
                " (emergency stop cleared)"
            } else {
                ""
            }
        );
    }
}

fn estimate_win_probability(confidence: f64, risk_pct: f64) -> f64 {
    let mut probability = confidence;
    if risk_pct > 2.0 {
        probability *= 0.9;
    } else if risk_pct < 0.5 {
        probability *= 1.1;
    }
    probability.clamp(0.1, 0.9)
}

fn expected_value(risk_amount: Decimal, reward_ratio: f64, win_probability: f64) -> Decimal {
    let risk = risk_amount.to_f64().unwrap_or(0.0);
    let value = win_probability * risk * reward_ratio - (1.0 - win_probability) * risk;
    Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
}

fn risk_score(risk_pct: f64, reward_ratio: f64, win_probability: f64) -> u8 {
    let mut score = 0u8;
    if risk_pct > 2.0 {
        score += 3;
    } else if risk_pct > 1.0 {
        score += 2;
    } else if risk_pct > 0.5 {
        score += 1;
    }
    if reward_ratio < 1.5 {
        score += 2;
    } else if reward_ratio < 2.0 {
        score += 1;
    }
    if win_probability < 0.4 {
        score += 3;
    } else if win_probability < 0.5 {
        score += 2;
    } else if win_probability < 0.6 {
        score += 1;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::Side;
    use rust_decimal_macros::dec;

    fn engine_with_equity(equity: Decimal) -> (RiskEngine, Arc<RwLock<PortfolioState>>) {
        let portfolio = Arc::new(RwLock::new(PortfolioState::with_equity(equity)));
        let clock = Arc::new(SharedClock::new());
        let alerts = Arc::new(AlertRouter::new(clock.clone()));
        let engine = RiskEngine::new(
            RiskConfig::default(),
            portfolio.clone(),
            clock,
            alerts,
            5 * 3600 + 30 * 60,
        )
        .unwrap();
        (engine, portfolio)
    }

    fn buy_signal() -> TradeSignal {
        TradeSignal {
            instrument: "NIFTY".into(),
            side: Side::Buy,
            entry_price: dec!(100),
            stop_loss: dec!(98),
            take_profit: dec!(105),
            confidence: 0.8,
        }
    }

    #[tokio::test]
    async fn sizes_from_risk_and_stop_distance() {
        let (engine, _) = engine_with_equity(dec!(100000));
        let assessment = engine.assess(&buy_signal()).await;
        assert!(assessment.can_trade, "warnings: {:?}", assessment.warnings);
        // 1% risk = 1000; position value = 1000 * 100 / 2 = 50000,
        // clamped to 5% of equity = 5000 -> 50 units.
        assert_eq!(assessment.position_size, 50);
        assert_eq!(assessment.risk_amount, dec!(100));
        assert_eq!(assessment.reward_ratio, dec!(2.5));
    }

    #[tokio::test]
    async fn emergency_stop_blocks_everything() {
        let (engine, portfolio) = engine_with_equity(dec!(100000));
        portfolio.write().await.emergency_stop = true;
        let assessment = engine.assess(&buy_signal()).await;
        assert!(!assessment.can_trade);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert_eq!(assessment.position_size, 0);
    }

    #[tokio::test]
    async fn poor_reward_ratio_warns() {
        let (engine, _) = engine_with_equity(dec!(100000));
        let mut signal = buy_signal();
        signal.take_profit = dec!(101);
        let assessment = engine.assess(&signal).await;
        assert!(!assessment.can_trade);
        assert!(
            assessment
                .warnings
                .iter()
                .any(|w| w.contains("Reward ratio"))
        );
    }

    #[tokio::test]
    async fn circuit_breaker_trips_and_daily_reset_clears() {
        let (engine, portfolio) = engine_with_equity(dec!(100000));
        engine.update_on_trade_result(dec!(-10100)).await;
        assert!(portfolio.read().await.emergency_stop);

        let assessment = engine.assess(&buy_signal()).await;
        assert!(!assessment.can_trade);

        engine.daily_reset().await;
        let state = portfolio.read().await;
        assert!(!state.emergency_stop);
        assert_eq!(state.daily_pnl, Decimal::ZERO);
        assert_eq!(state.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn consecutive_loss_limit_blocks() {
        let (engine, portfolio) = engine_with_equity(dec!(100000));
        {
            let mut state = portfolio.write().await;
            state.consecutive_losses = 5;
            // Old enough that the cooldown window has passed.
            state.last_trade_at = Some(Utc::now() - Duration::hours(2));
        }
        let assessment = engine.assess(&buy_signal()).await;
        assert!(!assessment.can_trade);
        assert!(
            assessment
                .warnings
                .iter()
                .any(|w| w.contains("consecutive losses"))
        );
    }
}
