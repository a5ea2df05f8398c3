//! Position lifecycle and portfolio bookkeeping.
//!
//! Owns the `PortfolioState`; every mutation happens behind its lock.
//! Opens are risk-gated through the `RiskEngine`, price updates enforce
//! the stop/target auto-close invariant, and every realized trade is
//! persisted through the mode-scoped `TradeStore`.

use crate::application::alerts::AlertRouter;
use crate::application::clock::SharedClock;
use crate::application::mode_controller::ModeScopedStores;
use crate::application::risk::RiskEngine;
use crate::domain::alert::AlertSeverity;
use crate::domain::errors::TradingError;
use crate::domain::ports::OrderExecutor;
use crate::domain::repositories::TradeRecord;
use crate::domain::signal::{Side, TradeSignal};
use crate::domain::trading::{CloseReason, PortfolioState, Position, PositionStatus};
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct PositionManagerConfig {
    pub max_positions: usize,
    pub max_risk_per_trade_pct: Decimal,
    pub max_total_risk_pct: Decimal,
    /// Minimum decision confidence before a trade is attempted.
    pub min_confidence: f64,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            max_risk_per_trade_pct: Decimal::ONE,
            max_total_risk_pct: Decimal::from(5),
            min_confidence: 0.6,
        }
    }
}

pub struct PositionManager {
    portfolio: Arc<RwLock<PortfolioState>>,
    risk_engine: Option<Arc<RiskEngine>>,
    executor: Option<Arc<dyn OrderExecutor>>,
    stores: Arc<ModeScopedStores>,
    alerts: Arc<AlertRouter>,
    clock: Arc<SharedClock>,
    config: PositionManagerConfig,
    position_counter: AtomicU64,
}

impl PositionManager {
    pub fn new(
        portfolio: Arc<RwLock<PortfolioState>>,
        risk_engine: Option<Arc<RiskEngine>>,
        stores: Arc<ModeScopedStores>,
        alerts: Arc<AlertRouter>,
        clock: Arc<SharedClock>,
        config: PositionManagerConfig,
    ) -> Self {
        Self {
            portfolio,
            risk_engine,
            executor: None,
            stores,
            alerts,
            clock,
            config,
            position_counter: AtomicU64::new(0),
        }
    }

    /// Route decision-driven opens through a venue executor. Without
    /// one, fills are booked on paper only.
    pub fn with_executor(mut self, executor: Arc<dyn OrderExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn portfolio(&self) -> Arc<RwLock<PortfolioState>> {
        self.portfolio.clone()
    }

    /// Open a position. Returns the rejection reason instead of a
    /// position when a risk or cash guard fails.
    #[instrument(skip(self), fields(instrument = %instrument, side = %side))]
    pub async fn open(
        &self,
        instrument: &str,
        side: Side,
        mut quantity: u32,
        entry_price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        confidence: f64,
        tags: Vec<String>,
    ) -> Result<Position, TradingError> {
        let now = self.clock.now().await;

        if let Some(engine) = &self.risk_engine {
            let signal = TradeSignal {
                instrument: instrument.to_string(),
                side,
                entry_price,
                stop_loss: stop_loss.unwrap_or_else(|| default_stop(side, entry_price)),
                take_profit: take_profit.unwrap_or_else(|| default_target(side, entry_price)),
                confidence,
            };
            let assessment = engine.assess(&signal).await;
            if !assessment.can_trade {
                let reason = assessment
                    .warnings
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "risk assessment rejected the trade".into());
                warn!("Trade rejected by risk assessment: {}", reason);
                return Err(TradingError::Rejected { reason });
            }
            if assessment.position_size > 0 {
                quantity = assessment.position_size;
            }
        }

        if quantity == 0 {
            return Err(TradingError::InvalidSignal {
                reason: "quantity must be positive".into(),
            });
        }

        let mut portfolio = self.portfolio.write().await;

        if portfolio.emergency_stop {
            return Err(TradingError::Rejected {
                reason: "emergency stop".into(),
            });
        }

        if portfolio.open_position_count() >= self.config.max_positions {
            return Err(TradingError::Rejected {
                reason: format!("position limit reached ({})", self.config.max_positions),
            });
        }

        let quantity_dec = Decimal::from(quantity);
        let risk_amount = match (side, stop_loss) {
            (Side::Buy, Some(stop)) => (entry_price - stop) * quantity_dec,
            (Side::Sell, Some(stop)) => (stop - entry_price) * quantity_dec,
            _ => Decimal::ZERO,
        };

        let max_per_trade =
            portfolio.total_equity * self.config.max_risk_per_trade_pct / Decimal::ONE_HUNDRED;
        if risk_amount > max_per_trade {
            return Err(TradingError::Rejected {
                reason: format!(
                    "per-trade risk limit exceeded: {} > {}",
                    risk_amount, max_per_trade
                ),
            });
        }

        let max_total_risk =
            portfolio.total_equity * self.config.max_total_risk_pct / Decimal::ONE_HUNDRED;
        if portfolio.total_risk_exposure + risk_amount > max_total_risk {
            return Err(TradingError::Rejected {
                reason: format!(
                    "aggregate risk limit exceeded: {} > {}",
                    portfolio.total_risk_exposure + risk_amount,
                    max_total_risk
                ),
            });
        }

        let position_value = entry_price * quantity_dec;
        if position_value > portfolio.available_cash {
            return Err(TradingError::InsufficientCash {
                need: position_value,
                available: portfolio.available_cash,
            });
        }

        let sequence = self.position_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let position = Position {
            id: format!("POS_{}_{}", now.format("%Y%m%d_%H%M%S"), sequence),
            instrument: instrument.to_string(),
            side,
            quantity,
            entry_price,
            current_price: entry_price,
            stop_loss,
            take_profit,
            status: PositionStatus::Active,
            entry_at: now,
            exit_at: None,
            exit_price: None,
            commission: Decimal::ZERO,
            tags,
        };

        portfolio.available_cash -= position_value;
        portfolio.total_risk_exposure += risk_amount;
        portfolio
            .positions
            .insert(position.id.clone(), position.clone());
        drop(portfolio);

        info!(
            "Opened position {}: {} {} {} @ {}",
            position.id, side, quantity, instrument, entry_price
        );

        let store = self.stores.trades().await;
        if let Err(e) = store.put_position(&position).await {
            warn!("Failed to persist position {}: {}", position.id, e);
        }

        Ok(position)
    }

    /// Close an active position at `exit_price`, realizing P&L.
    pub async fn close(
        &self,
        position_id: &str,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> Result<bool, TradingError> {
        let now = self.clock.now().await;
        let mode = self.stores.active_mode().await;
        let (position, pnl) = {
            let mut portfolio = self.portfolio.write().await;
            let position =
                portfolio
                    .positions
                    .get_mut(position_id)
                    .ok_or(TradingError::PositionNotFound {
                        position_id: position_id.to_string(),
                    })?;
            if !position.is_active() {
                return Err(TradingError::PositionNotActive {
                    position_id: position_id.to_string(),
                });
            }

            position.close(exit_price, now, reason);
            let snapshot = position.clone();
            let pnl = snapshot.realized_pnl().unwrap_or(Decimal::ZERO);

            portfolio.available_cash += snapshot.market_value();
            portfolio.total_risk_exposure -= snapshot.risk_amount();
            (snapshot, pnl)
        };

        // Realized result flows through the risk engine so circuit
        // breaking and streak accounting live in one place.
        if let Some(engine) = &self.risk_engine {
            engine.update_on_trade_result(pnl).await;
        } else {
            let mut portfolio = self.portfolio.write().await;
            portfolio.record_trade_result(pnl, now);
        }

        info!(
            "Closed position {} at {} ({}): P&L {}",
            position_id, exit_price, reason, pnl
        );

        let record = TradeRecord {
            id: position.id.clone(),
            instrument: position.instrument.clone(),
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: Some(exit_price),
            pnl: Some(pnl),
            opened_at: position.entry_at,
            closed_at: Some(now),
            close_reason: Some(reason.to_string()),
            mode,
        };
        let store = self.stores.trades().await;
        if let Err(e) = store.put_trade(&record).await {
            warn!("Failed to persist trade {}: {}", record.id, e);
        }
        if let Err(e) = store.update_position(&position).await {
            warn!("Failed to persist closed position {}: {}", position.id, e);
        }

        Ok(true)
    }

    /// Apply market prices. Positions whose stop or target triggers are
    /// closed in detection order; after this returns no active position
    /// violates its stop or target at the applied prices.
    pub async fn update_market_prices(&self, prices: &HashMap<String, Decimal>) {
        let mut triggered: Vec<(String, Decimal, CloseReason)> = Vec::new();
        {
            let mut portfolio = self.portfolio.write().await;
            let mut ids: Vec<String> = portfolio
                .positions
                .values()
                .filter(|p| p.is_active() && prices.contains_key(&p.instrument))
                .map(|p| p.id.clone())
                .collect();
            ids.sort();
            for id in ids {
                let Some(position) = portfolio.positions.get_mut(&id) else {
                    continue;
                };
                let price = prices[&position.instrument];
                if let Some(reason) = position.apply_price(price) {
                    triggered.push((id, price, reason));
                }
            }
        }

        for (id, price, reason) in triggered {
            match self.close(&id, price, reason).await {
                Ok(_) => {
                    self.alerts
                        .route(
                            "position_auto_closed",
                            &format!("Position {} auto-closed ({})", id, reason),
                            AlertSeverity::Warning,
                            json!({ "position_id": id, "price": price.to_f64(), "reason": reason.to_string() }),
                            "position_manager",
                        )
                        .await;
                }
                Err(e) => warn!("Auto-close of {} failed: {}", id, e),
            }
        }
    }

    /// Bridge from an orchestrator decision to position operations.
    pub async fn execute_trading_decision(
        &self,
        signal: &TradeSignal,
    ) -> Result<Position, TradingError> {
        signal.validate()?;
        if signal.confidence < self.config.min_confidence {
            return Err(TradingError::Rejected {
                reason: format!(
                    "confidence {:.2} below minimum {:.2}",
                    signal.confidence, self.config.min_confidence
                ),
            });
        }

        // Opposite-side signal closes existing exposure first.
        let opposite: Vec<String> = {
            let portfolio = self.portfolio.read().await;
            portfolio
                .positions
                .values()
                .filter(|p| {
                    p.is_active() && p.instrument == signal.instrument && p.side != signal.side
                })
                .map(|p| p.id.clone())
                .collect()
        };
        for id in opposite {
            if let Err(e) = self
                .close(&id, signal.entry_price, CloseReason::Decision)
                .await
            {
                warn!("Failed to close opposing position {}: {}", id, e);
            }
        }

        let position = self
            .open(
                &signal.instrument,
                signal.side,
                1,
                signal.entry_price,
                Some(signal.stop_loss),
                Some(signal.take_profit),
                signal.confidence,
                vec!["cycle_decision".into()],
            )
            .await?;

        // Venue submission is idempotent in the position id; a failure
        // here leaves the paper book authoritative and raises an alert
        // for reconciliation.
        if let Some(executor) = &self.executor {
            match executor
                .place_order(signal, position.quantity, &position.id)
                .await
            {
                Ok(receipt) => info!(
                    "Order {} routed to venue as {} ({:?})",
                    position.id, receipt.venue_order_id, receipt.status
                ),
                Err(e) => {
                    warn!("Order submission failed for {}: {:#}", position.id, e);
                    self.alerts
                        .route(
                            "order_submission_failed",
                            &format!("Venue rejected order for position {}", position.id),
                            AlertSeverity::Warning,
                            json!({ "position_id": position.id, "error": e.to_string() }),
                            "position_manager",
                        )
                        .await;
                }
            }
        }

        Ok(position)
    }

    pub async fn active_positions(&self) -> Vec<Position> {
        let portfolio = self.portfolio.read().await;
        let mut positions: Vec<Position> =
            portfolio.active_positions().cloned().collect();
        positions.sort_by(|a, b| a.id.cmp(&b.id));
        positions
    }
}

fn default_stop(side: Side, entry: Decimal) -> Decimal {
    let two_pct = entry * Decimal::TWO / Decimal::ONE_HUNDRED;
    match side {
        Side::Buy => entry - two_pct,
        Side::Sell => entry + two_pct,
    }
}

fn default_target(side: Side, entry: Decimal) -> Decimal {
    let four_pct = entry * Decimal::from(4) / Decimal::ONE_HUNDRED;
    match side {
        Side::Buy => entry + four_pct,
        Side::Sell => entry - four_pct,
    }
}
