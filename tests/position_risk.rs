//! Position lifecycle under risk control: stop-loss auto-close with
//! portfolio reconciliation, and the daily-loss circuit breaker.

mod common;

use common::{alert_router, clock_at, ist, memory_stores};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tradecouncil::application::risk::RiskEngine;
use tradecouncil::application::trading::position_manager::{
    PositionManager, PositionManagerConfig,
};
use tradecouncil::domain::errors::TradingError;
use tradecouncil::domain::mode::Mode;
use tradecouncil::domain::risk::RiskConfig;
use tradecouncil::domain::signal::Side;
use tradecouncil::domain::trading::{PortfolioState, PositionStatus};

#[tokio::test]
async fn stop_loss_auto_closes_and_reconciles() {
    let clock = clock_at(ist(2025, 6, 2, 10, 0, 0)).await;
    let stores = memory_stores(Mode::SimOpen);
    let (alerts, alert_store) = alert_router(clock.clone());
    let portfolio = Arc::new(RwLock::new(PortfolioState::with_equity(dec!(100000))));

    let manager = PositionManager::new(
        portfolio.clone(),
        None,
        stores.stores.clone(),
        alerts,
        clock,
        PositionManagerConfig::default(),
    );

    let position = manager
        .open(
            "NIFTY",
            Side::Buy,
            10,
            dec!(100),
            Some(dec!(98)),
            Some(dec!(105)),
            0.8,
            vec![],
        )
        .await
        .unwrap();
    assert_eq!(portfolio.read().await.available_cash, dec!(99000));

    let mut prices = HashMap::new();
    prices.insert("NIFTY".to_string(), dec!(97.5));
    manager.update_market_prices(&prices).await;

    let state = portfolio.read().await;
    let closed = &state.positions[&position.id];
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_price, Some(dec!(97.5)));
    assert_eq!(closed.realized_pnl(), Some(dec!(-25)));
    assert_eq!(state.consecutive_losses, 1);
    assert_eq!(state.daily_pnl, dec!(-25));
    assert_eq!(state.available_cash, dec!(99975));
    assert_eq!(state.open_position_count(), 0);
    drop(state);

    // After any price update, no active position violates its stop.
    assert_eq!(alert_store.count_kind("position_auto_closed").await, 1);
    assert_eq!(stores.trades.trade_count().await, 1);
}

#[tokio::test]
async fn take_profit_closes_short_positions() {
    let clock = clock_at(ist(2025, 6, 2, 10, 0, 0)).await;
    let stores = memory_stores(Mode::SimOpen);
    let (alerts, _alert_store) = alert_router(clock.clone());
    let portfolio = Arc::new(RwLock::new(PortfolioState::with_equity(dec!(100000))));

    let manager = PositionManager::new(
        portfolio.clone(),
        None,
        stores.stores,
        alerts,
        clock,
        PositionManagerConfig::default(),
    );

    let position = manager
        .open(
            "NIFTY",
            Side::Sell,
            10,
            dec!(100),
            Some(dec!(102)),
            Some(dec!(95)),
            0.7,
            vec![],
        )
        .await
        .unwrap();

    let mut prices = HashMap::new();
    prices.insert("NIFTY".to_string(), dec!(94.5));
    manager.update_market_prices(&prices).await;

    let state = portfolio.read().await;
    let closed = &state.positions[&position.id];
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.realized_pnl(), Some(dec!(55)));
    assert_eq!(state.consecutive_losses, 0);
}

#[tokio::test]
async fn circuit_breaker_blocks_trading_until_daily_reset() {
    let clock = clock_at(ist(2025, 6, 2, 10, 0, 0)).await;
    let stores = memory_stores(Mode::SimOpen);
    let (alerts, alert_store) = alert_router(clock.clone());
    let portfolio = Arc::new(RwLock::new(PortfolioState::with_equity(dec!(100000))));

    let engine = Arc::new(
        RiskEngine::new(
            RiskConfig::default(),
            portfolio.clone(),
            clock.clone(),
            alerts.clone(),
            5 * 3600 + 30 * 60,
        )
        .unwrap(),
    );
    let manager = PositionManager::new(
        portfolio.clone(),
        Some(engine.clone()),
        stores.stores,
        alerts,
        clock,
        PositionManagerConfig::default(),
    );

    // Realized losses summing past 10% of equity trip the breaker.
    engine.update_on_trade_result(dec!(-5000)).await;
    assert!(!portfolio.read().await.emergency_stop);
    engine.update_on_trade_result(dec!(-5100)).await;
    assert!(portfolio.read().await.emergency_stop);
    assert_eq!(alert_store.count_kind("circuit_breaker_tripped").await, 1);

    let rejection = manager
        .open(
            "NIFTY",
            Side::Buy,
            10,
            dec!(100),
            Some(dec!(98)),
            Some(dec!(105)),
            0.8,
            vec![],
        )
        .await
        .unwrap_err();
    match rejection {
        TradingError::Rejected { reason } => assert!(reason.contains("emergency stop")),
        other => panic!("expected rejection, got {}", other),
    }

    // The daily reset clears a breaker tripped by the daily loss limit.
    engine.daily_reset().await;
    assert!(!portfolio.read().await.emergency_stop);
    let reopened = manager
        .open(
            "NIFTY",
            Side::Buy,
            10,
            dec!(100),
            Some(dec!(98)),
            Some(dec!(105)),
            0.8,
            vec![],
        )
        .await;
    assert!(reopened.is_ok(), "open after reset failed: {:?}", reopened.err());
}

#[tokio::test]
async fn opposite_decision_closes_existing_exposure() {
    let clock = clock_at(ist(2025, 6, 2, 10, 0, 0)).await;
    let stores = memory_stores(Mode::SimOpen);
    let (alerts, _alert_store) = alert_router(clock.clone());
    let portfolio = Arc::new(RwLock::new(PortfolioState::with_equity(dec!(100000))));

    let manager = PositionManager::new(
        portfolio.clone(),
        None,
        stores.stores,
        alerts,
        clock,
        PositionManagerConfig::default(),
    );

    manager
        .open(
            "NIFTY",
            Side::Buy,
            5,
            dec!(100),
            Some(dec!(98)),
            Some(dec!(105)),
            0.8,
            vec![],
        )
        .await
        .unwrap();

    let signal = tradecouncil::domain::signal::TradeSignal {
        instrument: "NIFTY".into(),
        side: Side::Sell,
        entry_price: dec!(101),
        stop_loss: dec!(103),
        take_profit: dec!(97),
        confidence: 0.8,
    };
    manager.execute_trading_decision(&signal).await.unwrap();

    let state = portfolio.read().await;
    let active: Vec<_> = state.active_positions().collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].side, Side::Sell);
}
