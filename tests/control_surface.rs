//! The operator control surface: mode management, balance, one-shot
//! cycles, listings, provider status and health.

mod common;

use common::{
    ScriptedAgent, StaticIndicators, StaticMarket, StaticNews, alert_router, clock_at, ist,
    memory_stores, mode_controller, provider,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::RwLock;
use tradecouncil::application::agents::execution::{ExecutionAgent, ExecutionConfig};
use tradecouncil::application::agents::{Agent, AgentRuntime};
use tradecouncil::application::control::{ControlService, SetModeRequest};
use tradecouncil::application::orchestrator::{Orchestrator, OrchestratorConfig};
use tradecouncil::application::providers::usage::UsageLedger;
use tradecouncil::application::providers::{ProviderRouter, RouterConfig};
use tradecouncil::application::trading::position_manager::{
    PositionManager, PositionManagerConfig,
};
use tradecouncil::domain::calendar::MarketCalendar;
use tradecouncil::domain::mode::Mode;
use tradecouncil::domain::signal::{Phase, Signal};
use tradecouncil::domain::trading::PortfolioState;
use tradecouncil::infrastructure::llm::ScriptedTransport;
use tradecouncil::infrastructure::memory::InMemoryUsageStore;

async fn control_at(at: chrono::DateTime<chrono::Utc>) -> ControlService {
    let clock = clock_at(at).await;
    let stores = memory_stores(Mode::SimOpen);
    let controller = mode_controller(
        clock.clone(),
        MarketCalendar::nse(),
        stores.stores.clone(),
        Mode::SimOpen,
    )
    .await;
    let (alerts, _alert_store) = alert_router(clock.clone());

    let portfolio = Arc::new(RwLock::new(PortfolioState::with_equity(dec!(100000))));
    let position_manager = Arc::new(PositionManager::new(
        portfolio,
        None,
        stores.stores.clone(),
        alerts.clone(),
        clock.clone(),
        PositionManagerConfig::default(),
    ));

    let agents: Vec<Arc<dyn Agent>> = vec![
        ScriptedAgent::new("technical", Phase::Analysis, Signal::Hold, 0.5),
        ScriptedAgent::new("portfolio_manager", Phase::Portfolio, Signal::Hold, 0.5),
        Arc::new(ExecutionAgent::new(ExecutionConfig::default())),
    ];
    let runtime = Arc::new(AgentRuntime::new(agents, stores.stores.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        clock.clone(),
        controller.clone(),
        runtime,
        position_manager.clone(),
        Arc::new(StaticMarket {
            price: dec!(100),
            clock: clock.clone(),
        }),
        Arc::new(StaticIndicators),
        Arc::new(StaticNews),
        alerts.clone(),
        OrchestratorConfig {
            instrument: "NIFTY".into(),
            timeframe: "15m".into(),
            cycle_interval: std::time::Duration::from_secs(900),
            min_trade_confidence: 0.6,
            force_when_closed: false,
        },
    ));

    let router = Arc::new(
        ProviderRouter::new(
            vec![provider("alpha", 1, 30)],
            Arc::new(ScriptedTransport::new("HOLD")),
            clock.clone(),
            alerts,
            UsageLedger::new(Arc::new(InMemoryUsageStore::new()), 9, 0),
            RouterConfig::default(),
        )
        .unwrap(),
    );

    ControlService::new(controller, orchestrator, position_manager, router, clock)
}

#[tokio::test]
async fn set_mode_round_trips_and_guards_live() {
    let control = control_at(ist(2025, 6, 2, 10, 0, 0)).await;

    let info = control.get_mode_info().await;
    assert_eq!(info.current_mode, Mode::SimOpen);
    assert!(info.market_open);

    // Live without confirmation returns the sentinel and stays put.
    let response = control
        .set_mode(SetModeRequest {
            mode: Mode::Live,
            confirm: false,
            historical_replay: None,
        })
        .await
        .unwrap();
    assert!(!response.success);
    assert!(response.confirmation_required);
    assert_eq!(control.get_mode_info().await.current_mode, Mode::SimOpen);

    // Confirmed switch lands.
    let response = control
        .set_mode(SetModeRequest {
            mode: Mode::Live,
            confirm: true,
            historical_replay: None,
        })
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.mode, Mode::Live);

    assert!(control.clear_manual_override().await.unwrap());
    assert!(!control.get_mode_info().await.has_manual_override);
}

#[tokio::test]
async fn balance_is_sim_only_and_guarded() {
    let control = control_at(ist(2025, 6, 2, 10, 0, 0)).await;
    assert_eq!(control.get_balance().await, dec!(100000));

    let updated = control.set_balance(dec!(250000)).await.unwrap();
    assert_eq!(updated, dec!(250000));
    assert_eq!(control.get_balance().await, dec!(250000));

    assert!(control.set_balance(dec!(-5)).await.is_err());

    control
        .set_mode(SetModeRequest {
            mode: Mode::Live,
            confirm: true,
            historical_replay: None,
        })
        .await
        .unwrap();
    assert!(control.set_balance(dec!(1)).await.is_err());
}

#[tokio::test]
async fn run_cycle_persists_signals_and_reports_health() {
    let control = control_at(ist(2025, 6, 2, 10, 0, 0)).await;

    assert!(control.run_cycle().await.unwrap());

    let signals = control.list_signals(Some("NIFTY".into()), 50).await.unwrap();
    assert!(!signals.is_empty());
    assert!(signals.iter().any(|s| s.signal.agent == "technical"));

    assert!(control.list_positions().await.is_empty());
    assert!(control.list_trades(None).await.unwrap().is_empty());

    let status = control.get_provider_status().await;
    assert!(status.contains_key("alpha"));

    let health = control.health_check().await;
    assert_eq!(health.status, "healthy");
    assert!(health.dependencies["providers"]);
    assert!(health.dependencies["decision_store"]);
}

#[tokio::test]
async fn run_cycle_respects_the_market_gate() {
    // Saturday: gate holds the cycle back.
    let control = control_at(ist(2025, 6, 7, 12, 0, 0)).await;
    assert!(!control.run_cycle().await.unwrap());
    assert!(control.list_signals(None, 10).await.unwrap().is_empty());
}
