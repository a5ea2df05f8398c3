//! End-to-end orchestration cycles: closed-market gating and a BUY
//! consensus flowing through to the position manager.

mod common;

use common::{
    ScriptedAgent, StaticIndicators, StaticMarket, StaticNews, alert_router, clock_at, ist,
    memory_stores, mode_controller,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::RwLock;
use tradecouncil::application::agents::execution::{ExecutionAgent, ExecutionConfig};
use tradecouncil::application::agents::{Agent, AgentRuntime};
use tradecouncil::application::orchestrator::{Orchestrator, OrchestratorConfig};
use tradecouncil::application::trading::position_manager::{
    PositionManager, PositionManagerConfig,
};
use tradecouncil::domain::calendar::MarketCalendar;
use tradecouncil::domain::mode::Mode;
use tradecouncil::domain::signal::{Phase, Signal};
use tradecouncil::domain::trading::PortfolioState;

struct Harness {
    orchestrator: Orchestrator,
    decisions: Arc<tradecouncil::infrastructure::memory::InMemoryDecisionStore>,
    portfolio: Arc<RwLock<PortfolioState>>,
}

async fn harness(at: chrono::DateTime<chrono::Utc>, agents: Vec<Arc<dyn Agent>>) -> Harness {
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
        portfolio.clone(),
        None,
        stores.stores.clone(),
        alerts.clone(),
        clock.clone(),
        PositionManagerConfig::default(),
    ));

    let runtime = Arc::new(AgentRuntime::new(agents, stores.stores.clone()));
    let market = Arc::new(StaticMarket {
        price: dec!(100),
        clock: clock.clone(),
    });

    let orchestrator = Orchestrator::new(
        clock,
        controller,
        runtime,
        position_manager,
        market,
        Arc::new(StaticIndicators),
        Arc::new(StaticNews),
        alerts,
        OrchestratorConfig {
            instrument: "NIFTY".into(),
            timeframe: "15m".into(),
            cycle_interval: std::time::Duration::from_secs(900),
            min_trade_confidence: 0.6,
            force_when_closed: false,
        },
    );

    Harness {
        orchestrator,
        decisions: stores.decisions,
        portfolio,
    }
}

fn consensus_agents() -> Vec<Arc<dyn Agent>> {
    vec![
        ScriptedAgent::new("technical", Phase::Analysis, Signal::Buy, 0.8),
        ScriptedAgent::new("fundamental", Phase::Analysis, Signal::Buy, 0.8),
        ScriptedAgent::new("sentiment", Phase::Analysis, Signal::Buy, 0.8),
        ScriptedAgent::new("macro", Phase::Analysis, Signal::Hold, 0.5),
        ScriptedAgent::new("bull_researcher", Phase::Debate, Signal::Buy, 0.8),
        ScriptedAgent::new("bear_researcher", Phase::Debate, Signal::Sell, 0.1),
        ScriptedAgent::new("aggressive", Phase::Risk, Signal::Buy, 0.9),
        ScriptedAgent::new("conservative", Phase::Risk, Signal::Buy, 0.65),
        ScriptedAgent::new("neutral", Phase::Risk, Signal::Buy, 0.78),
        ScriptedAgent::new("portfolio_manager", Phase::Portfolio, Signal::Buy, 0.78),
        Arc::new(ExecutionAgent::new(ExecutionConfig::default())),
    ]
}

#[tokio::test]
async fn closed_market_produces_no_cycle() {
    // Saturday noon.
    let harness = harness(ist(2025, 6, 7, 12, 0, 0), consensus_agents()).await;

    let decision = harness.orchestrator.tick().await.unwrap();
    assert!(decision.is_none());
    assert_eq!(harness.decisions.decision_count().await, 0);
    assert_eq!(harness.portfolio.read().await.open_position_count(), 0);
}

#[tokio::test]
async fn buy_consensus_reaches_the_position_manager() {
    // Monday 10:00 IST, market open.
    let harness = harness(ist(2025, 6, 2, 10, 0, 0), consensus_agents()).await;

    let decision = harness.orchestrator.tick().await.unwrap().unwrap();
    assert_eq!(decision.final_signal, Signal::Buy);
    assert!(
        (0.7..=0.8).contains(&decision.confidence),
        "confidence {} outside expected band",
        decision.confidence
    );
    assert_eq!(decision.mode, Mode::SimOpen);

    // Every configured phase contributed at least one signal.
    for phase in Phase::ORDER {
        assert!(
            decision.agent_signals.iter().any(|s| s.phase == phase),
            "phase {} missing from decision",
            phase
        );
    }

    // Exactly one decision persisted, one trade delivered.
    assert_eq!(harness.decisions.decision_count().await, 1);
    let portfolio = harness.portfolio.read().await;
    assert_eq!(portfolio.open_position_count(), 1);
    let position = portfolio.active_positions().next().unwrap();
    assert_eq!(position.instrument, "NIFTY");
    assert_eq!(position.entry_price, dec!(100));
    assert_eq!(position.stop_loss, Some(dec!(98)));
    assert_eq!(position.take_profit, Some(dec!(104)));
}

#[tokio::test]
async fn failed_agent_downgrades_to_hold_without_aborting() {
    struct FailingAgent;

    #[async_trait::async_trait]
    impl Agent for FailingAgent {
        fn name(&self) -> &str {
            "technical"
        }
        fn phase(&self) -> Phase {
            Phase::Analysis
        }
        async fn process(
            &self,
            _ctx: &tradecouncil::application::agents::CycleContext,
            _state: &tradecouncil::application::agents::CycleState,
        ) -> anyhow::Result<tradecouncil::domain::signal::AgentSignal> {
            anyhow::bail!("indicator backend offline")
        }
    }

    let agents: Vec<Arc<dyn Agent>> = vec![
        Arc::new(FailingAgent),
        ScriptedAgent::new("sentiment", Phase::Analysis, Signal::Hold, 0.5),
    ];
    let harness = harness(ist(2025, 6, 2, 10, 0, 0), agents).await;

    let decision = harness.orchestrator.tick().await.unwrap().unwrap();
    let failed = decision
        .agent_signals
        .iter()
        .find(|s| s.agent == "technical")
        .unwrap();
    assert_eq!(failed.signal, Signal::Hold);
    assert_eq!(failed.confidence, 0.0);
    assert!(failed.reasoning.contains("indicator backend offline"));
}
