//! Dependency assembly and lifecycle.
//!
//! `Application::build` is the DI root: every component is constructed
//! once and passed explicitly, no process-wide singletons. `start`
//! spawns the long-lived tasks; `SystemHandle::stop` cancels them in a
//! defined order (orchestrator first, then the background sweeps) and
//! lets the stores drop last.

use crate::application::agents::analysis::{AnalysisAgent, AnalysisKind};
use crate::application::agents::debate::{DebateAgent, DebateSide};
use crate::application::agents::execution::{ExecutionAgent, ExecutionConfig};
use crate::application::agents::portfolio_manager::PortfolioManagerAgent;
use crate::application::agents::risk_stance::{RiskStance, RiskStanceAgent};
use crate::application::agents::{Agent, AgentRuntime};
use crate::application::alerts::AlertRouter;
use crate::application::clock::SharedClock;
use crate::application::control::ControlService;
use crate::application::mode_controller::{ModeController, ModeScopedStores, StorePair};
use crate::application::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::application::providers::usage::UsageLedger;
use crate::application::providers::{ProviderRouter, RouterConfig};
use crate::application::risk::RiskEngine;
use crate::application::trading::position_manager::{PositionManager, PositionManagerConfig};
use crate::config::Config;
use crate::domain::mode::Mode;
use crate::domain::ports::{KeyValueStore, MarketDataSource, NewsFeed, TechnicalIndicators};
use crate::domain::trading::PortfolioState;
use crate::infrastructure::alert_backends::{StoreBackend, WebhookBackend};
use crate::infrastructure::llm::{HttpLlmTransport, ScriptedTransport};
use crate::infrastructure::memory::{InMemoryDecisionStore, InMemoryTradeStore};
use crate::infrastructure::mode_file::ModeConfigFile;
use crate::infrastructure::persistence::{
    Database, SqliteAlertStore, SqliteDecisionStore, SqliteTradeStore, SqliteUsageStore,
};
use crate::infrastructure::redis::RedisKeyValueStore;
use crate::infrastructure::simulation::{
    SimulatedExecutor, SimulatedIndicators, SimulatedMarket, SimulatedNewsFeed,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Application {
    pub config: Config,
    pub clock: Arc<SharedClock>,
    pub mode_controller: Arc<ModeController>,
    pub router: Arc<ProviderRouter>,
    pub alerts: Arc<AlertRouter>,
    pub risk_engine: Arc<RiskEngine>,
    pub position_manager: Arc<PositionManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub control: Arc<ControlService>,
    pub market: Arc<dyn MarketDataSource>,
}

/// Handles to the spawned background tasks, stopped in declaration
/// order.
pub struct SystemHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SystemHandle {
    pub async fn stop(mut self) {
        info!("Shutdown requested; stopping tasks in order...");
        let _ = self.shutdown_tx.send(true);
        for (name, task) in self.tasks.drain(..) {
            match tokio::time::timeout(std::time::Duration::from_secs(10), task).await {
                Ok(_) => info!("Task {} stopped", name),
                Err(_) => warn!("Task {} did not stop in time", name),
            }
        }
        info!("Shutdown complete");
    }
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!(
            "Building application (mode {}, instrument {})",
            config.default_mode, config.instrument
        );

        // Clock, optionally synchronized through Redis so sibling
        // processes replay the same virtual time.
        let clock = Arc::new(match &config.redis_url {
            Some(url) => {
                let kv: Arc<dyn KeyValueStore> = Arc::new(
                    RedisKeyValueStore::connect(url)
                        .await
                        .context("Redis is configured but unreachable")?,
                );
                SharedClock::with_store(kv)
            }
            None => SharedClock::new(),
        });

        // Durable persistence. The database is required at startup;
        // failure here exits non-zero (§ error surfaces).
        let database = Database::new(&config.database_url)
            .await
            .context("Persistence store unreachable on startup")?;

        // Alerting: durable store sink always, webhook when configured.
        let mut alert_router = AlertRouter::new(clock.clone());
        alert_router.add_backend(Arc::new(StoreBackend::new(Arc::new(SqliteAlertStore::new(
            database.pool.clone(),
        )))));
        if let Some(url) = &config.alert_webhook_url {
            alert_router.add_backend(Arc::new(WebhookBackend::new(url.clone())?));
        }
        let alerts = Arc::new(alert_router);

        // Mode-scoped stores: closed-market simulation stays in memory,
        // open-market simulation and live each get their own scoped
        // SQLite bindings.
        let mut bindings = HashMap::new();
        bindings.insert(
            Mode::SimClosed,
            StorePair {
                decisions: Arc::new(InMemoryDecisionStore::new()),
                trades: Arc::new(InMemoryTradeStore::new()),
            },
        );
        for mode in [Mode::SimOpen, Mode::Live] {
            bindings.insert(
                mode,
                StorePair {
                    decisions: Arc::new(SqliteDecisionStore::new(database.pool.clone(), mode)),
                    trades: Arc::new(SqliteTradeStore::new(database.pool.clone(), mode)),
                },
            );
        }
        let stores = Arc::new(ModeScopedStores::new(bindings, config.default_mode)?);

        let mode_controller = Arc::new(
            ModeController::load(
                clock.clone(),
                config.calendar.clone(),
                stores.clone(),
                Arc::new(ModeConfigFile::new(&config.mode_config_path)),
                config.default_mode,
            )
            .await?,
        );

        // Provider router. Without credentials the scripted transport
        // keeps the pipeline exercisable in closed-market simulation.
        let usage = UsageLedger::new(
            Arc::new(SqliteUsageStore::new(database.pool.clone())),
            config.usage_rollover_hour,
            config.market_utc_offset_secs,
        );
        let have_providers = !config.providers.is_empty();
        let router = if have_providers {
            Arc::new(ProviderRouter::new(
                config.providers.clone(),
                Arc::new(HttpLlmTransport::new()?),
                clock.clone(),
                alerts.clone(),
                usage,
                RouterConfig::default(),
            )?)
        } else {
            warn!("No LLM providers configured; agents fall back to heuristics");
            Arc::new(ProviderRouter::new(
                Vec::new(),
                Arc::new(ScriptedTransport::new("HOLD")),
                clock.clone(),
                alerts.clone(),
                usage,
                RouterConfig::default(),
            )?)
        };
        router.preload_usage().await?;

        // Portfolio, risk, positions.
        let portfolio = Arc::new(RwLock::new(PortfolioState::with_equity(
            config.initial_equity,
        )));
        let risk_engine = Arc::new(RiskEngine::new(
            config.risk.clone(),
            portfolio.clone(),
            clock.clone(),
            alerts.clone(),
            config.market_utc_offset_secs,
        )?);
        let position_manager = Arc::new(
            PositionManager::new(
                portfolio,
                Some(risk_engine.clone()),
                stores.clone(),
                alerts.clone(),
                clock.clone(),
                PositionManagerConfig {
                    max_positions: config.risk.max_open_positions,
                    max_risk_per_trade_pct: config.risk.max_risk_per_trade_pct,
                    max_total_risk_pct: config.risk.max_portfolio_risk_pct,
                    min_confidence: config.min_trade_confidence,
                },
            )
            .with_executor(Arc::new(SimulatedExecutor::new())),
        );

        // Market collaborators. Venue adapters live outside the core;
        // the simulated set serves both SIM modes.
        let market: Arc<dyn MarketDataSource> = Arc::new(SimulatedMarket::new(
            clock.clone(),
            rust_decimal::Decimal::from(48_500),
            config.sim_seed,
        ));
        let indicators: Arc<dyn TechnicalIndicators> = Arc::new(SimulatedIndicators::new(
            rust_decimal::Decimal::from(48_500),
            config.sim_seed,
        ));
        let news: Arc<dyn NewsFeed> =
            Arc::new(SimulatedNewsFeed::new(clock.clone(), config.sim_seed));

        // The agent graph: analysis fans out, debate weighs it, three
        // risk stances opine, the portfolio manager decides, execution
        // prices the trade.
        let agent_router = have_providers.then(|| router.clone());
        let agents: Vec<Arc<dyn Agent>> = vec![
            Arc::new(AnalysisAgent::new(
                AnalysisKind::Technical,
                agent_router.clone(),
            )),
            Arc::new(AnalysisAgent::new(
                AnalysisKind::Fundamental,
                agent_router.clone(),
            )),
            Arc::new(AnalysisAgent::new(
                AnalysisKind::Sentiment,
                agent_router.clone(),
            )),
            Arc::new(AnalysisAgent::new(AnalysisKind::Macro, agent_router.clone())),
            Arc::new(DebateAgent::new(DebateSide::Bull, agent_router.clone())),
            Arc::new(DebateAgent::new(DebateSide::Bear, agent_router.clone())),
            Arc::new(RiskStanceAgent::new(RiskStance::Aggressive)),
            Arc::new(RiskStanceAgent::new(RiskStance::Conservative)),
            Arc::new(RiskStanceAgent::new(RiskStance::Neutral)),
            Arc::new(PortfolioManagerAgent::new(agent_router.clone())),
            Arc::new(ExecutionAgent::new(ExecutionConfig::default())),
        ];
        let runtime = Arc::new(AgentRuntime::new(agents, stores.clone()));

        let orchestrator = Arc::new(Orchestrator::new(
            clock.clone(),
            mode_controller.clone(),
            runtime,
            position_manager.clone(),
            market.clone(),
            indicators,
            news,
            alerts.clone(),
            OrchestratorConfig {
                instrument: config.instrument.clone(),
                timeframe: config.timeframe.clone(),
                cycle_interval: std::time::Duration::from_secs(config.cycle_interval_secs),
                min_trade_confidence: config.min_trade_confidence,
                force_when_closed: config.force_when_closed,
            },
        ));

        let control = Arc::new(ControlService::new(
            mode_controller.clone(),
            orchestrator.clone(),
            position_manager.clone(),
            router.clone(),
            clock.clone(),
        ));

        Ok(Self {
            config,
            clock,
            mode_controller,
            router,
            alerts,
            risk_engine,
            position_manager,
            orchestrator,
            control,
            market,
        })
    }

    /// Spawn the long-lived tasks.
    pub async fn start(&self) -> Result<SystemHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        // Orchestration driver.
        {
            let orchestrator = self.orchestrator.clone();
            let shutdown = shutdown_rx.clone();
            tasks.push((
                "orchestrator",
                tokio::spawn(async move { orchestrator.run(shutdown).await }),
            ));
        }

        // Price pump: market ticks into stop/target monitoring.
        {
            let market = self.market.clone();
            let position_manager = self.position_manager.clone();
            let instrument = self.config.instrument.clone();
            let mut shutdown = shutdown_rx.clone();
            tasks.push((
                "price_pump",
                tokio::spawn(async move {
                    let mut ticks = match market.subscribe(&instrument).await {
                        Ok(ticks) => ticks,
                        Err(e) => {
                            warn!("Price subscription failed: {:#}", e);
                            return;
                        }
                    };
                    loop {
                        tokio::select! {
                            tick = ticks.recv() => {
                                let Some(tick) = tick else { break };
                                let mut prices = HashMap::new();
                                prices.insert(tick.instrument.clone(), tick.price);
                                position_manager.update_market_prices(&prices).await;
                            }
                            _ = shutdown.changed() => break,
                        }
                    }
                }),
            ));
        }

        // Provider recovery sweep.
        {
            let router = self.router.clone();
            let mut shutdown = shutdown_rx.clone();
            tasks.push((
                "provider_health",
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {
                                router.health_tick().await;
                            }
                            _ = shutdown.changed() => break,
                        }
                    }
                }),
            ));
        }

        // Mode auto-switch tick, independent of the cycle cadence.
        {
            let mode_controller = self.mode_controller.clone();
            let mut shutdown = shutdown_rx.clone();
            tasks.push((
                "mode_tick",
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {
                                if let Err(e) = mode_controller.tick().await {
                                    warn!("Mode tick failed: {:#}", e);
                                }
                            }
                            _ = shutdown.changed() => break,
                        }
                    }
                }),
            ));
        }

        // Daily reset watcher.
        {
            let risk_engine = self.risk_engine.clone();
            let clock = self.clock.clone();
            let mut shutdown = shutdown_rx.clone();
            tasks.push((
                "daily_reset",
                tokio::spawn(async move {
                    let mut last_date = risk_engine.reset_date(clock.now().await);
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {
                                let date = risk_engine.reset_date(clock.now().await);
                                if date != last_date {
                                    risk_engine.daily_reset().await;
                                    last_date = date;
                                }
                            }
                            _ = shutdown.changed() => break,
                        }
                    }
                }),
            ));
        }

        info!("Application started ({} background tasks)", tasks.len());
        Ok(SystemHandle { shutdown_tx, tasks })
    }
}
