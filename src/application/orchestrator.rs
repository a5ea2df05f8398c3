//! Periodic cycle driver.
//!
//! Gates on the market calendar, assembles one shared market snapshot,
//! runs the agent pipeline, persists the decision, and hands approved
//! signals to the position manager. All sleeping is clock-aware so a
//! historical replay advances deterministically instead of waiting on
//! the wall clock.

use crate::application::agents::execution::extract_trade_signal;
use crate::application::agents::{AgentRuntime, CycleContext, MarketSnapshot};
use crate::application::alerts::AlertRouter;
use crate::application::clock::SharedClock;
use crate::application::mode_controller::ModeController;
use crate::application::trading::PositionManager;
use crate::domain::alert::AlertSeverity;
use crate::domain::errors::TradingError;
use crate::domain::ports::{MarketDataSource, NewsFeed, TechnicalIndicators};
use crate::domain::signal::CycleDecision;
use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub instrument: String,
    pub timeframe: String,
    pub cycle_interval: std::time::Duration,
    /// Minimum decision confidence before a trade signal is forwarded.
    pub min_trade_confidence: f64,
    /// Run cycles even when the calendar says closed (demos, replay).
    pub force_when_closed: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            instrument: "NIFTY".into(),
            timeframe: "15m".into(),
            cycle_interval: std::time::Duration::from_secs(15 * 60),
            min_trade_confidence: 0.6,
            force_when_closed: false,
        }
    }
}

pub struct Orchestrator {
    clock: Arc<SharedClock>,
    mode_controller: Arc<ModeController>,
    runtime: Arc<AgentRuntime>,
    position_manager: Arc<PositionManager>,
    market: Arc<dyn MarketDataSource>,
    indicators: Arc<dyn TechnicalIndicators>,
    news: Arc<dyn NewsFeed>,
    alerts: Arc<AlertRouter>,
    config: OrchestratorConfig,
    cycle_counter: AtomicU64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<SharedClock>,
        mode_controller: Arc<ModeController>,
        runtime: Arc<AgentRuntime>,
        position_manager: Arc<PositionManager>,
        market: Arc<dyn MarketDataSource>,
        indicators: Arc<dyn TechnicalIndicators>,
        news: Arc<dyn NewsFeed>,
        alerts: Arc<AlertRouter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            clock,
            mode_controller,
            runtime,
            position_manager,
            market,
            indicators,
            news,
            alerts,
            config,
            cycle_counter: AtomicU64::new(0),
        }
    }

    /// Drive cycles until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Orchestrator started: {} every {:?}",
            self.config.instrument, self.config.cycle_interval
        );
        loop {
            let pause = match self.tick().await {
                Ok(Some(decision)) => {
                    info!(
                        "Cycle {} -> {} ({:.2})",
                        decision.cycle_id, decision.final_signal, decision.confidence
                    );
                    self.config.cycle_interval
                }
                // Gated by the calendar: re-check in a minute.
                Ok(None) => std::time::Duration::from_secs(60),
                Err(e) => {
                    warn!("Cycle failed: {:#}", e);
                    self.config.cycle_interval
                }
            };

            if !self.sleep_through(pause, &mut shutdown).await {
                break;
            }
        }
        info!("Orchestrator stopped");
    }

    /// One gated cycle. Returns `None` when the market gate held the
    /// cycle back.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<Option<CycleDecision>> {
        if let Err(e) = self.mode_controller.tick().await {
            warn!("Mode tick failed: {:#}", e);
        }

        let now = self.clock.now().await;
        let calendar = self.mode_controller.calendar();
        if !calendar.is_open(now) && !self.config.force_when_closed {
            info!(
                "Market closed ({:?}); skipping cycle",
                calendar.status(now)
            );
            return Ok(None);
        }

        let started = std::time::Instant::now();
        let context = self.build_context(now).await;

        let decision = self.runtime.run_cycle(&context).await?;

        let store = self.mode_controller.stores().decisions().await;
        store
            .put_decision(&decision)
            .await
            .context("Failed to persist cycle decision")?;

        self.hand_off(&decision).await;

        let elapsed = started.elapsed();
        if elapsed > self.config.cycle_interval / 2 {
            warn!(
                "Cycle {} overran its soft deadline: {:?} (interval {:?})",
                decision.cycle_id, elapsed, self.config.cycle_interval
            );
        }

        Ok(Some(decision))
    }

    async fn build_context(&self, now: chrono::DateTime<chrono::Utc>) -> CycleContext {
        let instrument = &self.config.instrument;
        let mut snapshot = MarketSnapshot::default();

        match self.market.latest_tick(instrument).await {
            Ok(tick) => snapshot.last_price = tick.map(|t| t.price),
            Err(e) => warn!("Tick fetch failed: {:#}", e),
        }
        match self.market.ohlc(instrument, &self.config.timeframe, 96).await {
            Ok(bars) => snapshot.bars = bars,
            Err(e) => warn!("OHLC fetch failed: {:#}", e),
        }
        match self.market.options_chain(instrument, None).await {
            Ok(chain) => snapshot.options = chain,
            Err(e) => warn!("Options fetch failed: {:#}", e),
        }
        match self
            .indicators
            .compute(instrument, &self.config.timeframe)
            .await
        {
            Ok(indicators) => snapshot.indicators = indicators,
            Err(e) => warn!("Indicator compute failed: {:#}", e),
        }
        match self.news.latest_news(instrument, 10).await {
            Ok(news) => snapshot.news = news,
            Err(e) => warn!("News fetch failed: {:#}", e),
        }
        match self.news.sentiment_summary(instrument, 24).await {
            Ok(summary) => snapshot.sentiment = Some(summary),
            Err(e) => warn!("Sentiment fetch failed: {:#}", e),
        }

        CycleContext {
            cycle_id: Uuid::new_v4().to_string(),
            instrument: instrument.clone(),
            timestamp: now,
            cycle_number: self.cycle_counter.fetch_add(1, Ordering::SeqCst) + 1,
            market_hours: true,
            mode: self.mode_controller.current_mode().await,
            snapshot,
        }
    }

    /// Forward an actionable decision to the position manager.
    async fn hand_off(&self, decision: &CycleDecision) {
        if decision.confidence < self.config.min_trade_confidence {
            return;
        }
        let Some(signal) = extract_trade_signal(decision) else {
            return;
        };

        match self.position_manager.execute_trading_decision(&signal).await {
            Ok(position) => {
                info!(
                    "Cycle {} opened position {} ({} {})",
                    decision.cycle_id, position.id, signal.side, signal.instrument
                );
            }
            Err(TradingError::Rejected { reason }) => {
                warn!("Cycle {} trade rejected: {}", decision.cycle_id, reason);
                self.alerts
                    .route(
                        "trade_rejected",
                        &format!("Trade from cycle {} rejected: {}", decision.cycle_id, reason),
                        AlertSeverity::Info,
                        json!({ "cycle_id": decision.cycle_id, "reason": reason }),
                        "orchestrator",
                    )
                    .await;
            }
            Err(e) => {
                warn!("Cycle {} trade failed: {}", decision.cycle_id, e);
            }
        }
    }

    /// Clock-aware inter-cycle sleep. Virtual time advances immediately
    /// by the interval; real time waits, remaining responsive to
    /// shutdown. Returns `false` when shutdown was requested.
    async fn sleep_through(
        &self,
        interval: std::time::Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        if self.clock.is_virtual().await {
            if let Err(e) = self
                .clock
                .advance(chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero()))
                .await
            {
                warn!("Failed to advance virtual clock: {:#}", e);
            }
            // Yield so sibling tasks observe the new instant.
            tokio::task::yield_now().await;
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => true,
            _ = shutdown.changed() => false,
        }
    }
}
