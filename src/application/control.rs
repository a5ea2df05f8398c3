//! Operator-facing control surface.
//!
//! Protocol-independent: every operation is a typed request/response
//! pair with serde-visible shapes, so a transport adapter (HTTP, local
//! socket, test harness) can wrap it without touching core logic.

use crate::application::clock::SharedClock;
use crate::application::mode_controller::{ModeController, ModeInfo, SwitchOutcome};
use crate::application::orchestrator::Orchestrator;
use crate::application::providers::ProviderRouter;
use crate::application::trading::PositionManager;
use crate::domain::mode::{Mode, ReplayWindow};
use crate::domain::provider::ProviderSnapshot;
use crate::domain::repositories::{DecisionFilter, DiscussionRecord, TradeFilter, TradeRecord};
use crate::domain::trading::Position;
use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct SetModeRequest {
    pub mode: Mode,
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub historical_replay: Option<ReplayWindow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetModeResponse {
    pub success: bool,
    pub mode: Mode,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub confirmation_required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub dependencies: HashMap<String, bool>,
}

pub struct ControlService {
    mode_controller: Arc<ModeController>,
    orchestrator: Arc<Orchestrator>,
    position_manager: Arc<PositionManager>,
    router: Arc<ProviderRouter>,
    clock: Arc<SharedClock>,
}

impl ControlService {
    pub fn new(
        mode_controller: Arc<ModeController>,
        orchestrator: Arc<Orchestrator>,
        position_manager: Arc<PositionManager>,
        router: Arc<ProviderRouter>,
        clock: Arc<SharedClock>,
    ) -> Self {
        Self {
            mode_controller,
            orchestrator,
            position_manager,
            router,
            clock,
        }
    }

    pub async fn get_mode_info(&self) -> ModeInfo {
        self.mode_controller.mode_info().await
    }

    pub async fn set_mode(&self, request: SetModeRequest) -> Result<SetModeResponse> {
        let outcome = self
            .mode_controller
            .set_manual(request.mode, request.confirm, request.historical_replay)
            .await?;
        let current = self.mode_controller.current_mode().await;
        Ok(match outcome {
            SwitchOutcome::ConfirmationRequired => SetModeResponse {
                success: false,
                mode: current,
                confirmation_required: true,
            },
            _ => SetModeResponse {
                success: true,
                mode: current,
                confirmation_required: false,
            },
        })
    }

    pub async fn clear_manual_override(&self) -> Result<bool> {
        self.mode_controller.clear_manual().await?;
        Ok(true)
    }

    pub async fn get_balance(&self) -> Decimal {
        self.position_manager.portfolio().read().await.total_equity
    }

    /// Reset the simulated account balance. Refused in live mode and
    /// while positions are open, so totals stay coherent.
    pub async fn set_balance(&self, balance: Decimal) -> Result<Decimal> {
        if self.mode_controller.current_mode().await == Mode::Live {
            bail!("Balance can only be set in simulated modes");
        }
        if balance <= Decimal::ZERO {
            bail!("Balance must be positive, got {}", balance);
        }
        let portfolio = self.position_manager.portfolio();
        let mut state = portfolio.write().await;
        if state.open_position_count() > 0 {
            bail!("Close open positions before resetting the balance");
        }
        state.total_equity = balance;
        state.available_cash = balance;
        info!("Simulated balance set to {}", balance);
        Ok(balance)
    }

    /// One-shot cycle, honoring the market gate.
    pub async fn run_cycle(&self) -> Result<bool> {
        let decision = self.orchestrator.tick().await?;
        Ok(decision.is_some())
    }

    pub async fn list_signals(
        &self,
        instrument: Option<String>,
        limit: usize,
    ) -> Result<Vec<DiscussionRecord>> {
        let filter = DecisionFilter {
            instrument,
            ..Default::default()
        };
        let store = self.mode_controller.stores().decisions().await;
        store
            .list_discussions(&filter, limit)
            .await
            .context("Failed to list agent signals")
    }

    pub async fn list_positions(&self) -> Vec<Position> {
        self.position_manager.active_positions().await
    }

    pub async fn list_trades(&self, instrument: Option<String>) -> Result<Vec<TradeRecord>> {
        let filter = TradeFilter {
            instrument,
            ..Default::default()
        };
        let store = self.mode_controller.stores().trades().await;
        store.list_trades(&filter).await.context("Failed to list trades")
    }

    pub async fn get_provider_status(&self) -> HashMap<String, ProviderSnapshot> {
        self.router.status().await
    }

    pub async fn health_check(&self) -> HealthReport {
        let mut dependencies = HashMap::new();

        dependencies.insert("providers".to_string(), self.router.provider_count() > 0);

        let decisions_ok = {
            let store = self.mode_controller.stores().decisions().await;
            store
                .list_decisions(&DecisionFilter::default(), 1)
                .await
                .is_ok()
        };
        dependencies.insert("decision_store".to_string(), decisions_ok);

        let trades_ok = {
            let store = self.mode_controller.stores().trades().await;
            store.list_trades(&TradeFilter::default()).await.is_ok()
        };
        dependencies.insert("trade_store".to_string(), trades_ok);

        dependencies.insert("virtual_clock".to_string(), true);
        let _ = self.clock.now().await;

        let healthy = dependencies.values().all(|ok| *ok);
        HealthReport {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            dependencies,
        }
    }
}
