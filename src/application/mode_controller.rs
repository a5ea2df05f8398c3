//! Trading-mode state machine.
//!
//! Reconciles manual overrides with the calendar's suggestion, guards
//! live mode behind an explicit confirmation, and rebinds the decision
//! and trade stores so simulated and live data never share a backend.

use crate::application::clock::SharedClock;
use crate::domain::calendar::{MarketCalendar, MarketStatus};
use crate::domain::mode::{Mode, ModeConfig, ReplayWindow};
use crate::domain::repositories::{DecisionStore, TradeStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Durable home of the [`ModeConfig`] document. The whole document is
/// written in one operation so override and replay window cannot tear.
#[async_trait]
pub trait ModeConfigPersistence: Send + Sync {
    async fn load(&self) -> Result<ModeConfig>;
    async fn save(&self, config: &ModeConfig) -> Result<()>;
}

/// The decision/trade store pair bound to one mode.
#[derive(Clone)]
pub struct StorePair {
    pub decisions: Arc<dyn DecisionStore>,
    pub trades: Arc<dyn TradeStore>,
}

/// Switchboard routing persistence to the active mode's backends.
pub struct ModeScopedStores {
    bindings: HashMap<Mode, StorePair>,
    active: RwLock<(Mode, StorePair)>,
}

impl ModeScopedStores {
    pub fn new(bindings: HashMap<Mode, StorePair>, initial: Mode) -> Result<Self> {
        let active = bindings
            .get(&initial)
            .cloned()
            .with_context(|| format!("No store binding for mode {}", initial))?;
        Ok(Self {
            bindings,
            active: RwLock::new((initial, active)),
        })
    }

    pub async fn rebind(&self, mode: Mode) -> Result<()> {
        let pair = self
            .bindings
            .get(&mode)
            .cloned()
            .with_context(|| format!("No store binding for mode {}", mode))?;
        *self.active.write().await = (mode, pair);
        Ok(())
    }

    pub async fn active_mode(&self) -> Mode {
        self.active.read().await.0
    }

    pub async fn decisions(&self) -> Arc<dyn DecisionStore> {
        self.active.read().await.1.decisions.clone()
    }

    pub async fn trades(&self) -> Arc<dyn TradeStore> {
        self.active.read().await.1.trades.clone()
    }
}

/// Outcome of a manual or automatic switch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SwitchOutcome {
    Switched {
        from: Mode,
        to: Mode,
        reason: String,
    },
    NoChange,
    /// Live mode requires an explicit confirmation flag.
    ConfirmationRequired,
    /// Manual override active; auto-switching suspended.
    OverrideActive,
}

/// Read-only snapshot answering `getModeInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeInfo {
    pub current_mode: Mode,
    pub manual_override: Option<Mode>,
    pub has_manual_override: bool,
    pub market_open: bool,
    pub market_status: MarketStatus,
    pub suggested_mode: Mode,
    pub should_auto_switch: bool,
    pub auto_switch_reason: Option<String>,
    pub last_switch_at: Option<DateTime<Utc>>,
    pub historical_replay: Option<ReplayWindow>,
}

struct ControllerState {
    current: Mode,
    config: ModeConfig,
}

pub struct ModeController {
    clock: Arc<SharedClock>,
    calendar: MarketCalendar,
    stores: Arc<ModeScopedStores>,
    persistence: Arc<dyn ModeConfigPersistence>,
    state: RwLock<ControllerState>,
}

impl ModeController {
    /// Load persisted configuration and start in the override mode when
    /// one is present, otherwise in `default_mode`.
    pub async fn load(
        clock: Arc<SharedClock>,
        calendar: MarketCalendar,
        stores: Arc<ModeScopedStores>,
        persistence: Arc<dyn ModeConfigPersistence>,
        default_mode: Mode,
    ) -> Result<Self> {
        let config = persistence.load().await.unwrap_or_else(|e| {
            warn!("Mode config unreadable, starting fresh: {}", e);
            ModeConfig::default()
        });
        let current = config.manual_override.unwrap_or(default_mode);
        stores.rebind(current).await?;
        info!(
            "Mode controller started in {} (override: {:?})",
            current, config.manual_override
        );
        Ok(Self {
            clock,
            calendar,
            stores,
            persistence,
            state: RwLock::new(ControllerState { current, config }),
        })
    }

    pub async fn current_mode(&self) -> Mode {
        self.state.read().await.current
    }

    pub fn stores(&self) -> Arc<ModeScopedStores> {
        self.stores.clone()
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    /// Set a manual override. Switching to live requires `confirm`.
    pub async fn set_manual(
        &self,
        mode: Mode,
        confirm: bool,
        replay: Option<ReplayWindow>,
    ) -> Result<SwitchOutcome> {
        if mode == Mode::Live && !confirm {
            return Ok(SwitchOutcome::ConfirmationRequired);
        }

        let now = self.clock.now().await;
        let (from, config) = {
            let mut state = self.state.write().await;
            let from = state.current;
            state.current = mode;
            state.config.manual_override = Some(mode);
            state.config.last_switch_at = Some(now);
            if replay.is_some() {
                state.config.historical_replay = replay;
            }
            (from, state.config.clone())
        };

        self.persistence
            .save(&config)
            .await
            .context("Failed to persist manual mode override")?;
        self.stores.rebind(mode).await?;
        info!("Mode manually set: {} -> {}", from, mode);
        Ok(SwitchOutcome::Switched {
            from,
            to: mode,
            reason: "manual override".into(),
        })
    }

    /// Clear the override so the calendar drives mode again.
    pub async fn clear_manual(&self) -> Result<()> {
        let config = {
            let mut state = self.state.write().await;
            state.config.manual_override = None;
            state.config.clone()
        };
        self.persistence
            .save(&config)
            .await
            .context("Failed to clear manual mode override")?;
        info!("Manual mode override cleared; auto-switching resumed");
        Ok(())
    }

    /// Periodic reconciliation against the calendar.
    pub async fn tick(&self) -> Result<SwitchOutcome> {
        let now = self.clock.now().await;
        let open = self.calendar.is_open(now);

        let target = {
            let state = self.state.read().await;
            if state.config.has_manual_override() {
                return Ok(SwitchOutcome::OverrideActive);
            }
            match (state.current, open) {
                (Mode::SimClosed, true) => Some((state.current, Mode::SimOpen)),
                (Mode::SimOpen, false) | (Mode::Live, false) => {
                    Some((state.current, Mode::SimClosed))
                }
                _ => None,
            }
        };

        let Some((from, to)) = target else {
            return Ok(SwitchOutcome::NoChange);
        };

        let reason = if open {
            "market open".to_string()
        } else {
            "market closed".to_string()
        };

        let config = {
            let mut state = self.state.write().await;
            state.current = to;
            state.config.last_switch_at = Some(now);
            state.config.clone()
        };
        self.persistence
            .save(&config)
            .await
            .context("Failed to persist auto-switched mode")?;
        self.stores.rebind(to).await?;
        info!("Mode auto-switched: {} -> {} ({})", from, to, reason);
        Ok(SwitchOutcome::Switched { from, to, reason })
    }

    pub async fn mode_info(&self) -> ModeInfo {
        let now = self.clock.now().await;
        let status = self.calendar.status(now);
        let suggested = self.calendar.suggested_mode(now);
        let state = self.state.read().await;

        let should_auto_switch = !state.config.has_manual_override()
            && matches!(
                (state.current, status.is_open()),
                (Mode::SimClosed, true) | (Mode::SimOpen, false) | (Mode::Live, false)
            );
        let auto_switch_reason = if state.config.has_manual_override() {
            Some("manual override active".to_string())
        } else if should_auto_switch {
            Some(if status.is_open() {
                "market open".to_string()
            } else {
                "market closed".to_string()
            })
        } else {
            None
        };

        ModeInfo {
            current_mode: state.current,
            manual_override: state.config.manual_override,
            has_manual_override: state.config.has_manual_override(),
            market_open: status.is_open(),
            market_status: status,
            suggested_mode: suggested,
            should_auto_switch,
            auto_switch_reason,
            last_switch_at: state.config.last_switch_at,
            historical_replay: state.config.historical_replay.clone(),
        }
    }
}
