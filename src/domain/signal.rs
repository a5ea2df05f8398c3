use crate::domain::errors::TradingError;
use crate::domain::mode::Mode;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Direction of an agent's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

/// Side of an order or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl Side {
    pub fn from_signal(signal: Signal) -> Option<Side> {
        match signal {
            Signal::Buy => Some(Side::Buy),
            Signal::Sell => Some(Side::Sell),
            Signal::Hold => None,
        }
    }
}

/// Pipeline phase an agent belongs to. Phases execute in declaration
/// order; agents within a phase run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analysis,
    Debate,
    Risk,
    Portfolio,
    Execution,
}

impl Phase {
    pub const ORDER: [Phase; 5] = [
        Phase::Analysis,
        Phase::Debate,
        Phase::Risk,
        Phase::Portfolio,
        Phase::Execution,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Analysis => "analysis",
            Phase::Debate => "debate",
            Phase::Risk => "risk",
            Phase::Portfolio => "portfolio",
            Phase::Execution => "execution",
        };
        write!(f, "{}", name)
    }
}

/// One agent's contribution to a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSignal {
    pub agent: String,
    pub phase: Phase,
    pub signal: Signal,
    pub confidence: f64,
    pub weight: f64,
    pub reasoning: String,
    /// Opaque per-agent metrics, already JSON-compatible. BTreeMap keeps
    /// serialization order stable across runs.
    #[serde(default)]
    pub indicators: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AgentSignal {
    /// Constructor clamping confidence and weight into [0, 1].
    pub fn new(
        agent: impl Into<String>,
        phase: Phase,
        signal: Signal,
        confidence: f64,
        weight: f64,
        reasoning: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            agent: agent.into(),
            phase,
            signal,
            confidence: confidence.clamp(0.0, 1.0),
            weight: weight.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            indicators: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_indicator(mut self, key: &str, value: serde_json::Value) -> Self {
        self.indicators.insert(key.to_string(), value);
        self
    }
}

/// Final, auditable output of one orchestration cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleDecision {
    pub cycle_id: String,
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub final_signal: Signal,
    pub confidence: f64,
    pub reasoning: String,
    pub agent_signals: Vec<AgentSignal>,
    pub mode: Mode,
}

/// Candidate trade proposed to the risk engine and position manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub instrument: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub confidence: f64,
}

impl TradeSignal {
    /// Stop/target placement rules: for a BUY the stop sits below entry
    /// and the target above; mirrored for a SELL.
    pub fn validate(&self) -> Result<(), TradingError> {
        if self.entry_price <= Decimal::ZERO {
            return Err(TradingError::InvalidSignal {
                reason: format!("entry price must be positive, got {}", self.entry_price),
            });
        }
        let well_placed = match self.side {
            Side::Buy => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Side::Sell => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
        };
        if !well_placed {
            return Err(TradingError::InvalidSignal {
                reason: format!(
                    "{} stop/target misplaced: stop={} entry={} target={}",
                    self.side, self.stop_loss, self.entry_price, self.take_profit
                ),
            });
        }
        Ok(())
    }

    pub fn stop_distance(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }

    pub fn reward_distance(&self) -> Decimal {
        (self.take_profit - self.entry_price).abs()
    }
}
