//! Shared state flowing through one orchestration cycle.

use crate::domain::mode::Mode;
use crate::domain::ports::{NewsItem, OhlcBar, OptionsChain, SentimentSummary};
use crate::domain::signal::{AgentSignal, Phase, Signal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Everything the agents may look at, fetched once per cycle so every
/// agent reasons over the same view of the market.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub last_price: Option<Decimal>,
    pub bars: Vec<OhlcBar>,
    pub indicators: HashMap<String, f64>,
    pub news: Vec<NewsItem>,
    pub sentiment: Option<SentimentSummary>,
    pub options: Option<OptionsChain>,
}

/// Immutable cycle context handed to every agent.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub cycle_id: String,
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub cycle_number: u64,
    pub market_hours: bool,
    pub mode: Mode,
    pub snapshot: MarketSnapshot,
}

/// Signals accumulated so far. Agents read the phases before their own;
/// the runtime appends in deterministic order after each barrier.
#[derive(Debug, Clone, Default)]
pub struct CycleState {
    pub signals: Vec<AgentSignal>,
}

impl CycleState {
    pub fn phase_signals(&self, phase: Phase) -> Vec<&AgentSignal> {
        self.signals.iter().filter(|s| s.phase == phase).collect()
    }

    pub fn signals_through(&self, last: Phase) -> Vec<&AgentSignal> {
        self.signals.iter().filter(|s| s.phase <= last).collect()
    }
}

/// Confidence-and-weight weighted vote over a set of signals.
///
/// Returns the winning direction and a confidence that blends the
/// winners' average confidence with their share of the total vote, so a
/// contested consensus scores lower than a unanimous one. Hold wins
/// ties.
pub fn weighted_consensus(signals: &[&AgentSignal]) -> (Signal, f64) {
    let mut scores: HashMap<Signal, f64> = HashMap::new();
    for signal in signals {
        *scores.entry(signal.signal).or_default() += signal.confidence * signal.weight;
    }
    let total: f64 = scores.values().sum();
    if total <= f64::EPSILON {
        return (Signal::Hold, 0.0);
    }

    let mut winner = Signal::Hold;
    let mut best = scores.get(&Signal::Hold).copied().unwrap_or(0.0);
    for candidate in [Signal::Buy, Signal::Sell] {
        let score = scores.get(&candidate).copied().unwrap_or(0.0);
        if score > best {
            winner = candidate;
            best = score;
        }
    }

    let winner_share = scores.get(&winner).copied().unwrap_or(0.0) / total;
    let (weight_sum, conf_sum) = signals
        .iter()
        .filter(|s| s.signal == winner)
        .fold((0.0, 0.0), |(w, c), s| {
            (w + s.weight, c + s.confidence * s.weight)
        });
    let mean_confidence = if weight_sum > f64::EPSILON {
        conf_sum / weight_sum
    } else {
        0.0
    };

    (winner, (mean_confidence * winner_share).clamp(0.0, 1.0))
}
