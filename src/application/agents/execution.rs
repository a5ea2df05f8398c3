//! Execution-phase agent: turns the portfolio manager's call into
//! concrete entry, stop and target levels.

use crate::application::agents::{Agent, CycleContext, CycleState};
use crate::domain::signal::{AgentSignal, CycleDecision, Phase, Side, Signal, TradeSignal};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Stop distance as a percentage of entry.
    pub stop_pct: Decimal,
    /// Target distance as a percentage of entry.
    pub target_pct: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            stop_pct: Decimal::TWO,
            target_pct: Decimal::from(4),
        }
    }
}

pub struct ExecutionAgent {
    config: ExecutionConfig,
}

impl ExecutionAgent {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    fn levels(&self, side: Side, entry: Decimal) -> (Decimal, Decimal) {
        let stop_distance = entry * self.config.stop_pct / Decimal::ONE_HUNDRED;
        let target_distance = entry * self.config.target_pct / Decimal::ONE_HUNDRED;
        match side {
            Side::Buy => (entry - stop_distance, entry + target_distance),
            Side::Sell => (entry + stop_distance, entry - target_distance),
        }
    }
}

#[async_trait]
impl Agent for ExecutionAgent {
    fn name(&self) -> &str {
        "execution"
    }

    fn phase(&self) -> Phase {
        Phase::Execution
    }

    async fn process(&self, ctx: &CycleContext, state: &CycleState) -> Result<AgentSignal> {
        let Some(lead) = state.phase_signals(Phase::Portfolio).into_iter().next().cloned()
        else {
            return Ok(AgentSignal::new(
                "execution",
                Phase::Execution,
                Signal::Hold,
                0.0,
                1.0,
                "no portfolio decision to execute",
                ctx.timestamp,
            ));
        };

        let Some(side) = Side::from_signal(lead.signal) else {
            return Ok(AgentSignal::new(
                "execution",
                Phase::Execution,
                Signal::Hold,
                lead.confidence,
                1.0,
                "holding; nothing to execute",
                ctx.timestamp,
            ));
        };

        let Some(entry) = ctx.snapshot.last_price else {
            return Ok(AgentSignal::new(
                "execution",
                Phase::Execution,
                Signal::Hold,
                0.0,
                1.0,
                "no market price available for entry",
                ctx.timestamp,
            ));
        };

        let (stop, target) = self.levels(side, entry);
        let signal = AgentSignal::new(
            "execution",
            Phase::Execution,
            lead.signal,
            lead.confidence,
            1.0,
            format!(
                "{} {} at {} (stop {}, target {})",
                lead.signal, ctx.instrument, entry, stop, target
            ),
            ctx.timestamp,
        )
        .with_indicator("entry_price", serde_json::json!(entry.to_f64()))
        .with_indicator("stop_loss", serde_json::json!(stop.to_f64()))
        .with_indicator("take_profit", serde_json::json!(target.to_f64()));

        Ok(signal)
    }
}

/// Reconstruct the tradeable signal from a cycle decision's execution
/// record. `None` for HOLD decisions or when levels are missing.
pub fn extract_trade_signal(decision: &CycleDecision) -> Option<TradeSignal> {
    let side = Side::from_signal(decision.final_signal)?;
    let execution = decision
        .agent_signals
        .iter()
        .find(|s| s.phase == Phase::Execution)?;

    let level = |key: &str| -> Option<Decimal> {
        execution
            .indicators
            .get(key)
            .and_then(|v| v.as_f64())
            .and_then(Decimal::from_f64)
    };

    let signal = TradeSignal {
        instrument: decision.instrument.clone(),
        side,
        entry_price: level("entry_price")?,
        stop_loss: level("stop_loss")?,
        take_profit: level("take_profit")?,
        confidence: decision.confidence,
    };
    signal.validate().ok()?;
    Some(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mode::Mode;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ctx(price: Option<Decimal>) -> CycleContext {
        let mut snapshot = crate::application::agents::MarketSnapshot::default();
        snapshot.last_price = price;
        CycleContext {
            cycle_id: "c1".into(),
            instrument: "NIFTY".into(),
            timestamp: Utc::now(),
            cycle_number: 1,
            market_hours: true,
            mode: Mode::SimOpen,
            snapshot,
        }
    }

    fn portfolio_state(signal: Signal, confidence: f64) -> CycleState {
        CycleState {
            signals: vec![AgentSignal::new(
                "portfolio_manager",
                Phase::Portfolio,
                signal,
                confidence,
                1.0,
                "",
                Utc::now(),
            )],
        }
    }

    #[tokio::test]
    async fn buy_levels_bracket_entry() {
        let agent = ExecutionAgent::new(ExecutionConfig::default());
        let signal = agent
            .process(&ctx(Some(dec!(100))), &portfolio_state(Signal::Buy, 0.78))
            .await
            .unwrap();
        assert_eq!(signal.signal, Signal::Buy);
        assert_eq!(signal.indicators["entry_price"].as_f64(), Some(100.0));
        assert_eq!(signal.indicators["stop_loss"].as_f64(), Some(98.0));
        assert_eq!(signal.indicators["take_profit"].as_f64(), Some(104.0));
    }

    #[tokio::test]
    async fn hold_without_price() {
        let agent = ExecutionAgent::new(ExecutionConfig::default());
        let signal = agent
            .process(&ctx(None), &portfolio_state(Signal::Buy, 0.78))
            .await
            .unwrap();
        assert_eq!(signal.signal, Signal::Hold);
    }

    #[tokio::test]
    async fn extract_round_trips() {
        let agent = ExecutionAgent::new(ExecutionConfig::default());
        let context = ctx(Some(dec!(200)));
        let execution = agent
            .process(&context, &portfolio_state(Signal::Sell, 0.7))
            .await
            .unwrap();

        let decision = CycleDecision {
            cycle_id: "c1".into(),
            instrument: "NIFTY".into(),
            timestamp: context.timestamp,
            final_signal: Signal::Sell,
            confidence: 0.7,
            reasoning: "".into(),
            agent_signals: vec![execution],
            mode: Mode::SimOpen,
        };

        let trade = extract_trade_signal(&decision).unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.entry_price, dec!(200));
        assert!(trade.stop_loss > trade.entry_price);
        assert!(trade.take_profit < trade.entry_price);
    }

    #[test]
    fn hold_decision_yields_no_trade() {
        let decision = CycleDecision {
            cycle_id: "c1".into(),
            instrument: "NIFTY".into(),
            timestamp: Utc::now(),
            final_signal: Signal::Hold,
            confidence: 0.4,
            reasoning: "".into(),
            agent_signals: vec![],
            mode: Mode::SimOpen,
        };
        assert!(extract_trade_signal(&decision).is_none());
    }
}
