//! The multi-agent decision pipeline.
//!
//! Agents are grouped into phases (analysis, debate, risk, portfolio,
//! execution). Agents within a phase run concurrently and barrier-join
//! before the next phase; the aggregated signal order is deterministic:
//! phase order first, configured agent order within a phase. A failing
//! agent contributes a zero-confidence HOLD and never aborts the cycle.

pub mod analysis;
pub mod context;
pub mod debate;
pub mod execution;
pub mod portfolio_manager;
pub mod risk_stance;

pub use context::{CycleContext, CycleState, MarketSnapshot, weighted_consensus};

use crate::application::mode_controller::ModeScopedStores;
use crate::domain::repositories::DiscussionRecord;
use crate::domain::signal::{AgentSignal, CycleDecision, Phase, Signal};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One pipeline participant. `process` reads the cycle context plus the
/// signals of earlier phases and contributes exactly one signal.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    fn phase(&self) -> Phase;
    async fn process(&self, ctx: &CycleContext, state: &CycleState) -> Result<AgentSignal>;
}

pub struct AgentRuntime {
    agents: Vec<Arc<dyn Agent>>,
    stores: Arc<ModeScopedStores>,
}

impl AgentRuntime {
    pub fn new(agents: Vec<Arc<dyn Agent>>, stores: Arc<ModeScopedStores>) -> Self {
        Self { agents, stores }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Run the full pipeline for one cycle.
    #[instrument(skip(self, ctx), fields(cycle = %ctx.cycle_id, instrument = %ctx.instrument))]
    pub async fn run_cycle(&self, ctx: &CycleContext) -> Result<CycleDecision> {
        let ctx = Arc::new(ctx.clone());
        let mut state = CycleState::default();

        for phase in Phase::ORDER {
            let phase_agents: Vec<Arc<dyn Agent>> = self
                .agents
                .iter()
                .filter(|a| a.phase() == phase)
                .cloned()
                .collect();
            if phase_agents.is_empty() {
                continue;
            }

            // Every agent in the phase sees the same pre-phase state.
            let phase_state = Arc::new(state.clone());
            let tasks = phase_agents.iter().map(|agent| {
                let agent = agent.clone();
                let ctx = ctx.clone();
                let phase_state = phase_state.clone();
                tokio::spawn(async move {
                    let started = std::time::Instant::now();
                    let result = agent.process(&ctx, &phase_state).await;
                    (started.elapsed(), result)
                })
            });

            let outcomes = join_all(tasks).await;
            // Barrier passed: append in configured order.
            for (agent, outcome) in phase_agents.iter().zip(outcomes) {
                let signal = match outcome {
                    Ok((elapsed, Ok(mut signal))) => {
                        signal.indicators.insert(
                            "elapsed_ms".into(),
                            serde_json::json!(elapsed.as_millis() as u64),
                        );
                        signal
                    }
                    Ok((elapsed, Err(e))) => {
                        warn!("Agent {} failed: {}", agent.name(), e);
                        AgentSignal::new(
                            agent.name(),
                            phase,
                            Signal::Hold,
                            0.0,
                            0.0,
                            format!("agent failed: {}", e),
                            ctx.timestamp,
                        )
                        .with_indicator(
                            "elapsed_ms",
                            serde_json::json!(elapsed.as_millis() as u64),
                        )
                    }
                    Err(join_error) => {
                        warn!("Agent {} panicked: {}", agent.name(), join_error);
                        AgentSignal::new(
                            agent.name(),
                            phase,
                            Signal::Hold,
                            0.0,
                            0.0,
                            format!("agent panicked: {}", join_error),
                            ctx.timestamp,
                        )
                    }
                };
                self.persist_discussion(&ctx, &signal).await;
                state.signals.push(signal);
            }
        }

        let decision = self.conclude(&ctx, state);
        info!(
            "Cycle {} concluded: {} at {:.2} confidence",
            decision.cycle_id, decision.final_signal, decision.confidence
        );
        Ok(decision)
    }

    /// Derive the cycle decision from the accumulated signals: the
    /// execution signal leads, then the portfolio manager, then a
    /// weighted consensus over everything.
    fn conclude(&self, ctx: &CycleContext, state: CycleState) -> CycleDecision {
        let lead = state
            .phase_signals(Phase::Execution)
            .into_iter()
            .chain(state.phase_signals(Phase::Portfolio))
            .next()
            .map(|s| (s.signal, s.confidence, s.reasoning.clone()));

        let (final_signal, confidence, reasoning) = match lead {
            Some(lead) => lead,
            None => {
                let refs: Vec<&AgentSignal> = state.signals.iter().collect();
                let (signal, confidence) = weighted_consensus(&refs);
                (signal, confidence, "consensus over agent signals".into())
            }
        };

        CycleDecision {
            cycle_id: ctx.cycle_id.clone(),
            instrument: ctx.instrument.clone(),
            timestamp: ctx.timestamp,
            final_signal,
            confidence,
            reasoning,
            agent_signals: state.signals,
            mode: ctx.mode,
        }
    }

    async fn persist_discussion(&self, ctx: &CycleContext, signal: &AgentSignal) {
        let record = DiscussionRecord {
            cycle_id: ctx.cycle_id.clone(),
            instrument: ctx.instrument.clone(),
            mode: ctx.mode,
            signal: signal.clone(),
        };
        let store = self.stores.decisions().await;
        if let Err(e) = store.put_discussion(&record).await {
            warn!("Failed to persist discussion for {}: {}", signal.agent, e);
        }
    }
}

/// Interpret an LLM reply as a trading verdict. Tries a JSON object of
/// the form `{"signal": "BUY", "confidence": 0.8, "reasoning": "..."}`
/// first, then falls back to scanning for a direction keyword.
pub fn parse_llm_verdict(text: &str) -> Option<(Signal, f64, String)> {
    let trimmed = text.trim();
    let json_slice = trimmed
        .find('{')
        .and_then(|start| trimmed.rfind('}').map(|end| &trimmed[start..=end]));
    if let Some(slice) = json_slice
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(slice)
    {
        let signal = match value
            .get("signal")
            .and_then(|s| s.as_str())
            .map(|s| s.to_uppercase())
        {
            Some(s) if s.contains("BUY") => Some(Signal::Buy),
            Some(s) if s.contains("SELL") => Some(Signal::Sell),
            Some(s) if s.contains("HOLD") => Some(Signal::Hold),
            _ => None,
        };
        if let Some(signal) = signal {
            let confidence = value
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            let reasoning = value
                .get("reasoning")
                .and_then(|r| r.as_str())
                .unwrap_or(trimmed)
                .to_string();
            return Some((signal, confidence, reasoning));
        }
    }

    let upper = trimmed.to_uppercase();
    for (keyword, signal) in [
        ("BUY", Signal::Buy),
        ("SELL", Signal::Sell),
        ("HOLD", Signal::Hold),
    ] {
        if upper.contains(keyword) {
            return Some((signal, 0.5, trimmed.to_string()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_verdict() {
        let (signal, confidence, reasoning) =
            parse_llm_verdict(r#"{"signal": "BUY", "confidence": 0.82, "reasoning": "momentum"}"#)
                .unwrap();
        assert_eq!(signal, Signal::Buy);
        assert!((confidence - 0.82).abs() < 1e-9);
        assert_eq!(reasoning, "momentum");
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let text = "Here is my analysis:\n{\"signal\": \"SELL\", \"confidence\": 0.6}\nThanks.";
        let (signal, confidence, _) = parse_llm_verdict(text).unwrap();
        assert_eq!(signal, Signal::Sell);
        assert!((confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_keyword_scan() {
        let (signal, confidence, _) =
            parse_llm_verdict("I would HOLD here given the uncertainty").unwrap();
        assert_eq!(signal, Signal::Hold);
        assert!((confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_llm_verdict("the weather is nice").is_none());
    }
}
