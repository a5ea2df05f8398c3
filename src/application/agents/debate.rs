//! Debate-phase researchers.
//!
//! The bull argues the long case and the bear the short case; each
//! scores its side by the share of the analysis vote supporting it, so
//! the portfolio manager sees how lopsided the evidence is. The router,
//! when present, supplies richer narration; the stance itself is
//! arithmetic over the analysis signals.

use crate::application::agents::{Agent, CycleContext, CycleState};
use crate::application::providers::{CallOverrides, ProviderRouter};
use crate::domain::signal::{AgentSignal, Phase, Signal};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateSide {
    Bull,
    Bear,
}

impl DebateSide {
    fn agent_name(&self) -> &'static str {
        match self {
            DebateSide::Bull => "bull_researcher",
            DebateSide::Bear => "bear_researcher",
        }
    }

    fn direction(&self) -> Signal {
        match self {
            DebateSide::Bull => Signal::Buy,
            DebateSide::Bear => Signal::Sell,
        }
    }
}

pub struct DebateAgent {
    side: DebateSide,
    router: Option<Arc<ProviderRouter>>,
}

impl DebateAgent {
    pub fn new(side: DebateSide, router: Option<Arc<ProviderRouter>>) -> Self {
        Self { side, router }
    }

    /// Share of the analysis vote supporting this side, in [0, 1].
    fn evidence_share(&self, state: &CycleState) -> f64 {
        let analysis = state.phase_signals(Phase::Analysis);
        let total: f64 = analysis
            .iter()
            .map(|s| s.confidence * s.weight)
            .sum();
        if total <= f64::EPSILON {
            return 0.0;
        }
        let supporting: f64 = analysis
            .iter()
            .filter(|s| s.signal == self.side.direction())
            .map(|s| s.confidence * s.weight)
            .sum();
        supporting / total
    }

    async fn narrate(&self, ctx: &CycleContext, share: f64) -> String {
        let fallback = format!(
            "{:.0}% of the analysis vote supports the {} case",
            share * 100.0,
            match self.side {
                DebateSide::Bull => "bull",
                DebateSide::Bear => "bear",
            }
        );
        let Some(router) = &self.router else {
            return fallback;
        };

        let system = match self.side {
            DebateSide::Bull => {
                "You are the bull researcher in a trading debate. Make the strongest \
                 concise long case from the evidence. Two sentences maximum."
            }
            DebateSide::Bear => {
                "You are the bear researcher in a trading debate. Make the strongest \
                 concise short case from the evidence. Two sentences maximum."
            }
        };
        let user = format!(
            "Instrument {}. {:.0}% of the analysis vote supports your side.",
            ctx.instrument,
            share * 100.0
        );
        let overrides = CallOverrides {
            parallel_group: Some("debate".into()),
            max_tokens: 200,
            ..Default::default()
        };
        match router.call(system, &user, overrides).await {
            Ok(response) => response.text.trim().to_string(),
            Err(e) => {
                debug!("{}: narration skipped ({})", self.side.agent_name(), e);
                fallback
            }
        }
    }
}

#[async_trait]
impl Agent for DebateAgent {
    fn name(&self) -> &str {
        self.side.agent_name()
    }

    fn phase(&self) -> Phase {
        Phase::Debate
    }

    async fn process(&self, ctx: &CycleContext, state: &CycleState) -> Result<AgentSignal> {
        let share = self.evidence_share(state);
        let confidence = share.clamp(0.05, 0.95);
        let reasoning = self.narrate(ctx, share).await;

        Ok(AgentSignal::new(
            self.side.agent_name(),
            Phase::Debate,
            self.side.direction(),
            confidence,
            0.8,
            reasoning,
            ctx.timestamp,
        )
        .with_indicator("evidence_share", serde_json::json!(share)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn analysis_signal(direction: Signal, confidence: f64) -> AgentSignal {
        AgentSignal::new(
            "a",
            Phase::Analysis,
            direction,
            confidence,
            1.0,
            "",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn bull_share_reflects_analysis_vote() {
        let state = CycleState {
            signals: vec![
                analysis_signal(Signal::Buy, 0.8),
                analysis_signal(Signal::Buy, 0.8),
                analysis_signal(Signal::Buy, 0.8),
                analysis_signal(Signal::Hold, 0.5),
            ],
        };
        let bull = DebateAgent::new(DebateSide::Bull, None);
        let share = bull.evidence_share(&state);
        assert!(share > 0.8);

        let bear = DebateAgent::new(DebateSide::Bear, None);
        assert_eq!(bear.evidence_share(&state), 0.0);
    }
}
