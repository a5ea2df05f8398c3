//! Risk-phase personalities: aggressive, conservative, neutral.
//!
//! Each stance re-scores the consensus of the analysis and debate
//! phases through its own appetite, so the portfolio manager weighs
//! three independent risk opinions rather than one.

use crate::application::agents::{Agent, CycleContext, CycleState, weighted_consensus};
use crate::domain::signal::{AgentSignal, Phase, Signal};
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskStance {
    Aggressive,
    Conservative,
    Neutral,
}

impl RiskStance {
    fn agent_name(&self) -> &'static str {
        match self {
            RiskStance::Aggressive => "aggressive",
            RiskStance::Conservative => "conservative",
            RiskStance::Neutral => "neutral",
        }
    }
}

pub struct RiskStanceAgent {
    stance: RiskStance,
}

impl RiskStanceAgent {
    pub fn new(stance: RiskStance) -> Self {
        Self { stance }
    }
}

#[async_trait]
impl Agent for RiskStanceAgent {
    fn name(&self) -> &str {
        self.stance.agent_name()
    }

    fn phase(&self) -> Phase {
        Phase::Risk
    }

    async fn process(&self, ctx: &CycleContext, state: &CycleState) -> Result<AgentSignal> {
        let upstream = state.signals_through(Phase::Debate);
        let (direction, confidence) = weighted_consensus(&upstream);

        let (signal, confidence, reasoning) = match self.stance {
            RiskStance::Aggressive => (
                direction,
                (confidence * 1.2).min(0.95),
                format!("appetite for the {} consensus; sizing up conviction", direction),
            ),
            RiskStance::Conservative => {
                if direction != Signal::Hold && confidence < 0.6 {
                    (
                        Signal::Hold,
                        0.6,
                        format!(
                            "consensus {} at {:.2} is below the conviction bar",
                            direction, confidence
                        ),
                    )
                } else {
                    (
                        direction,
                        confidence * 0.8,
                        "consensus acceptable with reduced conviction".to_string(),
                    )
                }
            }
            RiskStance::Neutral => (
                direction,
                confidence,
                format!("balanced view of the {} consensus", direction),
            ),
        };

        Ok(AgentSignal::new(
            self.stance.agent_name(),
            Phase::Risk,
            signal,
            confidence,
            1.0,
            reasoning,
            ctx.timestamp,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state_with_consensus() -> CycleState {
        let mut state = CycleState::default();
        for _ in 0..3 {
            state.signals.push(AgentSignal::new(
                "a",
                Phase::Analysis,
                Signal::Buy,
                0.8,
                1.0,
                "",
                Utc::now(),
            ));
        }
        state
    }

    fn ctx() -> CycleContext {
        CycleContext {
            cycle_id: "c1".into(),
            instrument: "NIFTY".into(),
            timestamp: Utc::now(),
            cycle_number: 1,
            market_hours: true,
            mode: crate::domain::mode::Mode::SimOpen,
            snapshot: Default::default(),
        }
    }

    #[tokio::test]
    async fn aggressive_scales_up_conservative_down() {
        let state = state_with_consensus();
        let aggressive = RiskStanceAgent::new(RiskStance::Aggressive)
            .process(&ctx(), &state)
            .await
            .unwrap();
        let conservative = RiskStanceAgent::new(RiskStance::Conservative)
            .process(&ctx(), &state)
            .await
            .unwrap();
        let neutral = RiskStanceAgent::new(RiskStance::Neutral)
            .process(&ctx(), &state)
            .await
            .unwrap();

        assert_eq!(aggressive.signal, Signal::Buy);
        assert!(aggressive.confidence > neutral.confidence);
        assert!(conservative.confidence < neutral.confidence);
    }

    #[tokio::test]
    async fn conservative_holds_weak_consensus() {
        let mut state = CycleState::default();
        state.signals.push(AgentSignal::new(
            "a",
            Phase::Analysis,
            Signal::Buy,
            0.4,
            1.0,
            "",
            Utc::now(),
        ));
        let signal = RiskStanceAgent::new(RiskStance::Conservative)
            .process(&ctx(), &state)
            .await
            .unwrap();
        assert_eq!(signal.signal, Signal::Hold);
    }
}
