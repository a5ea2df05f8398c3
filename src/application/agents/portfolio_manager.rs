//! Portfolio-manager agent: folds every upstream opinion into the
//! cycle's directional call.

use crate::application::agents::{Agent, CycleContext, CycleState, weighted_consensus};
use crate::application::providers::{CallOverrides, ProviderRouter};
use crate::domain::signal::{AgentSignal, Phase, Signal};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct PortfolioManagerAgent {
    router: Option<Arc<ProviderRouter>>,
}

impl PortfolioManagerAgent {
    pub fn new(router: Option<Arc<ProviderRouter>>) -> Self {
        Self { router }
    }

    async fn narrate(&self, ctx: &CycleContext, signal: Signal, confidence: f64) -> String {
        let fallback = format!(
            "weighted consensus across analysis, debate and risk: {} at {:.2}",
            signal, confidence
        );
        let Some(router) = &self.router else {
            return fallback;
        };
        let user = format!(
            "Instrument {}. The desk consensus is {} with confidence {:.2}. \
             Summarize the decision rationale in two sentences.",
            ctx.instrument, signal, confidence
        );
        let overrides = CallOverrides {
            max_tokens: 200,
            ..Default::default()
        };
        match router
            .call(
                "You are the portfolio manager closing a multi-agent trading debate.",
                &user,
                overrides,
            )
            .await
        {
            Ok(response) => response.text.trim().to_string(),
            Err(e) => {
                debug!("portfolio_manager: narration skipped ({})", e);
                fallback
            }
        }
    }
}

#[async_trait]
impl Agent for PortfolioManagerAgent {
    fn name(&self) -> &str {
        "portfolio_manager"
    }

    fn phase(&self) -> Phase {
        Phase::Portfolio
    }

    async fn process(&self, ctx: &CycleContext, state: &CycleState) -> Result<AgentSignal> {
        let upstream = state.signals_through(Phase::Risk);
        let (signal, confidence) = weighted_consensus(&upstream);
        let reasoning = self.narrate(ctx, signal, confidence).await;

        Ok(AgentSignal::new(
            "portfolio_manager",
            Phase::Portfolio,
            signal,
            confidence,
            1.0,
            reasoning,
            ctx.timestamp,
        ))
    }
}
