//! Analysis-phase agents: technical, fundamental, sentiment and macro.
//!
//! Each builds a prompt over its slice of the market snapshot and asks
//! the provider router for a verdict. When every provider is down the
//! agent degrades to an indicator-driven heuristic rather than failing
//! the cycle.

use crate::application::agents::{Agent, CycleContext, CycleState, parse_llm_verdict};
use crate::application::providers::{CallOverrides, ProviderRouter};
use crate::domain::signal::{AgentSignal, Phase, Signal};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Technical,
    Fundamental,
    Sentiment,
    Macro,
}

impl AnalysisKind {
    pub fn agent_name(&self) -> &'static str {
        match self {
            AnalysisKind::Technical => "technical",
            AnalysisKind::Fundamental => "fundamental",
            AnalysisKind::Sentiment => "sentiment",
            AnalysisKind::Macro => "macro",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            AnalysisKind::Technical => {
                "You are a technical analyst for an intraday trading desk. \
                 Given indicator readings and recent OHLC bars, reply with a JSON object \
                 {\"signal\": \"BUY|SELL|HOLD\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}."
            }
            AnalysisKind::Fundamental => {
                "You are a derivatives and positioning analyst. Judge the instrument from \
                 the options chain (put/call ratio, max pain, open interest). Reply with a JSON \
                 object {\"signal\": \"BUY|SELL|HOLD\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}."
            }
            AnalysisKind::Sentiment => {
                "You are a news-sentiment analyst. Judge near-term direction from the \
                 headlines and the aggregate sentiment score. Reply with a JSON object \
                 {\"signal\": \"BUY|SELL|HOLD\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}."
            }
            AnalysisKind::Macro => {
                "You are a macro strategist. Judge whether the broad environment supports \
                 risk-taking in this instrument today. Reply with a JSON object \
                 {\"signal\": \"BUY|SELL|HOLD\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}."
            }
        }
    }

    fn user_message(&self, ctx: &CycleContext) -> String {
        let snapshot = &ctx.snapshot;
        match self {
            AnalysisKind::Technical => {
                let mut lines = vec![format!(
                    "Instrument {} at {}. Last price: {}.",
                    ctx.instrument,
                    ctx.timestamp.to_rfc3339(),
                    snapshot
                        .last_price
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "unknown".into())
                )];
                let mut keys: Vec<_> = snapshot.indicators.keys().collect();
                keys.sort();
                for key in keys {
                    lines.push(format!("{} = {:.4}", key, snapshot.indicators[key]));
                }
                for bar in snapshot.bars.iter().rev().take(10) {
                    lines.push(format!(
                        "bar {} O={} H={} L={} C={} V={}",
                        bar.timestamp.format("%H:%M"),
                        bar.open,
                        bar.high,
                        bar.low,
                        bar.close,
                        bar.volume
                    ));
                }
                lines.join("\n")
            }
            AnalysisKind::Fundamental => match &snapshot.options {
                Some(chain) => format!(
                    "Instrument {}. Underlying {}. Put/call ratio {:.2}. Max pain {}. \
                     {} calls, {} puts quoted.",
                    ctx.instrument,
                    chain.underlying_price,
                    chain.put_call_ratio,
                    chain.max_pain,
                    chain.calls.len(),
                    chain.puts.len()
                ),
                None => format!(
                    "Instrument {}. No options chain available today.",
                    ctx.instrument
                ),
            },
            AnalysisKind::Sentiment => {
                let mut lines = vec![format!("Instrument {}.", ctx.instrument)];
                if let Some(summary) = &snapshot.sentiment {
                    lines.push(format!(
                        "Aggregate sentiment {:.2} over the last {}h ({}+ / {}- / {}=).",
                        summary.score,
                        summary.window_hours,
                        summary.positive,
                        summary.negative,
                        summary.neutral
                    ));
                }
                for item in snapshot.news.iter().take(8) {
                    lines.push(format!("- {} ({})", item.headline, item.source));
                }
                lines.join("\n")
            }
            AnalysisKind::Macro => format!(
                "Instrument {}. Session time {}. Market hours: {}. \
                 Recent close {}.",
                ctx.instrument,
                ctx.timestamp.to_rfc3339(),
                ctx.market_hours,
                snapshot
                    .last_price
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unknown".into())
            ),
        }
    }

    /// Indicator-driven verdict used when no provider is reachable.
    fn heuristic(&self, ctx: &CycleContext) -> (Signal, f64, String) {
        let snapshot = &ctx.snapshot;
        match self {
            AnalysisKind::Technical => {
                if let Some(rsi) = snapshot.indicators.get("rsi") {
                    if *rsi < 30.0 {
                        return (Signal::Buy, 0.55, format!("RSI oversold at {:.1}", rsi));
                    }
                    if *rsi > 70.0 {
                        return (Signal::Sell, 0.55, format!("RSI overbought at {:.1}", rsi));
                    }
                }
                match (
                    snapshot.indicators.get("sma_fast"),
                    snapshot.indicators.get("sma_slow"),
                ) {
                    (Some(fast), Some(slow)) if fast > slow => (
                        Signal::Buy,
                        0.5,
                        "fast average above slow average".to_string(),
                    ),
                    (Some(fast), Some(slow)) if fast < slow => (
                        Signal::Sell,
                        0.5,
                        "fast average below slow average".to_string(),
                    ),
                    _ => (Signal::Hold, 0.4, "no directional edge".to_string()),
                }
            }
            AnalysisKind::Fundamental => match &snapshot.options {
                Some(chain) if chain.put_call_ratio > 1.3 => (
                    Signal::Buy,
                    0.5,
                    format!("elevated put/call ratio {:.2}", chain.put_call_ratio),
                ),
                Some(chain) if chain.put_call_ratio < 0.7 => (
                    Signal::Sell,
                    0.5,
                    format!("depressed put/call ratio {:.2}", chain.put_call_ratio),
                ),
                _ => (Signal::Hold, 0.4, "positioning balanced".to_string()),
            },
            AnalysisKind::Sentiment => match &snapshot.sentiment {
                Some(summary) if summary.score > 0.2 => (
                    Signal::Buy,
                    0.5,
                    format!("positive news flow ({:.2})", summary.score),
                ),
                Some(summary) if summary.score < -0.2 => (
                    Signal::Sell,
                    0.5,
                    format!("negative news flow ({:.2})", summary.score),
                ),
                _ => (Signal::Hold, 0.4, "news flow neutral".to_string()),
            },
            AnalysisKind::Macro => (Signal::Hold, 0.5, "no macro catalyst".to_string()),
        }
    }
}

pub struct AnalysisAgent {
    kind: AnalysisKind,
    router: Option<Arc<ProviderRouter>>,
    weight: f64,
}

impl AnalysisAgent {
    pub fn new(kind: AnalysisKind, router: Option<Arc<ProviderRouter>>) -> Self {
        Self {
            kind,
            router,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl Agent for AnalysisAgent {
    fn name(&self) -> &str {
        self.kind.agent_name()
    }

    fn phase(&self) -> Phase {
        Phase::Analysis
    }

    async fn process(&self, ctx: &CycleContext, _state: &CycleState) -> Result<AgentSignal> {
        let (signal, confidence, reasoning, via_llm) = match &self.router {
            Some(router) => {
                let overrides = CallOverrides {
                    parallel_group: Some("analysis".into()),
                    ..Default::default()
                };
                match router
                    .call(self.kind.system_prompt(), &self.kind.user_message(ctx), overrides)
                    .await
                {
                    Ok(response) => match parse_llm_verdict(&response.text) {
                        Some((signal, confidence, reasoning)) => {
                            (signal, confidence, reasoning, true)
                        }
                        None => {
                            debug!(
                                "{}: unparseable LLM reply, using heuristic",
                                self.kind.agent_name()
                            );
                            let (s, c, r) = self.kind.heuristic(ctx);
                            (s, c, r, false)
                        }
                    },
                    Err(e) => {
                        debug!(
                            "{}: router unavailable ({}), using heuristic",
                            self.kind.agent_name(),
                            e
                        );
                        let (s, c, r) = self.kind.heuristic(ctx);
                        (s, c, r, false)
                    }
                }
            }
            None => {
                let (s, c, r) = self.kind.heuristic(ctx);
                (s, c, r, false)
            }
        };

        let mut agent_signal = AgentSignal::new(
            self.kind.agent_name(),
            Phase::Analysis,
            signal,
            confidence,
            self.weight,
            reasoning,
            ctx.timestamp,
        )
        .with_indicator("via_llm", serde_json::json!(via_llm));

        if self.kind == AnalysisKind::Technical {
            for (key, value) in &ctx.snapshot.indicators {
                agent_signal
                    .indicators
                    .insert(key.clone(), serde_json::json!(value));
            }
            if let Some(price) = ctx.snapshot.last_price {
                agent_signal
                    .indicators
                    .insert("last_price".into(), serde_json::json!(price.to_f64()));
            }
        }

        Ok(agent_signal)
    }
}
