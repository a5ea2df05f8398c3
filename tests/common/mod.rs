//! Shared builders for the integration suite.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::Receiver;
use tradecouncil::application::agents::{Agent, CycleContext, CycleState};
use tradecouncil::application::alerts::AlertRouter;
use tradecouncil::application::clock::SharedClock;
use tradecouncil::application::mode_controller::{
    ModeController, ModeScopedStores, StorePair,
};
use tradecouncil::domain::calendar::MarketCalendar;
use tradecouncil::domain::mode::Mode;
use tradecouncil::domain::ports::{
    Completion, CompletionRequest, LlmTransport, MarketDataSource, NewsFeed, OhlcBar,
    OptionsChain, SentimentSummary, TechnicalIndicators, Tick, TransportFailure,
};
use tradecouncil::domain::provider::{ProviderDescriptor, ProviderKind};
use tradecouncil::domain::signal::{AgentSignal, Phase, Signal};
use tradecouncil::infrastructure::memory::{
    InMemoryAlertStore, InMemoryDecisionStore, InMemoryModeConfigStore, InMemoryTradeStore,
};
use tradecouncil::infrastructure::alert_backends::StoreBackend;

/// IST wall-clock time expressed in UTC.
pub fn ist(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    let offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
    offset
        .with_ymd_and_hms(y, m, d, h, min, s)
        .unwrap()
        .with_timezone(&Utc)
}

/// A local clock pinned to a virtual instant.
pub async fn clock_at(at: DateTime<Utc>) -> Arc<SharedClock> {
    let clock = Arc::new(SharedClock::new());
    clock.set_virtual(at).await.unwrap();
    clock
}

pub struct TestStores {
    pub stores: Arc<ModeScopedStores>,
    pub decisions: Arc<InMemoryDecisionStore>,
    pub trades: Arc<InMemoryTradeStore>,
}

/// One in-memory store pair bound to every mode.
pub fn memory_stores(initial: Mode) -> TestStores {
    let decisions = Arc::new(InMemoryDecisionStore::new());
    let trades = Arc::new(InMemoryTradeStore::new());
    let pair = StorePair {
        decisions: decisions.clone(),
        trades: trades.clone(),
    };
    let mut bindings = HashMap::new();
    for mode in [Mode::SimClosed, Mode::SimOpen, Mode::Live] {
        bindings.insert(mode, pair.clone());
    }
    TestStores {
        stores: Arc::new(ModeScopedStores::new(bindings, initial).unwrap()),
        decisions,
        trades,
    }
}

pub async fn mode_controller(
    clock: Arc<SharedClock>,
    calendar: MarketCalendar,
    stores: Arc<ModeScopedStores>,
    default_mode: Mode,
) -> Arc<ModeController> {
    Arc::new(
        ModeController::load(
            clock,
            calendar,
            stores,
            Arc::new(InMemoryModeConfigStore::new()),
            default_mode,
        )
        .await
        .unwrap(),
    )
}

/// Alert router delivering into an inspectable in-memory store.
pub fn alert_router(clock: Arc<SharedClock>) -> (Arc<AlertRouter>, Arc<InMemoryAlertStore>) {
    let store = Arc::new(InMemoryAlertStore::new());
    let mut router = AlertRouter::new(clock);
    router.add_backend(Arc::new(StoreBackend::new(store.clone())));
    (Arc::new(router), store)
}

pub fn provider(name: &str, priority: u8, per_minute: u32) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.to_string(),
        kind: ProviderKind::Groq,
        model: "llama-3.3-70b-versatile".to_string(),
        priority,
        per_minute_limit: per_minute,
        per_day_limit: 100_000,
        per_day_token_quota: None,
        cost_per_1k_tokens: Decimal::ZERO,
        api_key: Some("test-key".to_string()),
        base_url: None,
    }
}

/// Transport wrapper counting how many calls actually went out.
pub struct CountingTransport<T> {
    inner: T,
    calls: AtomicUsize,
}

impl<T> CountingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CountingTransport<tradecouncil::infrastructure::llm::ScriptedTransport> {
    pub async fn script(
        &self,
        provider: &str,
        outcome: Result<Completion, TransportFailure>,
    ) {
        self.inner.script(provider, outcome).await;
    }
}

#[async_trait]
impl<T: LlmTransport> LlmTransport for CountingTransport<T> {
    async fn complete(
        &self,
        provider: &ProviderDescriptor,
        request: &CompletionRequest,
    ) -> Result<Completion, TransportFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.complete(provider, request).await
    }
}

/// Agent emitting one fixed signal.
pub struct ScriptedAgent {
    pub name: String,
    pub phase: Phase,
    pub signal: Signal,
    pub confidence: f64,
}

impl ScriptedAgent {
    pub fn new(name: &str, phase: Phase, signal: Signal, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            phase,
            signal,
            confidence,
        })
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    async fn process(
        &self,
        ctx: &CycleContext,
        _state: &CycleState,
    ) -> anyhow::Result<AgentSignal> {
        Ok(AgentSignal::new(
            self.name.clone(),
            self.phase,
            self.signal,
            self.confidence,
            1.0,
            "scripted",
            ctx.timestamp,
        ))
    }
}

/// Market stub with one fixed price, enough bars for context building.
pub struct StaticMarket {
    pub price: Decimal,
    pub clock: Arc<SharedClock>,
}

#[async_trait]
impl MarketDataSource for StaticMarket {
    async fn latest_tick(&self, instrument: &str) -> anyhow::Result<Option<Tick>> {
        Ok(Some(Tick {
            instrument: instrument.to_string(),
            price: self.price,
            timestamp: self.clock.now().await,
        }))
    }

    async fn ohlc(
        &self,
        _instrument: &str,
        _timeframe: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<OhlcBar>> {
        Ok(Vec::new())
    }

    async fn options_chain(
        &self,
        _instrument: &str,
        _strikes: Option<u32>,
    ) -> anyhow::Result<Option<OptionsChain>> {
        Ok(None)
    }

    async fn subscribe(&self, _instrument: &str) -> anyhow::Result<Receiver<Tick>> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }
}

pub struct StaticIndicators;

#[async_trait]
impl TechnicalIndicators for StaticIndicators {
    async fn compute(
        &self,
        _instrument: &str,
        _timeframe: &str,
    ) -> anyhow::Result<HashMap<String, f64>> {
        let mut map = HashMap::new();
        map.insert("rsi".to_string(), 55.0);
        Ok(map)
    }
}

pub struct StaticNews;

#[async_trait]
impl NewsFeed for StaticNews {
    async fn latest_news(
        &self,
        _instrument: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<tradecouncil::domain::ports::NewsItem>> {
        Ok(Vec::new())
    }

    async fn sentiment_summary(
        &self,
        instrument: &str,
        hours: u32,
    ) -> anyhow::Result<SentimentSummary> {
        Ok(SentimentSummary {
            instrument: instrument.to_string(),
            score: 0.0,
            positive: 0,
            negative: 0,
            neutral: 0,
            window_hours: hours,
        })
    }
}
