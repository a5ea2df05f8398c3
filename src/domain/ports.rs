//! Capability traits consumed by the core. Concrete broker, indicator,
//! news, and messaging adapters live behind these seams; the core never
//! sees a vendor SDK.

use crate::domain::provider::ProviderDescriptor;
use crate::domain::signal::TradeSignal;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcBar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: Decimal,
    pub price: Decimal,
    pub open_interest: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsChain {
    pub instrument: String,
    pub underlying_price: Decimal,
    pub expiries: Vec<NaiveDate>,
    pub calls: Vec<OptionQuote>,
    pub puts: Vec<OptionQuote>,
    pub put_call_ratio: f64,
    pub max_pain: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub headline: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSummary {
    pub instrument: String,
    /// Aggregate score in [-1, 1].
    pub score: f64,
    pub positive: u32,
    pub negative: u32,
    pub neutral: u32,
    pub window_hours: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Accepted,
    Filled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub client_order_id: String,
    pub venue_order_id: String,
    pub status: ReceiptStatus,
    pub filled_price: Option<Decimal>,
}

/// Market data capability. Read methods return empty-but-typed values
/// when data is missing, never null-with-success.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn latest_tick(&self, instrument: &str) -> Result<Option<Tick>>;
    async fn ohlc(&self, instrument: &str, timeframe: &str, limit: usize) -> Result<Vec<OhlcBar>>;
    async fn options_chain(
        &self,
        instrument: &str,
        strikes: Option<u32>,
    ) -> Result<Option<OptionsChain>>;
    /// Push subscription; ticks flow until the receiver is dropped.
    async fn subscribe(&self, instrument: &str) -> Result<Receiver<Tick>>;
}

/// Venue execution capability, idempotent in `client_order_id`.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn place_order(
        &self,
        signal: &TradeSignal,
        quantity: u32,
        client_order_id: &str,
    ) -> Result<ExecutionReceipt>;
}

#[async_trait]
pub trait TechnicalIndicators: Send + Sync {
    async fn compute(&self, instrument: &str, timeframe: &str) -> Result<HashMap<String, f64>>;
}

#[async_trait]
pub trait NewsFeed: Send + Sync {
    async fn latest_news(&self, instrument: &str, limit: usize) -> Result<Vec<NewsItem>>;
    async fn sentiment_summary(&self, instrument: &str, hours: u32) -> Result<SentimentSummary>;
}

/// Shared key-value store used for virtual-time synchronization and
/// simple counters.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    /// Set when the message arrived through a pattern subscription.
    pub pattern: Option<String>,
    pub payload: String,
}

/// Upstream pub/sub capability consumed by the fan-out gateway.
/// Duplicate subscriptions are idempotent.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<()>;
    async fn psubscribe(&self, pattern: &str) -> Result<()>;
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
    async fn punsubscribe(&self, pattern: &str) -> Result<()>;
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
    /// Bounded poll; returns `None` on timeout.
    async fn get_message(&self, timeout: Duration) -> Result<Option<PubSubMessage>>;
}

/// One LLM completion request as seen by a transport.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Raw completion before the router's accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u64>,
}

/// Unclassified transport failure. The router's classifier turns this
/// into a rate-limit / unavailable / model / transient verdict.
#[derive(Debug, Clone, thiserror::Error)]
#[error("provider call failed (status {status:?}): {message}")]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub message: String,
    pub timed_out: bool,
}

impl TransportFailure {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            status: None,
            message: format!("deadline exceeded after {:?}", after),
            timed_out: true,
        }
    }
}

/// Outbound LLM transport, one per provider dialect.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete(
        &self,
        provider: &ProviderDescriptor,
        request: &CompletionRequest,
    ) -> Result<Completion, TransportFailure>;
}
