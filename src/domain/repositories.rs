//! Persistence seams exposed by the core.
//!
//! Live and simulated modes bind different implementations behind these
//! traits so their data never collides; tests use the in-memory
//! implementations from `infrastructure::memory`.

use crate::domain::alert::Alert;
use crate::domain::mode::Mode;
use crate::domain::provider::UsageRecord;
use crate::domain::signal::{AgentSignal, CycleDecision, Side};
use crate::domain::trading::Position;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One agent signal persisted with its cycle context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionRecord {
    pub cycle_id: String,
    pub instrument: String,
    pub mode: Mode,
    pub signal: AgentSignal,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub instrument: Option<String>,
    pub mode: Option<Mode>,
    pub since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn put_decision(&self, decision: &CycleDecision) -> Result<()>;
    async fn put_discussion(&self, discussion: &DiscussionRecord) -> Result<()>;
    async fn list_decisions(&self, filter: &DecisionFilter, limit: usize)
    -> Result<Vec<CycleDecision>>;
    async fn list_discussions(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<DiscussionRecord>>;
}

/// A completed (or still open) trade as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub instrument: String,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
    pub mode: Mode,
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub instrument: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn put_trade(&self, trade: &TradeRecord) -> Result<()>;
    async fn list_trades(&self, filter: &TradeFilter) -> Result<Vec<TradeRecord>>;
    async fn put_position(&self, position: &Position) -> Result<()>;
    async fn update_position(&self, position: &Position) -> Result<()>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Add to the (provider, date) counters, creating the row if absent.
    async fn increment_usage(
        &self,
        provider: &str,
        date: NaiveDate,
        requests: u32,
        tokens: u64,
    ) -> Result<()>;
    /// Zeroed record when no usage was recorded for the day.
    async fn get_usage(&self, provider: &str, date: NaiveDate) -> Result<UsageRecord>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn put_alert(&self, alert: &Alert) -> Result<()>;
}
