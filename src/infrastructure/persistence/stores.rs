//! SQLite implementations of the persistence seams.
//!
//! Each store is constructed for one mode and stamps/filters a `mode`
//! column, so live and simulated data share a database file without
//! ever mixing rows.

use crate::domain::alert::Alert;
use crate::domain::mode::Mode;
use crate::domain::provider::UsageRecord;
use crate::domain::repositories::{
    AlertStore, DecisionFilter, DecisionStore, DiscussionRecord, TradeFilter, TradeRecord,
    TradeStore, UsageStore,
};
use crate::domain::signal::{CycleDecision, Side, Signal};
use crate::domain::trading::Position;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Malformed timestamp: {}", raw))?
        .with_timezone(&Utc))
}

fn parse_signal(raw: &str) -> Signal {
    match raw {
        "BUY" => Signal::Buy,
        "SELL" => Signal::Sell,
        _ => Signal::Hold,
    }
}

fn parse_side(raw: &str) -> Side {
    if raw == "SELL" { Side::Sell } else { Side::Buy }
}

pub struct SqliteDecisionStore {
    pool: SqlitePool,
    mode: Mode,
}

impl SqliteDecisionStore {
    pub fn new(pool: SqlitePool, mode: Mode) -> Self {
        Self { pool, mode }
    }

    fn map_decision(row: SqliteRow) -> Result<CycleDecision> {
        let timestamp: String = row.try_get("timestamp")?;
        let final_signal: String = row.try_get("final_signal")?;
        let agent_signals: String = row.try_get("agent_signals")?;
        let mode: String = row.try_get("mode")?;
        Ok(CycleDecision {
            cycle_id: row.try_get("cycle_id")?,
            instrument: row.try_get("instrument")?,
            timestamp: parse_timestamp(&timestamp)?,
            final_signal: parse_signal(&final_signal),
            confidence: row.try_get("confidence")?,
            reasoning: row.try_get("reasoning")?,
            agent_signals: serde_json::from_str(&agent_signals)
                .context("Malformed agent signals")?,
            mode: Mode::from_str(&mode).unwrap_or(Mode::SimClosed),
        })
    }
}

#[async_trait]
impl DecisionStore for SqliteDecisionStore {
    async fn put_decision(&self, decision: &CycleDecision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions
                (cycle_id, instrument, timestamp, final_signal, confidence, reasoning, agent_signals, mode)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cycle_id) DO NOTHING
            "#,
        )
        .bind(&decision.cycle_id)
        .bind(&decision.instrument)
        .bind(decision.timestamp.to_rfc3339())
        .bind(decision.final_signal.to_string())
        .bind(decision.confidence)
        .bind(&decision.reasoning)
        .bind(serde_json::to_string(&decision.agent_signals)?)
        .bind(self.mode.label())
        .execute(&self.pool)
        .await
        .context("Failed to persist decision")?;
        Ok(())
    }

    async fn put_discussion(&self, discussion: &DiscussionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO discussions (cycle_id, instrument, mode, agent, timestamp, signal)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&discussion.cycle_id)
        .bind(&discussion.instrument)
        .bind(self.mode.label())
        .bind(&discussion.signal.agent)
        .bind(discussion.signal.timestamp.to_rfc3339())
        .bind(serde_json::to_string(&discussion.signal)?)
        .execute(&self.pool)
        .await
        .context("Failed to persist discussion")?;
        Ok(())
    }

    async fn list_decisions(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<CycleDecision>> {
        let instrument = filter.instrument.clone().unwrap_or_default();
        let rows = sqlx::query(
            r#"
            SELECT * FROM decisions
            WHERE mode = ? AND (? = '' OR instrument = ?)
            ORDER BY timestamp DESC LIMIT ?
            "#,
        )
        .bind(self.mode.label())
        .bind(&instrument)
        .bind(&instrument)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list decisions")?;
        rows.into_iter().map(Self::map_decision).collect()
    }

    async fn list_discussions(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<DiscussionRecord>> {
        let instrument = filter.instrument.clone().unwrap_or_default();
        let rows = sqlx::query(
            r#"
            SELECT * FROM discussions
            WHERE mode = ? AND (? = '' OR instrument = ?)
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(self.mode.label())
        .bind(&instrument)
        .bind(&instrument)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list discussions")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let signal: String = row.try_get("signal")?;
            let mode: String = row.try_get("mode")?;
            records.push(DiscussionRecord {
                cycle_id: row.try_get("cycle_id")?,
                instrument: row.try_get("instrument")?,
                mode: Mode::from_str(&mode).unwrap_or(Mode::SimClosed),
                signal: serde_json::from_str(&signal).context("Malformed discussion signal")?,
            });
        }
        Ok(records)
    }
}

pub struct SqliteTradeStore {
    pool: SqlitePool,
    mode: Mode,
}

impl SqliteTradeStore {
    pub fn new(pool: SqlitePool, mode: Mode) -> Self {
        Self { pool, mode }
    }
}

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn put_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades
                (id, instrument, side, quantity, entry_price, exit_price, pnl,
                 opened_at, closed_at, close_reason, mode)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                exit_price = excluded.exit_price,
                pnl = excluded.pnl,
                closed_at = excluded.closed_at,
                close_reason = excluded.close_reason
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.instrument)
        .bind(trade.side.to_string())
        .bind(trade.quantity as i64)
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.map(|p| p.to_string()))
        .bind(trade.pnl.map(|p| p.to_string()))
        .bind(trade.opened_at.to_rfc3339())
        .bind(trade.closed_at.map(|t| t.to_rfc3339()))
        .bind(trade.close_reason.clone())
        .bind(self.mode.label())
        .execute(&self.pool)
        .await
        .context("Failed to persist trade")?;
        Ok(())
    }

    async fn list_trades(&self, filter: &TradeFilter) -> Result<Vec<TradeRecord>> {
        let instrument = filter.instrument.clone().unwrap_or_default();
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE mode = ? AND (? = '' OR instrument = ?)
            ORDER BY opened_at DESC
            "#,
        )
        .bind(self.mode.label())
        .bind(&instrument)
        .bind(&instrument)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list trades")?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let side: String = row.try_get("side")?;
            let quantity: i64 = row.try_get("quantity")?;
            let entry_price: String = row.try_get("entry_price")?;
            let exit_price: Option<String> = row.try_get("exit_price")?;
            let pnl: Option<String> = row.try_get("pnl")?;
            let opened_at: String = row.try_get("opened_at")?;
            let closed_at: Option<String> = row.try_get("closed_at")?;
            let mode: String = row.try_get("mode")?;
            trades.push(TradeRecord {
                id: row.try_get("id")?,
                instrument: row.try_get("instrument")?,
                side: parse_side(&side),
                quantity: quantity as u32,
                entry_price: Decimal::from_str(&entry_price).unwrap_or_default(),
                exit_price: exit_price.and_then(|p| Decimal::from_str(&p).ok()),
                pnl: pnl.and_then(|p| Decimal::from_str(&p).ok()),
                opened_at: parse_timestamp(&opened_at)?,
                closed_at: closed_at.as_deref().map(parse_timestamp).transpose()?,
                close_reason: row.try_get("close_reason")?,
                mode: Mode::from_str(&mode).unwrap_or(Mode::SimClosed),
            });
        }
        Ok(trades)
    }

    async fn put_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (id, instrument, status, mode, data)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                data = excluded.data
            "#,
        )
        .bind(&position.id)
        .bind(&position.instrument)
        .bind(serde_json::to_string(&position.status)?.trim_matches('"').to_string())
        .bind(self.mode.label())
        .bind(serde_json::to_string(position)?)
        .execute(&self.pool)
        .await
        .context("Failed to persist position")?;
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        self.put_position(position).await
    }
}

pub struct SqliteUsageStore {
    pool: SqlitePool,
}

impl SqliteUsageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    async fn increment_usage(
        &self,
        provider: &str,
        date: NaiveDate,
        requests: u32,
        tokens: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage (provider, date, requests, tokens)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(provider, date) DO UPDATE SET
                requests = requests + excluded.requests,
                tokens = tokens + excluded.tokens
            "#,
        )
        .bind(provider)
        .bind(date.to_string())
        .bind(requests as i64)
        .bind(tokens as i64)
        .execute(&self.pool)
        .await
        .context("Failed to increment usage")?;
        Ok(())
    }

    async fn get_usage(&self, provider: &str, date: NaiveDate) -> Result<UsageRecord> {
        let row = sqlx::query("SELECT requests, tokens FROM usage WHERE provider = ? AND date = ?")
            .bind(provider)
            .bind(date.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read usage")?;
        Ok(match row {
            Some(row) => {
                let requests: i64 = row.try_get("requests")?;
                let tokens: i64 = row.try_get("tokens")?;
                UsageRecord {
                    provider: provider.to_string(),
                    date,
                    requests: requests as u32,
                    tokens: tokens as u64,
                }
            }
            None => UsageRecord::empty(provider, date),
        })
    }
}

pub struct SqliteAlertStore {
    pool: SqlitePool,
}

impl SqliteAlertStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    async fn put_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (kind, message, severity, details, source, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.kind)
        .bind(&alert.message)
        .bind(alert.severity.to_string())
        .bind(serde_json::to_string(&alert.details)?)
        .bind(&alert.source)
        .bind(alert.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to persist alert")?;
        Ok(())
    }
}
