//! In-memory implementations of the persistence seams and messaging
//! capabilities. They back the simulated modes and the test suite; the
//! SQLite and Redis adapters replace them in live deployments.

use crate::application::mode_controller::ModeConfigPersistence;
use crate::domain::alert::Alert;
use crate::domain::mode::ModeConfig;
use crate::domain::ports::{KeyValueStore, PubSub, PubSubMessage};
use crate::domain::provider::UsageRecord;
use crate::domain::repositories::{
    AlertStore, DecisionFilter, DecisionStore, DiscussionRecord, TradeFilter, TradeRecord,
    TradeStore, UsageStore,
};
use crate::domain::signal::CycleDecision;
use crate::domain::trading::Position;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};

#[derive(Default)]
pub struct InMemoryDecisionStore {
    decisions: RwLock<Vec<CycleDecision>>,
    discussions: RwLock<Vec<DiscussionRecord>>,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn decision_count(&self) -> usize {
        self.decisions.read().await.len()
    }
}

fn decision_matches(decision: &CycleDecision, filter: &DecisionFilter) -> bool {
    filter
        .instrument
        .as_ref()
        .is_none_or(|i| &decision.instrument == i)
        && filter.mode.is_none_or(|m| decision.mode == m)
        && filter.since.is_none_or(|s| decision.timestamp >= s)
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn put_decision(&self, decision: &CycleDecision) -> Result<()> {
        self.decisions.write().await.push(decision.clone());
        Ok(())
    }

    async fn put_discussion(&self, discussion: &DiscussionRecord) -> Result<()> {
        self.discussions.write().await.push(discussion.clone());
        Ok(())
    }

    async fn list_decisions(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<CycleDecision>> {
        let decisions = self.decisions.read().await;
        Ok(decisions
            .iter()
            .rev()
            .filter(|d| decision_matches(d, filter))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_discussions(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<DiscussionRecord>> {
        let discussions = self.discussions.read().await;
        Ok(discussions
            .iter()
            .rev()
            .filter(|d| {
                filter
                    .instrument
                    .as_ref()
                    .is_none_or(|i| &d.instrument == i)
                    && filter.mode.is_none_or(|m| d.mode == m)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryTradeStore {
    trades: RwLock<Vec<TradeRecord>>,
    positions: RwLock<HashMap<String, Position>>,
}

impl InMemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn trade_count(&self) -> usize {
        self.trades.read().await.len()
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn put_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.trades.write().await.push(trade.clone());
        Ok(())
    }

    async fn list_trades(&self, filter: &TradeFilter) -> Result<Vec<TradeRecord>> {
        let trades = self.trades.read().await;
        Ok(trades
            .iter()
            .filter(|t| {
                filter
                    .instrument
                    .as_ref()
                    .is_none_or(|i| &t.instrument == i)
                    && filter.since.is_none_or(|s| t.opened_at >= s)
            })
            .cloned()
            .collect())
    }

    async fn put_position(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.id.clone(), position.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUsageStore {
    rows: RwLock<HashMap<(String, NaiveDate), UsageRecord>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn increment_usage(
        &self,
        provider: &str,
        date: NaiveDate,
        requests: u32,
        tokens: u64,
    ) -> Result<()> {
        let mut rows = self.rows.write().await;
        let record = rows
            .entry((provider.to_string(), date))
            .or_insert_with(|| UsageRecord::empty(provider, date));
        record.requests += requests;
        record.tokens += tokens;
        Ok(())
    }

    async fn get_usage(&self, provider: &str, date: NaiveDate) -> Result<UsageRecord> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(provider.to_string(), date))
            .cloned()
            .unwrap_or_else(|| UsageRecord::empty(provider, date)))
    }
}

#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<Vec<Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }

    pub async fn count_kind(&self, kind: &str) -> usize {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn put_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }
}

/// Key-value store with optional per-key expiry.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    map: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.map.read().await;
        Ok(map.get(key).and_then(|(value, expiry)| {
            if expiry.is_some_and(|at| at <= Instant::now()) {
                None
            } else {
                Some(value.clone())
            }
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expiry = ttl.map(|d| Instant::now() + d);
        self.map
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.write().await.remove(key);
        Ok(())
    }
}

struct PubSubState {
    channels: HashSet<String>,
    patterns: HashSet<String>,
    queue: VecDeque<PubSubMessage>,
}

/// Process-local pub/sub with Redis delivery semantics: a message is
/// queued once per matching subscription (exact and pattern).
pub struct InMemoryPubSub {
    state: Mutex<PubSubState>,
    notify: Arc<Notify>,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PubSubState {
                channels: HashSet::new(),
                patterns: HashSet::new(),
                queue: VecDeque::new(),
            }),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.state.lock().await.channels.insert(channel.to_string());
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<()> {
        self.state.lock().await.patterns.insert(pattern.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.state.lock().await.channels.remove(channel);
        Ok(())
    }

    async fn punsubscribe(&self, pattern: &str) -> Result<()> {
        self.state.lock().await.patterns.remove(pattern);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        use crate::application::gateway::acl::glob_match;
        let mut state = self.state.lock().await;
        if state.channels.contains(channel) {
            state.queue.push_back(PubSubMessage {
                channel: channel.to_string(),
                pattern: None,
                payload: payload.to_string(),
            });
        }
        let matching: Vec<String> = state
            .patterns
            .iter()
            .filter(|p| glob_match(p, channel))
            .cloned()
            .collect();
        for pattern in matching {
            state.queue.push_back(PubSubMessage {
                channel: channel.to_string(),
                pattern: Some(pattern),
                payload: payload.to_string(),
            });
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn get_message(&self, timeout: Duration) -> Result<Option<PubSubMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before checking the queue so a
            // publish between the check and the wait is not missed.
            let notified = self.notify.notified();
            if let Some(message) = self.state.lock().await.queue.pop_front() {
                return Ok(Some(message));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
        }
    }
}

/// Mode-config persistence for tests and simulated runs.
#[derive(Default)]
pub struct InMemoryModeConfigStore {
    config: RwLock<Option<ModeConfig>>,
}

impl InMemoryModeConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModeConfigPersistence for InMemoryModeConfigStore {
    async fn load(&self) -> Result<ModeConfig> {
        Ok(self.config.read().await.clone().unwrap_or_default())
    }

    async fn save(&self, config: &ModeConfig) -> Result<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }
}
