//! Persistent usage accounting with daily rollover.
//!
//! Requests and tokens per (provider, date) survive restart through the
//! `UsageStore`; the in-memory counters are reloaded at startup and
//! rolled over at a configured local hour.

use crate::domain::provider::{ProviderDescriptor, UsageRecord};
use crate::domain::repositories::UsageStore;
use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Quota thresholds that raise alerts when first crossed, in percent.
pub const QUOTA_THRESHOLDS: [u8; 4] = [75, 90, 95, 100];

#[derive(Debug, Clone, Default)]
pub struct DayUsage {
    pub requests: u32,
    pub tokens: u64,
}

struct LedgerState {
    date: NaiveDate,
    usage: HashMap<String, DayUsage>,
    /// Highest threshold already alerted per provider for the day.
    alerted: HashMap<String, u8>,
}

pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
    rollover_hour: u32,
    utc_offset_secs: i32,
    state: Mutex<LedgerState>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>, rollover_hour: u32, utc_offset_secs: i32) -> Self {
        Self {
            store,
            rollover_hour: rollover_hour.min(23),
            utc_offset_secs,
            state: Mutex::new(LedgerState {
                date: NaiveDate::MIN,
                usage: HashMap::new(),
                alerted: HashMap::new(),
            }),
        }
    }

    /// Accounting day for an instant: days roll at `rollover_hour` local
    /// time, so 08:59 with a 09:00 rollover still belongs to yesterday.
    pub fn usage_date(&self, at: DateTime<Utc>) -> NaiveDate {
        let offset =
            FixedOffset::east_opt(self.utc_offset_secs).unwrap_or(FixedOffset::east_opt(0).unwrap());
        let local = at.with_timezone(&offset);
        (local - Duration::hours(self.rollover_hour as i64)).date_naive()
    }

    /// Reload persisted counters for the current accounting day.
    pub async fn preload(
        &self,
        providers: &[ProviderDescriptor],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, DayUsage>> {
        let date = self.usage_date(now);
        let mut usage = HashMap::new();
        for provider in providers {
            let record = self.store.get_usage(&provider.name, date).await?;
            usage.insert(
                provider.name.clone(),
                DayUsage {
                    requests: record.requests,
                    tokens: record.tokens,
                },
            );
        }
        let mut state = self.state.lock().await;
        state.date = date;
        state.usage = usage.clone();
        state.alerted.clear();
        info!(
            "Usage ledger loaded for {} ({} providers)",
            date,
            usage.len()
        );
        Ok(usage)
    }

    /// Record one successful call. Returns the updated day usage and the
    /// quota threshold newly crossed, if any.
    pub async fn record(
        &self,
        provider: &ProviderDescriptor,
        tokens: u64,
        now: DateTime<Utc>,
    ) -> Result<(DayUsage, Option<u8>)> {
        let date = self.usage_date(now);
        let mut state = self.state.lock().await;
        if state.date != date {
            debug!("Usage ledger rollover: {} -> {}", state.date, date);
            state.date = date;
            state.usage.clear();
            state.alerted.clear();
        }

        let entry = state.usage.entry(provider.name.clone()).or_default();
        entry.requests += 1;
        entry.tokens += tokens;
        let updated = entry.clone();

        let crossed = quota_pct(provider, &updated).and_then(|pct| {
            let already = state.alerted.get(&provider.name).copied().unwrap_or(0);
            let newly = QUOTA_THRESHOLDS
                .iter()
                .rev()
                .find(|&&t| pct >= t as f64 && t > already)
                .copied();
            if let Some(threshold) = newly {
                state.alerted.insert(provider.name.clone(), threshold);
            }
            newly
        });
        drop(state);

        self.store
            .increment_usage(&provider.name, date, 1, tokens)
            .await?;
        Ok((updated, crossed))
    }

    pub async fn day_usage(&self, provider: &str, now: DateTime<Utc>) -> DayUsage {
        let date = self.usage_date(now);
        let state = self.state.lock().await;
        if state.date != date {
            return DayUsage::default();
        }
        state.usage.get(provider).cloned().unwrap_or_default()
    }

    /// Estimate how many days of quota remain at a given daily burn.
    pub async fn estimate_days_remaining(
        &self,
        provider: &ProviderDescriptor,
        avg_tokens_per_day: u64,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let quota = provider.per_day_token_quota?;
        if avg_tokens_per_day == 0 {
            return None;
        }
        let used = self.day_usage(&provider.name, now).await.tokens;
        let remaining = quota.saturating_sub(used);
        Some(remaining as f64 / avg_tokens_per_day as f64)
    }
}

/// Usage percentage against the binding daily quota: token quota when
/// configured, otherwise the request limit.
fn quota_pct(provider: &ProviderDescriptor, usage: &DayUsage) -> Option<f64> {
    if let Some(quota) = provider.per_day_token_quota {
        if quota == 0 {
            return None;
        }
        return Some(usage.tokens as f64 / quota as f64 * 100.0);
    }
    if provider.per_day_limit == 0 {
        return None;
    }
    Some(usage.requests as f64 / provider.per_day_limit as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::InMemoryUsageStore;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn provider(quota: Option<u64>) -> ProviderDescriptor {
        ProviderDescriptor {
            name: "groq".into(),
            kind: crate::domain::provider::ProviderKind::Groq,
            model: "llama-3.3-70b-versatile".into(),
            priority: 1,
            per_minute_limit: 30,
            per_day_limit: 100,
            per_day_token_quota: quota,
            cost_per_1k_tokens: Decimal::ZERO,
            api_key: Some("key".into()),
            base_url: None,
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn counters_persist_and_reload() {
        let store = Arc::new(InMemoryUsageStore::new());
        let ledger = UsageLedger::new(store.clone(), 9, 0);
        let p = provider(None);
        ledger.preload(std::slice::from_ref(&p), at(10)).await.unwrap();
        ledger.record(&p, 500, at(10)).await.unwrap();
        ledger.record(&p, 250, at(10)).await.unwrap();

        // A fresh ledger over the same store sees the persisted counts.
        let reloaded = UsageLedger::new(store, 9, 0);
        let usage = reloaded.preload(std::slice::from_ref(&p), at(11)).await.unwrap();
        assert_eq!(usage["groq"].requests, 2);
        assert_eq!(usage["groq"].tokens, 750);
    }

    #[tokio::test]
    async fn rollover_hour_splits_days() {
        let store = Arc::new(InMemoryUsageStore::new());
        let ledger = UsageLedger::new(store, 9, 0);
        let before = Utc.with_ymd_and_hms(2025, 6, 2, 8, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 2, 9, 1, 0).unwrap();
        assert_eq!(
            ledger.usage_date(before),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
        );
        assert_eq!(
            ledger.usage_date(after),
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
        );
    }

    #[tokio::test]
    async fn lifespan_estimate_uses_remaining_quota() {
        let store = Arc::new(InMemoryUsageStore::new());
        let ledger = UsageLedger::new(store, 9, 0);
        let p = provider(Some(100_000));
        ledger.preload(std::slice::from_ref(&p), at(10)).await.unwrap();
        ledger.record(&p, 40_000, at(10)).await.unwrap();

        let days = ledger
            .estimate_days_remaining(&p, 10_000, at(10))
            .await
            .unwrap();
        assert!((days - 6.0).abs() < 1e-9);

        // No token quota configured: nothing to estimate.
        assert!(
            ledger
                .estimate_days_remaining(&provider(None), 10_000, at(10))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn quota_thresholds_fire_once_each() {
        let store = Arc::new(InMemoryUsageStore::new());
        let ledger = UsageLedger::new(store, 9, 0);
        let p = provider(Some(1000));
        ledger.preload(std::slice::from_ref(&p), at(10)).await.unwrap();

        let (_, crossed) = ledger.record(&p, 800, at(10)).await.unwrap();
        assert_eq!(crossed, Some(75));
        let (_, crossed) = ledger.record(&p, 10, at(10)).await.unwrap();
        assert_eq!(crossed, None);
        let (_, crossed) = ledger.record(&p, 140, at(10)).await.unwrap();
        assert_eq!(crossed, Some(95));
        let (_, crossed) = ledger.record(&p, 100, at(10)).await.unwrap();
        assert_eq!(crossed, Some(100));
    }
}
