//! Per-provider circuit breaking.
//!
//! A provider that keeps failing is excluded from selection until its
//! `open_until` horizon passes. The router's recovery sweep re-admits it
//! afterwards, so no half-open probe state is needed here.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Default, Clone)]
struct BreakerEntry {
    failure_count: u32,
    open_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    entries: HashMap<String, BreakerEntry>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_secs: i64) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown: Duration::seconds(cooldown_secs),
            entries: HashMap::new(),
        }
    }

    /// Record a failure; returns `true` when this failure opened the
    /// circuit.
    pub fn record_failure(&mut self, provider: &str, now: DateTime<Utc>) -> bool {
        let entry = self.entries.entry(provider.to_string()).or_default();
        entry.failure_count += 1;
        if entry.failure_count >= self.failure_threshold && entry.open_until.is_none() {
            entry.open_until = Some(now + self.cooldown);
            warn!(
                "Circuit opened for provider {} after {} failures (until {})",
                provider,
                entry.failure_count,
                entry.open_until.unwrap()
            );
            return true;
        }
        false
    }

    pub fn record_success(&mut self, provider: &str) {
        self.entries.remove(provider);
    }

    pub fn is_open(&self, provider: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(provider)
            .and_then(|e| e.open_until)
            .is_some_and(|until| until > now)
    }

    /// Drop entries whose horizon has passed so the failure count starts
    /// fresh after a cooldown.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.entries
            .retain(|_, e| e.open_until.is_none_or(|until| until > now));
    }

    pub fn open_until(&self, provider: &str) -> Option<DateTime<Utc>> {
        self.entries.get(provider).and_then(|e| e.open_until)
    }
}
