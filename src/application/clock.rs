//! Central time source.
//!
//! All components read "now" from here instead of the wall clock so a
//! historical replay can drive the whole system through virtual time.
//! With a key-value store attached, sibling processes (orchestrator,
//! ingestion, gateway) observe the same virtual instant.

use crate::domain::ports::KeyValueStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const ENABLED_KEY: &str = "virtual_time:enabled";
const CURRENT_KEY: &str = "virtual_time:current";

#[derive(Debug, Default)]
struct ClockState {
    virtual_enabled: bool,
    virtual_now: Option<DateTime<Utc>>,
}

/// Process clock with optional cross-process synchronization.
pub struct SharedClock {
    state: RwLock<ClockState>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl SharedClock {
    /// Local-only clock; virtual time is visible to this process alone.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ClockState::default()),
            store: None,
        }
    }

    /// Clock synchronized through a shared key-value store. Each `now()`
    /// performs at most two reads.
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            state: RwLock::new(ClockState::default()),
            store: Some(store),
        }
    }

    pub async fn now(&self) -> DateTime<Utc> {
        if let Some(store) = &self.store {
            match self.read_store_time(store.as_ref()).await {
                Ok(Some(virtual_now)) => return virtual_now,
                Ok(None) => {}
                Err(e) => warn!("Clock: store read failed, using local time: {}", e),
            }
        }

        let state = self.state.read().await;
        if state.virtual_enabled
            && let Some(virtual_now) = state.virtual_now
        {
            return virtual_now;
        }
        Utc::now()
    }

    pub async fn is_virtual(&self) -> bool {
        if let Some(store) = &self.store
            && let Ok(Some(enabled)) = store.get(ENABLED_KEY).await
        {
            return enabled == "1";
        }
        self.state.read().await.virtual_enabled
    }

    pub async fn set_virtual(&self, at: DateTime<Utc>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.virtual_enabled = true;
            state.virtual_now = Some(at);
        }
        if let Some(store) = &self.store {
            store
                .set(ENABLED_KEY, "1", None)
                .await
                .context("Failed to publish virtual-time flag")?;
            store
                .set(CURRENT_KEY, &at.to_rfc3339(), None)
                .await
                .context("Failed to publish virtual-time value")?;
        }
        debug!("Clock: virtual time set to {}", at);
        Ok(())
    }

    pub async fn clear_virtual(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.virtual_enabled = false;
            state.virtual_now = None;
        }
        if let Some(store) = &self.store {
            store
                .delete(ENABLED_KEY)
                .await
                .context("Failed to clear virtual-time flag")?;
            store
                .delete(CURRENT_KEY)
                .await
                .context("Failed to clear virtual-time value")?;
        }
        debug!("Clock: back to real time");
        Ok(())
    }

    /// Advance virtual time. Enables virtual mode from the current
    /// instant when it was not already active.
    pub async fn advance(&self, by: Duration) -> Result<DateTime<Utc>> {
        let next = self.now().await + by;
        self.set_virtual(next).await?;
        Ok(next)
    }

    async fn read_store_time(&self, store: &dyn KeyValueStore) -> Result<Option<DateTime<Utc>>> {
        let Some(enabled) = store.get(ENABLED_KEY).await? else {
            return Ok(None);
        };
        if enabled != "1" {
            return Ok(None);
        }
        let Some(raw) = store.get(CURRENT_KEY).await? else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(&raw)
            .with_context(|| format!("Malformed virtual time in store: {}", raw))?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }
}

impl Default for SharedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn real_time_by_default() {
        let clock = SharedClock::new();
        assert!(!clock.is_virtual().await);
        let before = Utc::now();
        let now = clock.now().await;
        assert!(now >= before);
    }

    #[tokio::test]
    async fn set_virtual_round_trips() {
        let clock = SharedClock::new();
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        clock.set_virtual(at).await.unwrap();
        assert!(clock.is_virtual().await);
        assert_eq!(clock.now().await, at);

        let advanced = clock.advance(Duration::minutes(15)).await.unwrap();
        assert_eq!(advanced, at + Duration::minutes(15));
        assert_eq!(clock.now().await, advanced);

        clock.clear_virtual().await.unwrap();
        assert!(!clock.is_virtual().await);
    }
}
