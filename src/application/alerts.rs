//! Structured alert fan-out.
//!
//! Alerts are out-of-band: delivery success or failure never changes the
//! result returned to the component that raised them. A failing backend
//! must not prevent its siblings from receiving the alert.

use crate::application::clock::SharedClock;
use crate::domain::alert::{Alert, AlertSeverity};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// One alert delivery sink.
#[async_trait]
pub trait AlertBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn send_alert(&self, alert: &Alert) -> Result<()>;
}

pub struct AlertRouter {
    backends: Vec<Arc<dyn AlertBackend>>,
    clock: Arc<SharedClock>,
}

impl AlertRouter {
    pub fn new(clock: Arc<SharedClock>) -> Self {
        Self {
            backends: Vec::new(),
            clock,
        }
    }

    pub fn add_backend(&mut self, backend: Arc<dyn AlertBackend>) {
        self.backends.push(backend);
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Deliver to every backend; returns the number of successful
    /// deliveries. When nothing delivers, the alert is logged at its
    /// severity so it is never silently dropped.
    pub async fn route(
        &self,
        kind: &str,
        message: &str,
        severity: AlertSeverity,
        details: serde_json::Value,
        source: &str,
    ) -> usize {
        let alert = Alert::new(kind, message, severity, source, self.clock.now().await)
            .with_details(details);

        let mut delivered = 0;
        for backend in &self.backends {
            match backend.send_alert(&alert).await {
                Ok(()) => delivered += 1,
                Err(e) => error!("Alert backend {} failed: {}", backend.name(), e),
            }
        }

        if delivered == 0 {
            match severity {
                AlertSeverity::Critical => error!("[{}] {} (undelivered)", kind, message),
                AlertSeverity::Warning => warn!("[{}] {} (undelivered)", kind, message),
                AlertSeverity::Info => info!("[{}] {} (undelivered)", kind, message),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        name: String,
        delivered: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AlertBackend for CountingBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send_alert(&self, _alert: &Alert) -> Result<()> {
            if self.fail {
                anyhow::bail!("backend down");
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn backend(name: &str, fail: bool) -> Arc<CountingBackend> {
        Arc::new(CountingBackend {
            name: name.into(),
            delivered: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn failing_backend_does_not_block_siblings() {
        let clock = Arc::new(SharedClock::new());
        let good = backend("store", false);
        let bad = backend("webhook", true);
        let mut router = AlertRouter::new(clock);
        router.add_backend(bad.clone());
        router.add_backend(good.clone());

        let delivered = router
            .route(
                "test_alert",
                "something happened",
                AlertSeverity::Warning,
                serde_json::Value::Null,
                "tests",
            )
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(good.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_router_returns_zero() {
        let router = AlertRouter::new(Arc::new(SharedClock::new()));
        let delivered = router
            .route(
                "noop",
                "no sinks",
                AlertSeverity::Info,
                serde_json::Value::Null,
                "tests",
            )
            .await;
        assert_eq!(delivered, 0);
    }
}
