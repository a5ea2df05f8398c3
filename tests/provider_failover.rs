//! Provider routing: rate-limit failover, minute-limit gating without a
//! network call, and circuit breaking on consecutive transient errors.

mod common;

use common::{CountingTransport, alert_router, provider};
use std::sync::Arc;
use tradecouncil::application::clock::SharedClock;
use tradecouncil::application::providers::usage::UsageLedger;
use tradecouncil::application::providers::{CallOverrides, ProviderRouter, RouterConfig};
use tradecouncil::domain::ports::{Completion, TransportFailure};
use tradecouncil::domain::provider::ProviderStatus;
use tradecouncil::infrastructure::llm::ScriptedTransport;
use tradecouncil::infrastructure::memory::{InMemoryAlertStore, InMemoryUsageStore};

fn ledger() -> UsageLedger {
    UsageLedger::new(Arc::new(InMemoryUsageStore::new()), 9, 0)
}

fn ok_completion(text: &str) -> Result<Completion, TransportFailure> {
    Ok(Completion {
        text: text.to_string(),
        tokens_used: Some(42),
    })
}

async fn router_with(
    transport: Arc<CountingTransport<ScriptedTransport>>,
    providers: Vec<tradecouncil::domain::provider::ProviderDescriptor>,
    config: RouterConfig,
) -> (Arc<ProviderRouter>, Arc<InMemoryAlertStore>, Arc<SharedClock>) {
    let clock = Arc::new(SharedClock::new());
    let (alerts, alert_store) = alert_router(clock.clone());
    let router = Arc::new(
        ProviderRouter::new(providers, transport, clock.clone(), alerts, ledger(), config)
            .unwrap(),
    );
    router.preload_usage().await.unwrap();
    (router, alert_store, clock)
}

#[tokio::test]
async fn rate_limited_primary_fails_over_to_peer() {
    let transport = Arc::new(CountingTransport::new(ScriptedTransport::new("fallback")));
    transport
        .script(
            "alpha",
            Err(TransportFailure::with_status(
                429,
                "rate limit reached, try again in 2m30s",
            )),
        )
        .await;
    transport.script("beta", ok_completion("served by beta")).await;

    let (router, alert_store, clock) = router_with(
        transport,
        vec![provider("alpha", 1, 30), provider("beta", 2, 30)],
        RouterConfig::default(),
    )
    .await;

    let before = clock.now().await;
    let response = router
        .call("system", "user", CallOverrides::default())
        .await
        .unwrap();
    assert_eq!(response.provider, "beta");
    assert_eq!(response.text, "served by beta");
    assert_eq!(response.tokens_used, 42);
    assert!(!response.approximate_usage);

    let status = router.status().await;
    let alpha = &status["alpha"];
    assert_eq!(alpha.status, ProviderStatus::RateLimited);
    let cooldown = alpha.cooldown_until.unwrap() - before;
    assert!(
        (149..=152).contains(&cooldown.num_seconds()),
        "cooldown was {}s",
        cooldown.num_seconds()
    );

    let beta = &status["beta"];
    assert_eq!(beta.requests_today, 1);
    assert!(beta.is_preferred);

    assert_eq!(alert_store.count_kind("provider_rate_limited").await, 1);
}

#[tokio::test]
async fn minute_limit_denies_without_a_network_call() {
    let transport = Arc::new(CountingTransport::new(ScriptedTransport::new("ok")));
    let (router, alert_store, _clock) = router_with(
        transport.clone(),
        vec![provider("alpha", 1, 2)],
        RouterConfig::default(),
    )
    .await;

    for _ in 0..2 {
        router
            .call("system", "user", CallOverrides::default())
            .await
            .unwrap();
    }
    assert_eq!(transport.calls(), 2);

    // Third request inside the same minute: denied up front.
    let error = router
        .call("system", "user", CallOverrides::default())
        .await
        .unwrap_err();
    assert!(error.to_string().contains("All LLM providers failed"));
    assert_eq!(transport.calls(), 2);
    assert_eq!(alert_store.count_kind("all_providers_failed").await, 1);
}

#[tokio::test]
async fn circuit_opens_after_consecutive_transient_failures() {
    let transport = Arc::new(CountingTransport::new(ScriptedTransport::new("ok")));
    for _ in 0..4 {
        transport
            .script("alpha", Err(TransportFailure::message("connection reset")))
            .await;
    }

    let config = RouterConfig {
        failure_threshold: 2,
        transient_retries: 0,
        ..Default::default()
    };
    let (router, _alerts, _clock) =
        router_with(transport.clone(), vec![provider("alpha", 1, 30)], config).await;

    // First failure: circuit still closed, provider stays selectable.
    assert!(
        router
            .call("system", "user", CallOverrides::default())
            .await
            .is_err()
    );
    assert_eq!(transport.calls(), 1);

    // Second failure opens the circuit.
    assert!(
        router
            .call("system", "user", CallOverrides::default())
            .await
            .is_err()
    );
    assert_eq!(transport.calls(), 2);

    // While open, calls fail fast without reaching the transport.
    assert!(
        router
            .call("system", "user", CallOverrides::default())
            .await
            .is_err()
    );
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn preferred_provider_wins_when_eligible() {
    let transport = Arc::new(CountingTransport::new(ScriptedTransport::new("ok")));
    let (router, _alerts, _clock) = router_with(
        transport,
        vec![provider("alpha", 1, 30), provider("beta", 2, 30)],
        RouterConfig::default(),
    )
    .await;

    let overrides = CallOverrides {
        preferred_provider: Some("beta".to_string()),
        ..Default::default()
    };
    let response = router.call("system", "user", overrides).await.unwrap();
    assert_eq!(response.provider, "beta");
}

#[tokio::test]
async fn unparsed_usage_falls_back_to_word_count() {
    let transport = Arc::new(CountingTransport::new(ScriptedTransport::new(
        "three word reply",
    )));
    let (router, _alerts, _clock) = router_with(
        transport,
        vec![provider("alpha", 1, 30)],
        RouterConfig::default(),
    )
    .await;

    let response = router
        .call("one two", "three", CallOverrides::default())
        .await
        .unwrap();
    assert!(response.approximate_usage);
    // 2 prompt words + 1 user word + 3 response words.
    assert_eq!(response.tokens_used, 6);
}
