//! Multi-provider LLM routing.
//!
//! Selects a provider under rate limits, token quotas and circuit
//! breakers, calls it with a deadline, and falls back across peers on
//! failure. The network round-trip happens outside every lock; the only
//! critical section is the state update after success or failure.

use crate::application::alerts::AlertRouter;
use crate::application::clock::SharedClock;
use crate::application::providers::breaker::CircuitBreaker;
use crate::application::providers::classify::{ErrorClass, classify};
use crate::application::providers::usage::UsageLedger;
use crate::domain::alert::AlertSeverity;
use crate::domain::ports::{Completion, CompletionRequest, LlmTransport, TransportFailure};
use crate::domain::provider::{
    LlmResponse, ProviderDescriptor, ProviderSnapshot, ProviderState, ProviderStatus,
};
use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Consecutive transient failures before the circuit opens.
    pub failure_threshold: u32,
    pub breaker_cooldown_secs: i64,
    /// Extra attempts on the same provider for transient errors.
    pub transient_retries: u32,
    /// Overall deadline per provider attempt.
    pub call_deadline: std::time::Duration,
    /// Requests per minute above which a provider is deprioritized.
    pub soft_throttle_per_minute: u32,
    pub default_rate_limit_cooldown_secs: i64,
    pub unavailable_cooldown_hours: i64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            breaker_cooldown_secs: 30,
            transient_retries: 2,
            call_deadline: std::time::Duration::from_secs(60),
            soft_throttle_per_minute: 20,
            default_rate_limit_cooldown_secs: 300,
            unavailable_cooldown_hours: 24,
        }
    }
}

/// Per-call knobs.
#[derive(Debug, Clone)]
pub struct CallOverrides {
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub preferred_provider: Option<String>,
    /// Sibling agents in one phase share a group so the router spreads
    /// them across equally-ranked providers.
    pub parallel_group: Option<String>,
}

impl Default for CallOverrides {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.3,
            max_tokens: 2000,
            preferred_provider: None,
            parallel_group: None,
        }
    }
}

struct RouterState {
    providers: HashMap<String, ProviderState>,
    breaker: CircuitBreaker,
}

pub struct ProviderRouter {
    descriptors: Vec<ProviderDescriptor>,
    transport: Arc<dyn LlmTransport>,
    clock: Arc<SharedClock>,
    alerts: Arc<AlertRouter>,
    usage: UsageLedger,
    config: RouterConfig,
    state: Mutex<RouterState>,
}

impl ProviderRouter {
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        transport: Arc<dyn LlmTransport>,
        clock: Arc<SharedClock>,
        alerts: Arc<AlertRouter>,
        usage: UsageLedger,
        config: RouterConfig,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.name.clone()) {
                bail!("Duplicate provider name: {}", descriptor.name);
            }
        }
        let providers = descriptors
            .iter()
            .map(|d| (d.name.clone(), ProviderState::default()))
            .collect();
        let failure_threshold = config.failure_threshold.max(1);
        let breaker = CircuitBreaker::new(failure_threshold, config.breaker_cooldown_secs);
        Ok(Self {
            descriptors,
            transport,
            clock,
            alerts,
            usage,
            config: RouterConfig {
                failure_threshold,
                ..config
            },
            state: Mutex::new(RouterState { providers, breaker }),
        })
    }

    /// Reload persisted usage so daily counters survive restart.
    pub async fn preload_usage(&self) -> Result<()> {
        let now = self.clock.now().await;
        let usage = self.usage.preload(&self.descriptors, now).await?;
        let mut state = self.state.lock().await;
        for (name, day) in usage {
            if let Some(provider_state) = state.providers.get_mut(&name) {
                provider_state.requests_today = day.requests;
                provider_state.tokens_today = day.tokens;
            }
        }
        Ok(())
    }

    pub fn provider_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Route one completion through the best available provider,
    /// failing over on classified errors.
    pub async fn call(
        &self,
        system_prompt: &str,
        user_message: &str,
        overrides: CallOverrides,
    ) -> Result<LlmResponse> {
        let mut excluded: HashSet<String> = HashSet::new();

        loop {
            let now = self.clock.now().await;
            let descriptor = {
                let mut state = self.state.lock().await;
                Self::recover_due(&mut state, now);
                self.select(&state, now, &excluded, &overrides)
            };

            let Some(descriptor) = descriptor else {
                return self.all_failed(&excluded).await;
            };

            let request = CompletionRequest {
                system_prompt: system_prompt.to_string(),
                user_message: user_message.to_string(),
                model: overrides
                    .model
                    .clone()
                    .unwrap_or_else(|| descriptor.model.clone()),
                temperature: overrides.temperature,
                max_tokens: overrides.max_tokens,
            };

            debug!(
                "Routing LLM call to {} (model {})",
                descriptor.name, request.model
            );

            match self.attempt_provider(&descriptor, &request).await {
                Ok(completion) => {
                    return self.record_success(&descriptor, &request, completion).await;
                }
                Err((failure, class)) => {
                    self.apply_failure(&descriptor, &failure, class).await;
                    excluded.insert(descriptor.name.clone());
                }
            }
        }
    }

    /// Snapshot of every provider's state.
    pub async fn status(&self) -> HashMap<String, ProviderSnapshot> {
        let now = self.clock.now().await;
        let state = self.state.lock().await;
        let preferred = self
            .select(&state, now, &HashSet::new(), &CallOverrides::default())
            .map(|d| d.name);
        self.descriptors
            .iter()
            .map(|descriptor| {
                let provider_state = state
                    .providers
                    .get(&descriptor.name)
                    .cloned()
                    .unwrap_or_default();
                (
                    descriptor.name.clone(),
                    ProviderSnapshot {
                        name: descriptor.name.clone(),
                        model: descriptor.model.clone(),
                        priority: descriptor.priority,
                        status: provider_state.status,
                        requests_today: provider_state.requests_today,
                        requests_this_minute: provider_state.requests_in_window(now),
                        tokens_today: provider_state.tokens_today,
                        per_minute_limit: descriptor.per_minute_limit,
                        per_day_limit: descriptor.per_day_limit,
                        per_day_token_quota: descriptor.per_day_token_quota,
                        last_error: provider_state.last_error.clone(),
                        cooldown_until: provider_state.cooldown_until,
                        is_preferred: preferred.as_deref() == Some(descriptor.name.as_str()),
                    },
                )
            })
            .collect()
    }

    /// Recovery sweep; runs periodically and at the top of every call.
    pub async fn health_tick(&self) {
        let now = self.clock.now().await;
        let mut state = self.state.lock().await;
        Self::recover_due(&mut state, now);
    }

    fn recover_due(state: &mut RouterState, now: DateTime<Utc>) {
        state.breaker.expire(now);
        for provider_state in state.providers.values_mut() {
            // UNAVAILABLE requires human intervention; never auto-clear.
            if provider_state.status == ProviderStatus::Unavailable {
                continue;
            }
            if provider_state.status != ProviderStatus::Available
                && provider_state
                    .cooldown_until
                    .is_none_or(|until| until <= now)
            {
                provider_state.status = ProviderStatus::Available;
                provider_state.consecutive_failures = 0;
                provider_state.cooldown_until = None;
            }
        }
    }

    fn within_rate_limits(
        descriptor: &ProviderDescriptor,
        state: &ProviderState,
        now: DateTime<Utc>,
    ) -> bool {
        if state.requests_in_window(now) >= descriptor.per_minute_limit {
            return false;
        }
        if state.requests_today >= descriptor.per_day_limit {
            return false;
        }
        if let Some(quota) = descriptor.per_day_token_quota
            && state.tokens_today >= quota
        {
            return false;
        }
        true
    }

    fn select(
        &self,
        state: &RouterState,
        now: DateTime<Utc>,
        excluded: &HashSet<String>,
        overrides: &CallOverrides,
    ) -> Option<ProviderDescriptor> {
        let mut eligible: Vec<(usize, &ProviderDescriptor, bool)> = self
            .descriptors
            .iter()
            .enumerate()
            .filter_map(|(index, descriptor)| {
                if excluded.contains(&descriptor.name) {
                    return None;
                }
                let provider_state = state.providers.get(&descriptor.name)?;
                if provider_state.status != ProviderStatus::Available {
                    return None;
                }
                if state.breaker.is_open(&descriptor.name, now) {
                    return None;
                }
                if !Self::within_rate_limits(descriptor, provider_state, now) {
                    return None;
                }
                let throttled =
                    provider_state.requests_in_window(now) > self.config.soft_throttle_per_minute;
                Some((index, descriptor, throttled))
            })
            .collect();

        if eligible.is_empty() {
            return None;
        }

        if let Some(preferred) = &overrides.preferred_provider
            && let Some((_, descriptor, _)) = eligible.iter().find(|(_, d, _)| &d.name == preferred)
        {
            return Some((*descriptor).clone());
        }

        eligible
            .sort_by_key(|(index, descriptor, throttled)| (descriptor.priority, *throttled, *index));

        // Spread a parallel group of sibling calls across the providers
        // tied for the lead instead of piling onto the first.
        if let Some(group) = &overrides.parallel_group {
            let (_, lead, lead_throttled) = eligible[0];
            let tied: Vec<&ProviderDescriptor> = eligible
                .iter()
                .filter(|(_, d, t)| d.priority == lead.priority && *t == lead_throttled)
                .map(|(_, d, _)| *d)
                .collect();
            let pick = fnv_hash(group) as usize % tied.len();
            return Some(tied[pick].clone());
        }

        Some(eligible[0].1.clone())
    }

    /// One provider attempt with deadline and bounded transient retries.
    /// Transient attempts advance the consecutive-failure count; hitting
    /// the threshold opens the circuit and aborts the retry loop.
    async fn attempt_provider(
        &self,
        descriptor: &ProviderDescriptor,
        request: &CompletionRequest,
    ) -> Result<Completion, (TransportFailure, ErrorClass)> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(
                self.config.call_deadline,
                self.transport.complete(descriptor, request),
            )
            .await
            .unwrap_or_else(|_| Err(TransportFailure::timeout(self.config.call_deadline)));

            let failure = match outcome {
                Ok(completion) => return Ok(completion),
                Err(failure) => failure,
            };

            let now = self.clock.now().await;
            let class = classify(&failure, now);
            if class != ErrorClass::Transient {
                return Err((failure, class));
            }

            let circuit_opened = {
                let mut state = self.state.lock().await;
                let provider_state = state.providers.entry(descriptor.name.clone()).or_default();
                provider_state.consecutive_failures += 1;
                provider_state.last_error = Some(failure.message.clone());
                provider_state.last_error_at = Some(now);
                state.breaker.record_failure(&descriptor.name, now)
            };

            if circuit_opened || attempt >= self.config.transient_retries {
                return Err((failure, class));
            }

            let backoff = std::time::Duration::from_millis(200u64.saturating_mul(1 << attempt));
            debug!(
                "Transient failure from {} (attempt {}), retrying in {:?}: {}",
                descriptor.name,
                attempt + 1,
                backoff,
                failure.message
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn record_success(
        &self,
        descriptor: &ProviderDescriptor,
        request: &CompletionRequest,
        completion: Completion,
    ) -> Result<LlmResponse> {
        let now = self.clock.now().await;
        let (tokens, approximate) = match completion.tokens_used {
            Some(tokens) => (tokens, false),
            None => (
                approximate_tokens(&request.system_prompt, &request.user_message, &completion.text),
                true,
            ),
        };

        {
            let mut state = self.state.lock().await;
            state.breaker.record_success(&descriptor.name);
            let provider_state = state.providers.entry(descriptor.name.clone()).or_default();
            match provider_state.minute_window_start {
                Some(start) if (now - start).num_seconds() <= 60 => {
                    provider_state.requests_this_minute += 1;
                }
                _ => {
                    provider_state.minute_window_start = Some(now);
                    provider_state.requests_this_minute = 1;
                }
            }
            provider_state.requests_today += 1;
            provider_state.tokens_today += tokens;
            provider_state.consecutive_failures = 0;
        }

        match self.usage.record(descriptor, tokens, now).await {
            Ok((_, Some(threshold))) => {
                let severity = if threshold >= 95 {
                    AlertSeverity::Critical
                } else if threshold >= 90 {
                    AlertSeverity::Warning
                } else {
                    AlertSeverity::Info
                };
                self.alerts
                    .route(
                        "provider_quota",
                        &format!(
                            "Provider {} crossed {}% of its daily quota",
                            descriptor.name, threshold
                        ),
                        severity,
                        json!({ "provider": descriptor.name, "threshold_pct": threshold }),
                        "provider_router",
                    )
                    .await;
            }
            Ok((_, None)) => {}
            Err(e) => warn!("Usage accounting failed for {}: {}", descriptor.name, e),
        }

        info!(
            "LLM call served by {} (model {}, {} tokens{})",
            descriptor.name,
            request.model,
            tokens,
            if approximate { ", approx" } else { "" }
        );

        Ok(LlmResponse {
            text: completion.text,
            provider: descriptor.name.clone(),
            model: request.model.clone(),
            tokens_used: tokens,
            approximate_usage: approximate,
        })
    }

    async fn apply_failure(
        &self,
        descriptor: &ProviderDescriptor,
        failure: &TransportFailure,
        class: ErrorClass,
    ) {
        let now = self.clock.now().await;

        match class {
            ErrorClass::RateLimit { retry_after } => {
                let cooldown = retry_after.unwrap_or(Duration::seconds(
                    self.config.default_rate_limit_cooldown_secs,
                ));
                let until = now + cooldown;
                {
                    let mut state = self.state.lock().await;
                    let provider_state =
                        state.providers.entry(descriptor.name.clone()).or_default();
                    provider_state.status = ProviderStatus::RateLimited;
                    provider_state.cooldown_until = Some(until);
                    provider_state.last_error = Some(failure.message.clone());
                    provider_state.last_error_at = Some(now);
                }
                warn!(
                    "Provider {} rate limited until {}: {}",
                    descriptor.name, until, failure.message
                );
                self.alerts
                    .route(
                        "provider_rate_limited",
                        &format!("Provider {} rate limited", descriptor.name),
                        AlertSeverity::Warning,
                        json!({
                            "provider": descriptor.name,
                            "cooldown_until": until.to_rfc3339(),
                            "hint_parsed": retry_after.is_some(),
                            "error": failure.message,
                        }),
                        "provider_router",
                    )
                    .await;
            }
            ErrorClass::ModelNotFound | ErrorClass::Unavailable => {
                let reason = if class == ErrorClass::ModelNotFound {
                    "model error"
                } else {
                    "provider unavailable"
                };
                {
                    let mut state = self.state.lock().await;
                    let provider_state =
                        state.providers.entry(descriptor.name.clone()).or_default();
                    provider_state.status = ProviderStatus::Unavailable;
                    provider_state.cooldown_until =
                        Some(now + Duration::hours(self.config.unavailable_cooldown_hours));
                    provider_state.last_error = Some(failure.message.clone());
                    provider_state.last_error_at = Some(now);
                }
                warn!(
                    "Provider {} marked unavailable ({}): {}",
                    descriptor.name, reason, failure.message
                );
                self.alerts
                    .route(
                        "provider_unavailable",
                        &format!("Provider {} marked unavailable: {}", descriptor.name, reason),
                        AlertSeverity::Critical,
                        json!({ "provider": descriptor.name, "error": failure.message }),
                        "provider_router",
                    )
                    .await;
            }
            ErrorClass::Transient => {
                // Counts were advanced per attempt; mark the provider
                // cooling when the circuit opened.
                let mut state = self.state.lock().await;
                let open_until = state.breaker.open_until(&descriptor.name);
                let provider_state = state.providers.entry(descriptor.name.clone()).or_default();
                if let Some(until) = open_until {
                    provider_state.status = ProviderStatus::Error;
                    provider_state.cooldown_until = Some(until);
                }
                drop(state);
                warn!(
                    "Provider {} transient failure: {}",
                    descriptor.name, failure.message
                );
            }
        }
    }

    async fn all_failed(&self, excluded: &HashSet<String>) -> Result<LlmResponse> {
        let state = self.state.lock().await;
        let mut details = Vec::new();
        for descriptor in &self.descriptors {
            if let Some(provider_state) = state.providers.get(&descriptor.name) {
                details.push(format!(
                    "{}: {:?}{}",
                    descriptor.name,
                    provider_state.status,
                    provider_state
                        .last_error
                        .as_deref()
                        .map(|e| format!(" ({})", e))
                        .unwrap_or_default()
                ));
            }
        }
        drop(state);

        self.alerts
            .route(
                "all_providers_failed",
                "No LLM provider could serve the request",
                AlertSeverity::Critical,
                json!({ "attempted": excluded.iter().collect::<Vec<_>>(), "providers": details }),
                "provider_router",
            )
            .await;

        bail!("All LLM providers failed: {}", details.join("; "))
    }
}

/// Word-count approximation used when a provider reports no usage.
fn approximate_tokens(system_prompt: &str, user_message: &str, response: &str) -> u64 {
    (system_prompt.split_whitespace().count()
        + user_message.split_whitespace().count()
        + response.split_whitespace().count()) as u64
}

fn fnv_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
