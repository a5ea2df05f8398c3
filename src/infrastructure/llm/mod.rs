//! Outbound LLM transports.
//!
//! `HttpLlmTransport` speaks the real provider APIs; `ScriptedTransport`
//! serves canned completions for simulated modes and tests.

pub mod gemini;
pub mod openai_compat;

use crate::domain::ports::{Completion, CompletionRequest, LlmTransport, TransportFailure};
use crate::domain::provider::{ProviderDescriptor, ProviderKind};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

/// Dispatches each call to the codec matching the provider's dialect.
pub struct HttpLlmTransport {
    client: reqwest::Client,
}

impl HttpLlmTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LlmTransport for HttpLlmTransport {
    async fn complete(
        &self,
        provider: &ProviderDescriptor,
        request: &CompletionRequest,
    ) -> Result<Completion, TransportFailure> {
        match provider.kind {
            ProviderKind::Gemini => gemini::complete(&self.client, provider, request).await,
            _ => openai_compat::complete(&self.client, provider, request).await,
        }
    }
}

/// Canned transport: scripted outcomes per provider, a default
/// completion otherwise.
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<Completion, TransportFailure>>>>,
    default_text: String,
}

impl ScriptedTransport {
    pub fn new(default_text: impl Into<String>) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_text: default_text.into(),
        }
    }

    /// Queue the next outcome for `provider`.
    pub async fn script(&self, provider: &str, outcome: Result<Completion, TransportFailure>) {
        self.scripts
            .lock()
            .await
            .entry(provider.to_string())
            .or_default()
            .push_back(outcome);
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn complete(
        &self,
        provider: &ProviderDescriptor,
        _request: &CompletionRequest,
    ) -> Result<Completion, TransportFailure> {
        let mut scripts = self.scripts.lock().await;
        if let Some(queue) = scripts.get_mut(&provider.name)
            && let Some(outcome) = queue.pop_front()
        {
            return outcome;
        }
        Ok(Completion {
            text: self.default_text.clone(),
            tokens_used: None,
        })
    }
}
