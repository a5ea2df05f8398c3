//! LLM provider table, assembled from whichever API keys are present.
//!
//! Priorities mirror the operational pecking order: a local model first
//! (free, unmetered), then the free-tier cloud providers, then paid.

use crate::config::env_opt;
use crate::domain::provider::{ProviderDescriptor, ProviderKind};
use rust_decimal::Decimal;

fn descriptor(
    kind: ProviderKind,
    model: &str,
    priority: u8,
    per_minute: u32,
    per_day: u32,
    token_quota: Option<u64>,
    cost_per_1k: Decimal,
    api_key: Option<String>,
    base_url: Option<String>,
) -> ProviderDescriptor {
    let model = env_opt(&format!("{}_MODEL", kind.as_str().to_uppercase()))
        .unwrap_or_else(|| model.to_string());
    ProviderDescriptor {
        name: kind.as_str().to_string(),
        kind,
        model,
        priority,
        per_minute_limit: per_minute,
        per_day_limit: per_day,
        per_day_token_quota: token_quota,
        cost_per_1k_tokens: cost_per_1k,
        api_key,
        base_url,
    }
}

/// Build the provider table from the environment. Providers without
/// credentials are simply absent.
pub fn providers_from_env() -> Vec<ProviderDescriptor> {
    let mut providers = Vec::new();

    if let Some(base_url) = env_opt("OLLAMA_BASE_URL") {
        providers.push(descriptor(
            ProviderKind::Ollama,
            "llama3.1:8b",
            0,
            1000,
            10_000_000,
            None,
            Decimal::ZERO,
            Some("ollama".to_string()),
            Some(format!("{}/v1", base_url.trim_end_matches("/v1").trim_end_matches('/'))),
        ));
    }

    if let Some(key) = env_opt("GROQ_API_KEY") {
        providers.push(descriptor(
            ProviderKind::Groq,
            "llama-3.3-70b-versatile",
            1,
            30,
            100_000,
            Some(500_000),
            Decimal::ZERO,
            Some(key),
            None,
        ));
    }

    if let Some(key) = env_opt("GOOGLE_API_KEY") {
        providers.push(descriptor(
            ProviderKind::Gemini,
            "gemini-flash-latest",
            2,
            60,
            15_000_000,
            None,
            Decimal::ZERO,
            Some(key),
            None,
        ));
    }

    if let Some(key) = env_opt("OPENROUTER_API_KEY") {
        providers.push(descriptor(
            ProviderKind::OpenRouter,
            "meta-llama/llama-3.2-3b-instruct:free",
            3,
            50,
            50_000,
            None,
            Decimal::ZERO,
            Some(key),
            Some("https://openrouter.ai/api/v1".to_string()),
        ));
    }

    if let Some(key) = env_opt("TOGETHER_API_KEY") {
        providers.push(descriptor(
            ProviderKind::Together,
            "mistralai/Mixtral-8x7B-Instruct-v0.1",
            4,
            40,
            100_000,
            None,
            Decimal::ZERO,
            Some(key),
            Some("https://api.together.xyz/v1".to_string()),
        ));
    }

    if let Some(key) = env_opt("OPENAI_API_KEY") {
        providers.push(descriptor(
            ProviderKind::OpenAi,
            "gpt-4o-mini",
            5,
            60,
            1_000_000,
            None,
            Decimal::new(15, 2),
            Some(key),
            None,
        ));
    }

    providers
}
