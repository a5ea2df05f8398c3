use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of supported LLM providers. Dispatch on this enum is
/// compiler-checked; adding a provider means touching every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Gemini,
    OpenRouter,
    Together,
    Ollama,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "groq",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Together => "together",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// Providers speaking the OpenAI chat-completions dialect.
    pub fn is_openai_compatible(&self) -> bool {
        !matches!(self, ProviderKind::Gemini)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "groq" => Ok(ProviderKind::Groq),
            "gemini" => Ok(ProviderKind::Gemini),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "together" => Ok(ProviderKind::Together),
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAi),
            other => anyhow::bail!("Unknown LLM provider: {}", other),
        }
    }
}

/// Static configuration of one LLM provider. Immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique within a router.
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    /// Lower = preferred.
    pub priority: u8,
    pub per_minute_limit: u32,
    pub per_day_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_day_token_quota: Option<u64>,
    pub cost_per_1k_tokens: Decimal,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Runtime availability of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Available,
    RateLimited,
    Error,
    Unavailable,
}

/// Mutable runtime state per provider, owned by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    pub status: ProviderStatus,
    pub requests_this_minute: u32,
    pub requests_today: u32,
    pub tokens_today: u64,
    pub minute_window_start: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            status: ProviderStatus::Available,
            requests_this_minute: 0,
            requests_today: 0,
            tokens_today: 0,
            minute_window_start: None,
            last_error: None,
            last_error_at: None,
            cooldown_until: None,
            consecutive_failures: 0,
        }
    }
}

impl ProviderState {
    /// Rolling-minute counter, anchored at `minute_window_start`.
    pub fn requests_in_window(&self, now: DateTime<Utc>) -> u32 {
        match self.minute_window_start {
            Some(start) if (now - start).num_seconds() <= 60 => self.requests_this_minute,
            _ => 0,
        }
    }

    pub fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// Per-provider status snapshot returned by `ProviderRouter::status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub name: String,
    pub model: String,
    pub priority: u8,
    pub status: ProviderStatus,
    pub requests_today: u32,
    pub requests_this_minute: u32,
    pub tokens_today: u64,
    pub per_minute_limit: u32,
    pub per_day_limit: u32,
    pub per_day_token_quota: Option<u64>,
    pub last_error: Option<String>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub is_preferred: bool,
}

/// Result of a routed LLM call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    /// True when the provider reported no usage and the count is a
    /// word-count approximation.
    pub approximate_usage: bool,
}

/// Persisted usage row keyed by (provider, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub date: NaiveDate,
    pub requests: u32,
    pub tokens: u64,
}

impl UsageRecord {
    pub fn empty(provider: &str, date: NaiveDate) -> Self {
        Self {
            provider: provider.to_string(),
            date,
            requests: 0,
            tokens: 0,
        }
    }
}
