//! OpenAI-compatible chat-completions codec, shared by Groq,
//! OpenRouter, Together, Ollama and OpenAI itself.

use crate::domain::ports::{Completion, CompletionRequest, TransportFailure};
use crate::domain::provider::{ProviderDescriptor, ProviderKind};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u64>,
}

fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Groq => "https://api.groq.com/openai/v1",
        ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
        ProviderKind::Together => "https://api.together.xyz/v1",
        ProviderKind::Ollama => "http://localhost:11434/v1",
        ProviderKind::OpenAi => "https://api.openai.com/v1",
        // Gemini never routes through this codec.
        ProviderKind::Gemini => "https://api.openai.com/v1",
    }
}

pub async fn complete(
    client: &reqwest::Client,
    provider: &ProviderDescriptor,
    request: &CompletionRequest,
) -> Result<Completion, TransportFailure> {
    let api_key = provider
        .api_key
        .as_deref()
        .ok_or_else(|| TransportFailure::message("missing api key"))?;
    let base = provider
        .base_url
        .as_deref()
        .unwrap_or_else(|| default_base_url(provider.kind));
    let url = format!("{}/chat/completions", base.trim_end_matches('/'));

    let body = json!({
        "model": request.model,
        "messages": [
            { "role": "system", "content": request.system_prompt },
            { "role": "user", "content": request.user_message },
        ],
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    });

    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| TransportFailure {
            status: None,
            message: e.to_string(),
            timed_out: e.is_timeout(),
        })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(TransportFailure::with_status(status.as_u16(), text));
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| TransportFailure::message(format!("malformed response: {}", e)))?;

    let text = parsed
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .ok_or_else(|| TransportFailure::message("empty completion"))?;

    Ok(Completion {
        text,
        tokens_used: parsed.usage.and_then(|u| u.total_tokens),
    })
}
