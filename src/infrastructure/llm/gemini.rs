//! Google Gemini generateContent codec.

use crate::domain::ports::{Completion, CompletionRequest, TransportFailure};
use crate::domain::provider::ProviderDescriptor;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
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
    let base = provider.base_url.as_deref().unwrap_or(DEFAULT_BASE);
    let url = format!(
        "{}/models/{}:generateContent?key={}",
        base.trim_end_matches('/'),
        request.model,
        api_key
    );

    // Gemini takes one combined prompt rather than role-tagged messages.
    let prompt = format!("{}\n\n{}", request.system_prompt, request.user_message);
    let body = json!({
        "contents": [ { "parts": [ { "text": prompt } ] } ],
        "generationConfig": {
            "temperature": request.temperature,
            "maxOutputTokens": request.max_tokens,
        }
    });

    let response = client
        .post(&url)
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

    let parsed: GenerateResponse = response
        .json()
        .await
        .map_err(|e| TransportFailure::message(format!("malformed response: {}", e)))?;

    let text = parsed
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.first())
        .and_then(|p| p.text.clone())
        .ok_or_else(|| TransportFailure::message("empty completion"))?;

    Ok(Completion {
        text,
        tokens_used: parsed.usage_metadata.and_then(|u| u.total_token_count),
    })
}
