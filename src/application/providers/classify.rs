//! Outbound-call error classification.
//!
//! Every failure from an LLM transport passes through here exactly once;
//! the verdict drives provider state, cooldowns and circuit breaking.

use crate::application::providers::reset::parse_retry_hint;
use crate::domain::ports::TransportFailure;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Explicit rate/quota signal; cool the provider down until the
    /// parsed horizon (or a default when no hint parses).
    RateLimit { retry_after: Option<Duration> },
    /// Bad model id / no endpoints for it. Requires human intervention.
    ModelNotFound,
    /// Missing or rejected credentials, missing client configuration.
    /// Long cooldown, no auto-recovery.
    Unavailable,
    /// Anything else, including timeouts: retry locally, then fail over.
    Transient,
}

pub fn classify(failure: &TransportFailure, now: DateTime<Utc>) -> ErrorClass {
    let message = failure.message.to_lowercase();

    if failure.status == Some(429)
        || message.contains("rate limit")
        || message.contains("429")
        || message.contains("retry-after")
    {
        return ErrorClass::RateLimit {
            retry_after: parse_retry_hint(&failure.message, now),
        };
    }

    // Narrow model matching: only explicit not-found signals. A benign
    // error whose text happens to contain "model" stays transient.
    if failure.status == Some(404)
        || message.contains("no endpoints found")
        || message.contains("model not found")
        || message.contains("model_not_found")
        || message.contains("unknown model")
    {
        return ErrorClass::ModelNotFound;
    }

    if failure.status == Some(401)
        || failure.status == Some(403)
        || message.contains("missing api key")
        || message.contains("invalid api key")
        || message.contains("client not configured")
    {
        return ErrorClass::Unavailable;
    }

    ErrorClass::Transient
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn rate_limit_with_hint() {
        let failure = TransportFailure::with_status(429, "rate limit reached, try again in 2m30s");
        match classify(&failure, now()) {
            ErrorClass::RateLimit { retry_after } => {
                assert_eq!(retry_after.unwrap().num_seconds(), 150)
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn model_errors_need_explicit_signal() {
        let not_found = TransportFailure::with_status(404, "No endpoints found for llama-x");
        assert_eq!(classify(&not_found, now()), ErrorClass::ModelNotFound);

        // "model" alone is not enough (narrowed from the legacy filter).
        let benign = TransportFailure::message("the model produced malformed output");
        assert_eq!(classify(&benign, now()), ErrorClass::Transient);
    }

    #[test]
    fn auth_failures_are_unavailable() {
        let failure = TransportFailure::with_status(401, "Unauthorized");
        assert_eq!(classify(&failure, now()), ErrorClass::Unavailable);
    }

    #[test]
    fn timeout_is_transient() {
        let failure = TransportFailure::timeout(std::time::Duration::from_secs(30));
        assert_eq!(classify(&failure, now()), ErrorClass::Transient);
    }
}
