use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Structured alert routed out-of-band to every configured sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Short machine type, e.g. "provider_rate_limited".
    pub kind: String,
    pub message: String,
    pub severity: AlertSeverity,
    #[serde(default)]
    pub details: serde_json::Value,
    /// Emitting component, e.g. "provider_router".
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        severity: AlertSeverity,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            severity,
            details: serde_json::Value::Null,
            source: source.into(),
            timestamp,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
