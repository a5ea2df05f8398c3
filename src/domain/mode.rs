use crate::domain::errors::ModeError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading mode. Exactly one mode is active per process at any time.
///
/// The serialized labels (`paper_mock`, `paper_live`, `live`) are the
/// stored synonyms used in persisted configuration and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Closed-market simulation against synthetic data.
    #[serde(rename = "paper_mock")]
    SimClosed,
    /// Open-market simulation against live data, paper execution.
    #[serde(rename = "paper_live")]
    SimOpen,
    /// Real execution. Manual confirmation required to enter.
    #[serde(rename = "live")]
    Live,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::SimClosed => "paper_mock",
            Mode::SimOpen => "paper_live",
            Mode::Live => "live",
        }
    }

    pub fn is_simulated(&self) -> bool {
        !matches!(self, Mode::Live)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper_mock" => Ok(Mode::SimClosed),
            "paper_live" => Ok(Mode::SimOpen),
            "live" => Ok(Mode::Live),
            other => Err(ModeError::UnknownMode(other.to_string())),
        }
    }
}

/// Historical replay window recorded alongside the mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayWindow {
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Bar interval label, e.g. "15m".
    pub interval: String,
}

/// Persisted mode configuration.
///
/// Presence of `manual_override` disables auto-switching. The whole
/// document is written atomically so a partial read cannot observe an
/// override without its replay window (or vice versa).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_override: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_replay: Option<ReplayWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_switch_at: Option<DateTime<Utc>>,
}

impl ModeConfig {
    pub fn has_manual_override(&self) -> bool {
        self.manual_override.is_some()
    }
}
