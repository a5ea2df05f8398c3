use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        write!(f, "{}", name)
    }
}

impl RiskLevel {
    /// Bucket an additive risk score.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=1 => RiskLevel::Low,
            2..=3 => RiskLevel::Medium,
            4..=5 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

/// Result of a pre-trade risk check. `can_trade == false` always carries
/// a zero position size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub can_trade: bool,
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub position_size: u32,
    pub risk_amount: Decimal,
    pub risk_pct: Decimal,
    pub reward_ratio: Decimal,
    pub win_probability: f64,
    pub expected_value: Decimal,
    pub max_risk_amount: Decimal,
}

impl RiskAssessment {
    /// A blocked assessment with no sizing.
    pub fn rejected(risk_level: RiskLevel, warning: impl Into<String>) -> Self {
        Self {
            can_trade: false,
            risk_level,
            risk_score: u8::MAX,
            warnings: vec![warning.into()],
            recommendations: Vec::new(),
            position_size: 0,
            risk_amount: Decimal::ZERO,
            risk_pct: Decimal::ZERO,
            reward_ratio: Decimal::ZERO,
            win_probability: 0.0,
            expected_value: Decimal::ZERO,
            max_risk_amount: Decimal::ZERO,
        }
    }
}
