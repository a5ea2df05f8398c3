pub mod assessment;
pub mod config;

pub use assessment::{RiskAssessment, RiskLevel};
pub use config::RiskConfig;
