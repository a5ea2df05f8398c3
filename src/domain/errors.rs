use rust_decimal::Decimal;
use thiserror::Error;

/// Errors related to trading operations and portfolio bookkeeping
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("Insufficient cash: need {need}, available {available}")]
    InsufficientCash { need: Decimal, available: Decimal },

    #[error("Position not found: {position_id}")]
    PositionNotFound { position_id: String },

    #[error("Position {position_id} is not active")]
    PositionNotActive { position_id: String },

    #[error("Invalid trade signal: {reason}")]
    InvalidSignal { reason: String },

    #[error("Trade rejected: {reason}")]
    Rejected { reason: String },
}

/// Risk-limit violations surfaced by the risk engine
#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("Emergency stop active")]
    EmergencyStop,

    #[error("Daily loss limit breached: {loss_pct:.2}% > {limit_pct:.2}%")]
    DailyLossLimit { loss_pct: f64, limit_pct: f64 },

    #[error("Consecutive loss limit reached: {count} losses")]
    ConsecutiveLossLimit { count: u32 },

    #[error("Cooldown after loss: {remaining_secs}s remaining")]
    CooldownActive { remaining_secs: i64 },

    #[error("Open position limit reached: {open} >= {max}")]
    OpenPositionLimit { open: usize, max: usize },

    #[error("Portfolio risk limit exceeded: {current} > {max}")]
    PortfolioRiskLimit { current: Decimal, max: Decimal },
}

/// Errors raised by the mode controller
#[derive(Debug, Error)]
pub enum ModeError {
    #[error("Unknown mode label: {0}")]
    UnknownMode(String),

    #[error("Switching to live mode requires confirmation")]
    ConfirmationRequired,

    #[error("Failed to persist mode configuration: {0}")]
    PersistFailed(String),
}

/// Errors surfaced by the fan-out gateway to a single client
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Access denied to channel: {channel}")]
    AccessDenied { channel: String },

    #[error("Max channel subscriptions exceeded ({max})")]
    ChannelLimit { max: usize },

    #[error("Max wildcard subscriptions exceeded ({max})")]
    WildcardLimit { max: usize },

    #[error("Message rate limit exceeded")]
    RateLimited,

    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    #[error("Client not connected: {client_id}")]
    UnknownClient { client_id: String },
}
