pub mod portfolio;
pub mod position;

pub use portfolio::PortfolioState;
pub use position::{CloseReason, Position, PositionStatus};
