pub mod engine;

pub use engine::RiskEngine;
