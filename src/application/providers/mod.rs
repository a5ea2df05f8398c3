pub mod breaker;
pub mod classify;
pub mod reset;
pub mod router;
pub mod usage;

pub use router::{CallOverrides, ProviderRouter, RouterConfig};
