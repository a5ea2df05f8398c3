//! Pub/sub to client fan-out.
//!
//! The gateway is dumb: it authenticates, filters by ACL, sequences, and
//! forwards. No business logic lives here.

pub mod acl;
pub mod fan_out;
pub mod protocol;

pub use acl::Acl;
pub use fan_out::{GatewayCore, GatewayStats};
pub use protocol::{ClientRequest, FramePayload};

use std::collections::HashMap;

/// Connection authentication policy for the transport layer.
#[derive(Debug, Clone)]
pub struct GatewayAuth {
    pub require_auth: bool,
    pub api_key: Option<String>,
    pub default_role: String,
}

impl GatewayAuth {
    /// Map a connection token to a role. The shared API key grants
    /// admin; any other token (or none, when auth is off) gets the
    /// default role.
    pub fn resolve_role(&self, token: Option<&str>) -> Option<String> {
        if !self.require_auth {
            return Some(self.default_role.clone());
        }
        let token = token?;
        if self.api_key.as_deref() == Some(token) {
            Some("admin".to_string())
        } else {
            Some(self.default_role.clone())
        }
    }
}

/// Guardrail configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_channels_per_client: usize,
    pub max_wildcards_per_client: usize,
    /// Optional outbound token bucket per client.
    pub max_messages_per_second: Option<u32>,
    pub default_role: String,
    /// role -> allowed channel prefixes/patterns.
    pub channel_acl: HashMap<String, Vec<String>>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut channel_acl = HashMap::new();
        channel_acl.insert(
            "user".to_string(),
            vec![
                "market:tick:*".to_string(),
                "market:tick".to_string(),
                "indicators:*".to_string(),
            ],
        );
        channel_acl.insert(
            "admin".to_string(),
            vec![
                "market:tick:*".to_string(),
                "market:tick".to_string(),
                "engine:signal:*".to_string(),
                "engine:signal".to_string(),
                "engine:decision:*".to_string(),
                "engine:decision".to_string(),
                "indicators:*".to_string(),
            ],
        );
        channel_acl.insert("internal".to_string(), vec!["*".to_string()]);
        Self {
            max_channels_per_client: 50,
            max_wildcards_per_client: 5,
            max_messages_per_second: Some(1000),
            default_role: "user".to_string(),
            channel_acl,
        }
    }
}
