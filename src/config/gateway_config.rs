//! Gateway guardrails and authentication from the environment.

use crate::application::gateway::{GatewayAuth, GatewayConfig};
use crate::config::{env_flag, env_opt, env_or};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct GatewayEnvConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub max_channels_per_client: usize,
    pub max_wildcards_per_client: usize,
    pub max_messages_per_second: u32,
    pub require_auth: bool,
    pub api_key: Option<String>,
    pub default_role: String,
}

impl GatewayEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_host: env_or("GATEWAY_HOST", "0.0.0.0".to_string())?,
            bind_port: env_or("GATEWAY_PORT", 8889u16)?,
            max_channels_per_client: env_or("MAX_CHANNELS_PER_CLIENT", 50usize)?,
            max_wildcards_per_client: env_or("MAX_WILDCARD_SUBSCRIPTIONS", 5usize)?,
            max_messages_per_second: env_or("MAX_MESSAGES_PER_SECOND", 1000u32)?,
            require_auth: env_flag("REQUIRE_AUTH", false),
            api_key: env_opt("GATEWAY_API_KEY"),
            default_role: env_or("DEFAULT_ROLE", "user".to_string())?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_channels_per_client: self.max_channels_per_client,
            max_wildcards_per_client: self.max_wildcards_per_client,
            max_messages_per_second: Some(self.max_messages_per_second),
            default_role: self.default_role.clone(),
            ..GatewayConfig::default()
        }
    }

    pub fn to_auth(&self) -> GatewayAuth {
        GatewayAuth {
            require_auth: self.require_auth,
            api_key: self.api_key.clone(),
            default_role: self.default_role.clone(),
        }
    }
}
