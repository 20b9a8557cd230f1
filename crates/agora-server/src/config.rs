use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use agora_gateway::GatewayConfig;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Where messages and keys live. `:memory:` keeps everything in-process.
pub const MEMORY_DB: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub db_path: String,
    pub service_token: Option<String>,
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            jwt_secret: DEV_JWT_SECRET.into(),
            db_path: "agora.db".into(),
            service_token: None,
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    /// Read `AGORA_*` variables, falling back to defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let jwt_secret = match std::env::var("AGORA_JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("AGORA_JWT_SECRET is not set, using the development secret");
                defaults.jwt_secret
            }
        };

        let port = match std::env::var("AGORA_PORT") {
            Ok(port) => port.parse().context("AGORA_PORT must be a port number")?,
            Err(_) => defaults.port,
        };

        let mut gateway = defaults.gateway;
        if let Ok(secs) = std::env::var("AGORA_HANDSHAKE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .context("AGORA_HANDSHAKE_TIMEOUT_SECS must be a whole number of seconds")?;
            gateway.handshake_timeout = Duration::from_secs(secs);
        }
        if let Ok(flag) = std::env::var("AGORA_PROTOCOL_ERROR_FRAMES") {
            gateway.protocol_error_frames = parse_flag(&flag)
                .with_context(|| format!("AGORA_PROTOCOL_ERROR_FRAMES: expected true/false, got {flag:?}"))?;
        }

        Ok(Self {
            host: std::env::var("AGORA_HOST").unwrap_or(defaults.host),
            port,
            jwt_secret,
            db_path: std::env::var("AGORA_DB_PATH").unwrap_or(defaults.db_path),
            service_token: std::env::var("AGORA_SERVICE_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            gateway,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
