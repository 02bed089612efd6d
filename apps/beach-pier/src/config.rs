use std::env;
#[cfg(test)]
use std::sync::Mutex;

use thiserror::Error;
use url::Url;

use crate::relay::RetentionPolicy;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:9000/ws";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.1.google.com:19302";
pub const DEFAULT_CHANNEL_LABEL: &str = "messenger";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid relay url {value:?}: {reason}")]
    InvalidRelayUrl { value: String, reason: String },
    #[error("invalid {var} value {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Rendezvous relay websocket endpoint
    pub relay_url: String,
    /// STUN/TURN urls handed to the peer connection; empty means host candidates only
    pub ice_servers: Vec<String>,
    /// Label of the locally created data channel
    pub channel_label: String,
    pub relay_retention: RetentionPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = non_empty_var("PIER_RELAY_URL") {
            config.relay_url = parse_relay_url(&value)?.to_string();
        }
        if let Ok(value) = env::var("PIER_ICE_SERVERS") {
            config.ice_servers = value
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = non_empty_var("PIER_CHANNEL_LABEL") {
            config.channel_label = value;
        }
        if let Some(value) = non_empty_var("PIER_RELAY_RETAIN") {
            let limit = value
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue {
                    var: "PIER_RELAY_RETAIN",
                    value: value.clone(),
                })?;
            config.relay_retention = RetentionPolicy::Latest(limit);
        }
        Ok(config)
    }

    pub fn with_relay_url(mut self, value: &str) -> Result<Self, ConfigError> {
        self.relay_url = parse_relay_url(value)?.to_string();
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            relay_retention: RetentionPolicy::Unbounded,
        }
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse_relay_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|err| ConfigError::InvalidRelayUrl {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidRelayUrl {
            value: value.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
