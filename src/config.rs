//! Startup configuration read from environment variables.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bon::Builder;

pub const DEFAULT_GATEWAY_ADDR: &str = ":8080";
pub const DEFAULT_BACKEND_ADDR: &str = "127.0.0.1:8550";
pub const DEFAULT_POOL_SIZE: usize = 20;
pub const DEFAULT_BACKEND_LISTEN_ADDR: &str = ":8550";
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid listen address {value:?}")]
    Address {
        var: &'static str,
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("{var}: expected a non-negative integer, got {value:?}")]
    Number {
        var: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("{var} must be at least 1")]
    Zero { var: &'static str },
}

#[derive(Debug, Clone, Builder)]
pub struct GatewayConfig {
    /// Raw TCP client listener.
    pub listen_addr: SocketAddr,

    /// WebSocket client listener, if any.
    pub ws_listen_addr: Option<SocketAddr>,

    #[builder(into, default = DEFAULT_BACKEND_ADDR.to_string())]
    pub backend_addr: String,

    #[builder(default = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_addr = parse_listen_addr(
            "GATEWAY_ADDR",
            &lookup("GATEWAY_ADDR").unwrap_or_else(|| DEFAULT_GATEWAY_ADDR.to_string()),
        )?;
        let ws_listen_addr = lookup("GATEWAY_WS_ADDR")
            .filter(|value| !value.is_empty())
            .map(|value| parse_listen_addr("GATEWAY_WS_ADDR", &value))
            .transpose()?;
        let backend_addr =
            lookup("BACKEND_ADDR").unwrap_or_else(|| DEFAULT_BACKEND_ADDR.to_string());
        let pool_size = match lookup("POOL_SIZE") {
            Some(value) => parse_number("POOL_SIZE", &value)?,
            None => DEFAULT_POOL_SIZE,
        };
        if pool_size == 0 {
            return Err(ConfigError::Zero { var: "POOL_SIZE" });
        }

        Ok(Self::builder()
            .listen_addr(listen_addr)
            .maybe_ws_listen_addr(ws_listen_addr)
            .backend_addr(backend_addr)
            .pool_size(pool_size)
            .build())
    }
}

#[derive(Debug, Clone, Builder)]
pub struct BackendConfig {
    pub listen_addr: SocketAddr,

    #[builder(default = Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS))]
    pub drain_timeout: Duration,
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_addr = parse_listen_addr(
            "BACKEND_LISTEN_ADDR",
            &lookup("BACKEND_LISTEN_ADDR")
                .unwrap_or_else(|| DEFAULT_BACKEND_LISTEN_ADDR.to_string()),
        )?;
        let drain_secs = match lookup("DRAIN_TIMEOUT_SECS") {
            Some(value) => parse_number("DRAIN_TIMEOUT_SECS", &value)?,
            None => DEFAULT_DRAIN_TIMEOUT_SECS,
        };

        Ok(Self::builder()
            .listen_addr(listen_addr)
            .drain_timeout(Duration::from_secs(drain_secs))
            .build())
    }
}

/// Parse a listen address; `":port"` means every IPv4 interface.
pub fn parse_listen_addr(var: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    let value = value.trim();
    if let Some(port) = value.strip_prefix(':') {
        let port: u16 = parse_number(var, port)?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    value.parse().map_err(|source| ConfigError::Address {
        var,
        value: value.to_string(),
        source,
    })
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    value.trim().parse().map_err(|source| ConfigError::Number {
        var,
        value: value.to_string(),
        source,
    })
}
