//! Server configuration: defaults, environment variables, and per-front-end
//! listen addresses.
//!
//! Every field has a sensible default; [`ServerConfig::from_env`] overlays
//! `GAZETTE_*` environment variables, and the server binary applies CLI
//! overrides on top of that.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base directory holding one subdirectory per topic.
    pub data_dir: PathBuf,
    pub tcp: TcpConfig,
    pub http: HttpConfig,
    pub websocket: WebSocketConfig,
}

/// Binary protocol listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

/// REST + SSE listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

/// WebSocket listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./gazette-data"),
            tcp: TcpConfig {
                enabled: true,
                host: "0.0.0.0".to_string(),
                port: 12345,
            },
            http: HttpConfig {
                enabled: true,
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            websocket: WebSocketConfig {
                enabled: true,
                host: "0.0.0.0".to_string(),
                port: 9090,
            },
        }
    }
}

impl ServerConfig {
    /// Build a configuration from defaults overlaid with `GAZETTE_*`
    /// environment variables.
    ///
    /// Recognized variables: `GAZETTE_DATA_DIR`, and per front-end
    /// `GAZETTE_{TCP,HTTP,WS}_ENABLED`, `GAZETTE_{TCP,HTTP,WS}_HOST`,
    /// `GAZETTE_{TCP,HTTP,WS}_PORT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("GAZETTE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        overlay_listener(
            "TCP",
            &mut config.tcp.enabled,
            &mut config.tcp.host,
            &mut config.tcp.port,
        )?;
        overlay_listener(
            "HTTP",
            &mut config.http.enabled,
            &mut config.http.host,
            &mut config.http.port,
        )?;
        overlay_listener(
            "WS",
            &mut config.websocket.enabled,
            &mut config.websocket.host,
            &mut config.websocket.port,
        )?;

        Ok(config)
    }

    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.tcp.host, self.tcp.port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    pub fn websocket_addr(&self) -> String {
        format!("{}:{}", self.websocket.host, self.websocket.port)
    }
}

fn overlay_listener(
    prefix: &str,
    enabled: &mut bool,
    host: &mut String,
    port: &mut u16,
) -> Result<()> {
    if let Ok(value) = std::env::var(format!("GAZETTE_{prefix}_ENABLED")) {
        *enabled = parse_bool(&value)
            .ok_or_else(|| Error::InvalidArgument(format!("GAZETTE_{prefix}_ENABLED: {value:?}")))?;
    }
    if let Ok(value) = std::env::var(format!("GAZETTE_{prefix}_HOST")) {
        *host = value;
    }
    if let Ok(value) = std::env::var(format!("GAZETTE_{prefix}_PORT")) {
        *port = value
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("GAZETTE_{prefix}_PORT: {value:?}")))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert!(config.tcp.enabled);
        assert_eq!(config.tcp.port, 12345);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.websocket.port, 9090);
        assert_eq!(config.tcp_addr(), "0.0.0.0:12345");
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = ServerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
