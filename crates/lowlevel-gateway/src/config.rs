// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration. Every
//! field has a default, so a file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::frame::BROADCAST_CLIENT_ID;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub socket: SocketConfig,

    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub pause: PauseConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// TCP server side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Address to listen on. The router refuses to open while unset.
    #[serde(default = "default_socket_address")]
    pub address: Option<IpAddr>,

    #[serde(default = "default_socket_port")]
    pub port: u16,

    /// Number of connection slots (slot index = client id).
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

/// Serial bus side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path. The router refuses to open while unset.
    #[serde(default = "default_serial_device")]
    pub device: Option<String>,

    /// Switch the line to raw mode when opening.
    #[serde(default = "default_true")]
    pub raw_mode: bool,
}

/// Out-of-band pause/resume socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_pause_address")]
    pub address: IpAddr,

    #[serde(default = "default_pause_port")]
    pub port: u16,

    /// Byte an operator sends to request a pause.
    #[serde(default = "default_pause_token")]
    pub token: u8,

    /// Period of the token heartbeat while paused (milliseconds).
    #[serde(default = "default_resume_period")]
    pub resume_period_ms: u64,
}

/// Router behavior and resource bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Channel mask given to new slots and restored on close.
    #[serde(default = "default_subscription")]
    pub default_subscription: u32,

    /// Restore the default mask when a slot disconnects instead of only
    /// when the router closes.
    #[serde(default)]
    pub reset_subscriptions_on_disconnect: bool,

    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,

    /// Upper bound for variable payloads (unset = unbounded).
    #[serde(default)]
    pub max_variable_payload: Option<usize>,

    /// Inbound queue bound per side; extra frames are dropped.
    #[serde(default = "default_max_queued_frames")]
    pub max_queued_frames: usize,

    /// Frames waiting to be written, per link (bus or slot). A frame that
    /// does not fit is dropped whole.
    #[serde(default = "default_max_pending_frames")]
    pub max_pending_frames: usize,

    /// Sleep between router cycles (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delay between failed open attempts (milliseconds).
    #[serde(default = "default_reopen_delay")]
    pub reopen_delay_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_socket_address() -> Option<IpAddr> {
    Some(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 2)))
}

fn default_socket_port() -> u16 {
    80
}

fn default_max_clients() -> usize {
    32
}

fn default_backlog() -> i32 {
    16
}

fn default_serial_device() -> Option<String> {
    Some("/dev/ttyAMA0".to_string())
}

fn default_true() -> bool {
    true
}

fn default_pause_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_pause_port() -> u16 {
    23747
}

fn default_pause_token() -> u8 {
    19
}

fn default_resume_period() -> u64 {
    1000
}

fn default_subscription() -> u32 {
    0x06 // channels 1 and 2
}

fn default_buffer_size() -> usize {
    1024
}

fn default_max_queued_frames() -> usize {
    4096
}

fn default_max_pending_frames() -> usize {
    256
}

fn default_poll_interval() -> u64 {
    1
}

fn default_reopen_delay() -> u64 {
    1000
}


impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            address: default_socket_address(),
            port: default_socket_port(),
            max_clients: default_max_clients(),
            backlog: default_backlog(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_serial_device(),
            raw_mode: true,
        }
    }
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_pause_address(),
            port: default_pause_port(),
            token: default_pause_token(),
            resume_period_ms: default_resume_period(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_subscription: default_subscription(),
            reset_subscriptions_on_disconnect: false,
            read_buffer_size: default_buffer_size(),
            max_variable_payload: None,
            max_queued_frames: default_max_queued_frames(),
            max_pending_frames: default_max_pending_frames(),
            poll_interval_ms: default_poll_interval(),
            reopen_delay_ms: default_reopen_delay(),
        }
    }
}

impl SocketConfig {
    /// Listen address, if an IP is configured.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.address.map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl PauseConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn resume_period(&self) -> Duration {
        Duration::from_millis(self.resume_period_ms)
    }
}

impl RoutingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket.port == 0 {
            return Err(ConfigError::Invalid("socket.port must be > 0".into()));
        }
        if self.socket.max_clients == 0 {
            return Err(ConfigError::Invalid("socket.max_clients must be > 0".into()));
        }
        // slot index doubles as client id and must stay below the broadcast id
        if self.socket.max_clients > BROADCAST_CLIENT_ID as usize {
            return Err(ConfigError::Invalid(format!(
                "socket.max_clients must be <= {}",
                BROADCAST_CLIENT_ID
            )));
        }
        if self.socket.backlog <= 0 {
            return Err(ConfigError::Invalid("socket.backlog must be > 0".into()));
        }
        if let Some(device) = &self.serial.device {
            if device.is_empty() {
                return Err(ConfigError::Invalid("serial.device is empty".into()));
            }
        }
        if self.pause.enabled && self.pause.port == 0 {
            return Err(ConfigError::Invalid("pause.port must be > 0".into()));
        }
        if self.routing.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "routing.read_buffer_size must be > 0".into(),
            ));
        }
        if self.routing.max_queued_frames == 0 {
            return Err(ConfigError::Invalid(
                "routing.max_queued_frames must be > 0".into(),
            ));
        }
        if self.routing.max_pending_frames == 0 {
            return Err(ConfigError::Invalid(
                "routing.max_pending_frames must be > 0".into(),
            ));
        }
        if self.routing.max_variable_payload == Some(0) {
            return Err(ConfigError::Invalid(
                "routing.max_variable_payload must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(
            config.socket.socket_addr(),
            Some("172.16.0.2:80".parse().unwrap())
        );
        assert_eq!(config.socket.max_clients, 32);
        assert_eq!(config.serial.device.as_deref(), Some("/dev/ttyAMA0"));
        assert_eq!(config.pause.socket_addr(), "127.0.0.1:23747".parse().unwrap());
        assert_eq!(config.pause.token, 19);
        assert_eq!(config.routing.default_subscription, 0b110);
        assert!(!config.routing.reset_subscriptions_on_disconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = GatewayConfig::default();
        config.socket.max_clients = 255;
        assert!(config.validate().is_err());
        config.socket.max_clients = 254;
        assert!(config.validate().is_ok());

        config.socket.port = 0;
        assert!(config.validate().is_err());
        config.socket.port = 8080;

        config.routing.max_pending_frames = 0;
        assert!(config.validate().is_err());
        config.routing.max_pending_frames = 1;
        assert!(config.validate().is_ok());

        config.routing.max_queued_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[socket]
address = "0.0.0.0"
port = 9000

[serial]
device = "/dev/ttyUSB1"
raw_mode = false

[routing]
reset_subscriptions_on_disconnect = true
max_variable_payload = 512
"#
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.socket.socket_addr(), Some("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(config.socket.max_clients, 32);
        assert_eq!(config.serial.device.as_deref(), Some("/dev/ttyUSB1"));
        assert!(!config.serial.raw_mode);
        assert!(config.routing.reset_subscriptions_on_disconnect);
        assert_eq!(config.routing.max_variable_payload, Some(512));
        assert_eq!(config.pause.port, 23747);
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[socket]\nmax_clients = 0").unwrap();
        assert!(matches!(
            GatewayConfig::from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[socket\nport = ").unwrap();
        assert!(matches!(
            GatewayConfig::from_file(file.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = GatewayConfig::default();
        let text = config.to_toml_string().expect("serialize");
        assert!(text.contains("port = 80"));
        assert!(text.contains("device = \"/dev/ttyAMA0\""));
        let parsed: GatewayConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.socket.port, 80);
        assert_eq!(parsed.routing.max_pending_frames, 256);
    }
}
