//! TOML configuration for the bridge daemon.
//!
//! The file is read from the platform-appropriate location unless a path is
//! given explicitly:
//! - Windows:  `%APPDATA%\MWBCompat\config.toml`
//! - Linux:    `~/.config/mwbcompat/config.toml`
//! - macOS:    `~/Library/Application Support/MWBCompat/config.toml`
//!
//! ```toml
//! [network]
//! message_port = 15101
//! clipboard_port = 15100
//!
//! [machine]
//! name = "DESKTOP-1"
//!
//! [[peers]]
//! host = "192.168.1.20"
//! ```
//!
//! Every field has a serde default, so an empty or missing file is valid.
//! The passphrase is never stored here; it is read from the
//! `MWB_COMPAT_PASSPHRASE` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mwb_core::{LocalMachine, MachineId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::{PortPair, ServiceConfig};

/// Environment variable holding the shared passphrase.
pub const PASSPHRASE_ENV: &str = "MWB_COMPAT_PASSPHRASE";

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "MWB_COMPAT_CONFIG";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("passphrase not set; export {PASSPHRASE_ENV}")]
    MissingPassphrase,
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Hosts dialled at startup.
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_message_port")]
    pub message_port: u16,
    #[serde(default = "default_clipboard_port")]
    pub clipboard_port: u16,
    /// `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Identity announced to peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    /// Sanitised and truncated to 32 characters on load.
    #[serde(default = "default_machine_name")]
    pub name: String,
    /// Drawn at random on every start when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MachineId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_clipboard_keepalive_secs")]
    pub clipboard_keepalive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// A peer to dial at startup. Ports default to the standard pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerEntry {
    pub host: String,
    #[serde(default = "default_message_port")]
    pub message_port: u16,
    #[serde(default = "default_clipboard_port")]
    pub clipboard_port: u16,
}

impl PeerEntry {
    pub fn ports(&self) -> PortPair {
        PortPair {
            message: self.message_port,
            clipboard: self.clipboard_port,
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_message_port() -> u16 {
    15101
}
fn default_clipboard_port() -> u16 {
    15100
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_machine_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| "mwb-bridge".to_string())
}
fn default_max_attempts() -> u32 {
    3
}
fn default_delay_secs() -> u64 {
    5
}
fn default_heartbeat_secs() -> u64 {
    5
}
fn default_clipboard_keepalive_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            message_port: default_message_port(),
            clipboard_port: default_clipboard_port(),
            bind_address: default_bind_address(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: default_machine_name(),
            id: None,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            clipboard_keepalive_secs: default_clipboard_keepalive_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ── Conversion ────────────────────────────────────────────────────────────────

impl BridgeConfig {
    /// Builds the service settings, drawing a random machine id if none is configured.
    pub fn service_config(&self) -> ServiceConfig {
        let local = match self.machine.id {
            Some(id) => LocalMachine::new(id, &self.machine.name),
            None => LocalMachine::with_random_id(&self.machine.name),
        };
        let mut config = ServiceConfig::new(local);
        config.bind_address = self.network.bind_address.clone();
        config.ports = PortPair {
            message: self.network.message_port,
            clipboard: self.network.clipboard_port,
        };
        config.heartbeat_interval = Duration::from_secs(self.timers.heartbeat_secs);
        config.clipboard_keepalive_interval =
            Duration::from_secs(self.timers.clipboard_keepalive_secs);
        config.reconnect_max_attempts = self.reconnect.max_attempts;
        config.reconnect_delay = Duration::from_secs(self.reconnect.delay_secs);
        config
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.network.connect_timeout_secs)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from the platform location when `None`.
///
/// A missing file yields `BridgeConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BridgeConfig::default()),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Reads the passphrase from [`PASSPHRASE_ENV`].
///
/// # Errors
///
/// Returns [`ConfigError::MissingPassphrase`] when the variable is unset or empty.
pub fn passphrase_from_env() -> Result<String, ConfigError> {
    std::env::var(PASSPHRASE_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .ok_or(ConfigError::MissingPassphrase)
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MWBCompat"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("mwbcompat"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("MWBCompat")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_config_default_has_legacy_ports() {
        // Arrange / Act
        let cfg = BridgeConfig::default();

        // Assert
        assert_eq!(cfg.network.message_port, 15101);
        assert_eq!(cfg.network.clipboard_port, 15100);
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_bridge_config_default_timers_and_reconnect() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.timers.heartbeat_secs, 5);
        assert_eq!(cfg.timers.clipboard_keepalive_secs, 10);
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert_eq!(cfg.reconnect.delay_secs, 5);
        assert_eq!(cfg.logging.log_level, "info");
        assert!(cfg.peers.is_empty());
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: BridgeConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg.network, NetworkConfig::default());
        assert_eq!(cfg.machine.id, None);
    }

    #[test]
    fn test_deserialize_partial_sections_override_defaults() {
        // Arrange
        let toml_str = r#"
[network]
message_port = 25101

[machine]
name = "office-pc"
id = 7

[[peers]]
host = "10.0.0.2"

[[peers]]
host = "10.0.0.3"
message_port = 16101
clipboard_port = 16100
"#;

        // Act
        let cfg: BridgeConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.message_port, 25101);
        assert_eq!(cfg.network.clipboard_port, 15100);
        assert_eq!(cfg.machine.name, "office-pc");
        assert_eq!(cfg.machine.id, Some(7));
        assert_eq!(cfg.peers.len(), 2);
        assert_eq!(
            cfg.peers[0].ports(),
            PortPair {
                message: 15101,
                clipboard: 15100
            }
        );
        assert_eq!(cfg.peers[1].ports().message, 16101);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<BridgeConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = BridgeConfig::default();
        cfg.machine.id = Some(99);
        cfg.peers.push(PeerEntry {
            host: "192.168.1.20".to_string(),
            message_port: 15101,
            clipboard_port: 15100,
        });

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: BridgeConfig = toml::from_str(&toml_str).expect("deserialize");

        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_service_config_uses_configured_identity_and_timers() {
        // Arrange
        let mut cfg = BridgeConfig::default();
        cfg.machine.name = "lab".to_string();
        cfg.machine.id = Some(12);
        cfg.timers.heartbeat_secs = 2;
        cfg.reconnect.max_attempts = 7;

        // Act
        let service = cfg.service_config();

        // Assert
        assert_eq!(service.local.id(), 12);
        assert_eq!(service.local.name(), "lab");
        assert_eq!(service.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(service.reconnect_max_attempts, 7);
        assert_eq!(service.ports.message, 15101);
    }

    #[test]
    fn test_service_config_draws_random_id_when_unset() {
        let cfg = BridgeConfig::default();
        let service = cfg.service_config();
        assert!(service.local.id() > 255);
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        // Arrange
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");

        // Act
        let cfg = load_config(Some(&path)).expect("missing file is not an error");

        // Assert
        assert_eq!(cfg.network, NetworkConfig::default());
    }

    #[test]
    fn test_load_config_reads_explicit_path() {
        let path = std::env::temp_dir().join(format!("mwb-bridge-{}.toml", std::process::id()));
        std::fs::write(&path, "[logging]\nlog_level = \"debug\"\n").expect("write temp config");

        let cfg = load_config(Some(&path));
        let _ = std::fs::remove_file(&path);

        assert_eq!(cfg.expect("load").logging.log_level, "debug");
    }

    #[test]
    fn test_load_config_reports_parse_error() {
        let path =
            std::env::temp_dir().join(format!("mwb-bridge-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "network = [").expect("write temp config");

        let result = load_config(Some(&path));
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
