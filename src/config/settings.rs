//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::server::ServerOptions;
use crate::mcp::types::ServerInfo;
use crate::mcp::SUPPORTED_PROTOCOL_VERSIONS;

/// Log levels accepted in `logging.level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server identity.
    #[serde(default)]
    pub server: ServerConfig,

    /// Protocol settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Feature toggles.
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol.supported_versions.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "protocol.supported_versions must not be empty".to_string(),
            });
        }

        if let Some(bad) = self
            .protocol
            .supported_versions
            .iter()
            .find(|v| !is_protocol_version(v))
        {
            return Err(ConfigError::ValidationError {
                message: format!("Invalid protocol version '{bad}'. Expected YYYY-MM-DD"),
            });
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        if !self.transport.path.starts_with('/') {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid HTTP path '{}'. Must start with '/'",
                    self.transport.path
                ),
            });
        }

        Ok(())
    }

    /// Builds the engine settings described by this configuration.
    #[must_use]
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            server_info: ServerInfo {
                name: self.server.name.clone(),
                version: self.server.version.clone(),
            },
            instructions: self.server.instructions.clone(),
            supported_versions: self.protocol.supported_versions.clone(),
            client_logging: self.logging.client_logging,
            notify_list_changed: self.features.notify_list_changed,
        }
    }
}

/// Checks the `YYYY-MM-DD` shape of a protocol version.
fn is_protocol_version(version: &str) -> bool {
    let bytes = version.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Name reported to clients.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Version reported to clients.
    #[serde(default = "default_server_version")]
    pub version: String,

    /// Usage hints sent in the initialize response.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
            instructions: None,
        }
    }
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Protocol configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Supported protocol versions, newest first.
    #[serde(default = "default_supported_versions")]
    pub supported_versions: Vec<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            supported_versions: default_supported_versions(),
        }
    }
}

fn default_supported_versions() -> Vec<String> {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Which transport the binary serves on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// One message per HTTP POST.
    Http,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Transport to serve on.
    #[serde(default)]
    pub kind: TransportKind,

    /// HTTP bind host.
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP endpoint path.
    #[serde(default = "default_path")]
    pub path: String,
}

impl TransportConfig {
    /// Returns the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_path() -> String {
    "/mcp".to_string()
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Forward log messages to the client via `notifications/message`.
    #[serde(default = "default_true")]
    pub client_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            client_logging: true,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Feature toggles.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeaturesConfig {
    /// Register the built-in demonstration features.
    #[serde(default = "default_true")]
    pub builtins: bool,

    /// Announce registry changes after initialisation.
    #[serde(default = "default_true")]
    pub notify_list_changed: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            builtins: true,
            notify_list_changed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.kind, TransportKind::Stdio);
        assert_eq!(config.transport.bind_addr(), "127.0.0.1:8080");
        assert!(config.features.builtins);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "server": {
                "name": "notes",
                "version": "1.2.3",
                "instructions": "Use the search tool first"
            },
            "protocol": {
                "supported_versions": ["2025-11-25", "2025-06-18"]
            },
            "transport": {
                "kind": "http",
                "host": "0.0.0.0",
                "port": 9000,
                "path": "/rpc"
            },
            "logging": {
                "level": "debug",
                "client_logging": false
            },
            "features": {
                "builtins": false,
                "notify_list_changed": false
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.name, "notes");
        assert_eq!(config.transport.kind, TransportKind::Http);
        assert_eq!(config.transport.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.transport.path, "/rpc");
        assert_eq!(config.logging.level, "debug");
        assert!(!config.features.builtins);

        let options = config.server_options();
        assert_eq!(options.server_info.version, "1.2.3");
        assert_eq!(options.instructions.as_deref(), Some("Use the search tool first"));
        assert_eq!(options.supported_versions, vec!["2025-11-25", "2025-06-18"]);
        assert!(!options.client_logging);
        assert!(!options.notify_list_changed);
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
        assert!(config.client_logging);
    }

    #[test]
    fn default_versions_match_engine() {
        let config = ProtocolConfig::default();
        assert_eq!(config.supported_versions[0], crate::mcp::LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn reject_empty_versions() {
        let json = r#"{"protocol": {"supported_versions": []}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_malformed_version() {
        let json = r#"{"protocol": {"supported_versions": ["2025-6-18"]}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_invalid_log_level() {
        let json = r#"{"logging": {"level": "loud"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_relative_path() {
        let json = r#"{"transport": {"path": "mcp"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_transport() {
        let json = r#"{"transport": {"kind": "websocket"}}"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
