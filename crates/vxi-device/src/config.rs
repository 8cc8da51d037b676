//! Device server configuration
//!
//! Read from the `[server]` table of the configuration file:
//!
//! ```toml
//! [server]
//! mode = "multi-client"
//! max_receive_size = 1024
//! abort_port = 1025
//! abort_timeout_ms = 1000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Whether the server accepts more than one live link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMode {
    /// Any number of links; link-table mutations are serialised
    #[default]
    MultiClient,
    /// At most one live link
    SingleClient,
}

/// Device server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceServerConfig {
    #[serde(default)]
    pub mode: ServerMode,

    /// Largest `device_write` payload accepted, reported by `create_link`
    #[serde(default = "default_max_receive_size")]
    pub max_receive_size: u32,

    /// Port of the abort channel, reported by `create_link`
    #[serde(default)]
    pub abort_port: u16,

    /// Bound on waiting for an aborted operation to stop
    #[serde(default = "default_abort_timeout_ms")]
    pub abort_timeout_ms: u64,

    /// Lock timeout used by callers that do not supply one
    #[serde(default = "default_lock_timeout_ms")]
    pub default_lock_timeout_ms: u32,

    /// I/O timeout used by callers that do not supply one
    #[serde(default = "default_io_timeout_ms")]
    pub default_io_timeout_ms: u32,

    /// Buffered service requests per subscriber
    #[serde(default = "default_service_request_capacity")]
    pub service_request_capacity: usize,
}

fn default_max_receive_size() -> u32 {
    1024
}

fn default_abort_timeout_ms() -> u64 {
    1000
}

fn default_lock_timeout_ms() -> u32 {
    1000
}

fn default_io_timeout_ms() -> u32 {
    2000
}

fn default_service_request_capacity() -> usize {
    32
}

impl Default for DeviceServerConfig {
    fn default() -> Self {
        Self {
            mode: ServerMode::default(),
            max_receive_size: default_max_receive_size(),
            abort_port: 0,
            abort_timeout_ms: default_abort_timeout_ms(),
            default_lock_timeout_ms: default_lock_timeout_ms(),
            default_io_timeout_ms: default_io_timeout_ms(),
            service_request_capacity: default_service_request_capacity(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: DeviceServerConfig,
}

impl DeviceServerConfig {
    /// Load the `[server]` table from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse the `[server]` table from a TOML document
    ///
    /// A document without a `[server]` table yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.server.validate()?;
        Ok(file.server)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_receive_size == 0 {
            return Err(ConfigError::Invalid(
                "max_receive_size must be greater than zero".to_string(),
            ));
        }
        if self.abort_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "abort_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.service_request_capacity == 0 {
            return Err(ConfigError::Invalid(
                "service_request_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_single_client(&self) -> bool {
        self.mode == ServerMode::SingleClient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceServerConfig::from_toml("").unwrap();
        assert_eq!(config.mode, ServerMode::MultiClient);
        assert_eq!(config.max_receive_size, 1024);
        assert_eq!(config.abort_timeout_ms, 1000);
    }

    #[test]
    fn test_server_table() {
        let config = DeviceServerConfig::from_toml(
            r#"
            [server]
            mode = "single-client"
            max_receive_size = 4096
            abort_port = 1025

            [[instrument]]
            name = "inst0"
            "#,
        )
        .unwrap();
        assert!(config.is_single_client());
        assert_eq!(config.max_receive_size, 4096);
        assert_eq!(config.abort_port, 1025);
    }

    #[test]
    fn test_rejects_zero_receive_size() {
        let err = DeviceServerConfig::from_toml("[server]\nmax_receive_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = DeviceServerConfig::from_toml("[server]\nmode = \"bogus\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
