use radius_proto::{FramedProtocol, NasPortType, ServiceType};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration file read when the host passes no path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/openvpn/radiusplugin.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Upstream RADIUS server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host name or IP address
    pub address: String,

    /// Authentication port
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,

    /// Accounting port
    #[serde(default = "default_acct_port")]
    pub acct_port: u16,

    /// Shared secret for this server
    pub secret: String,

    /// Per-attempt response timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Retransmissions before failing over to the next server
    #[serde(default = "default_retries")]
    pub retries: u8,

    /// Optional server name for logging
    #[serde(default)]
    pub name: Option<String>,
}

fn default_auth_port() -> u16 {
    1812
}

fn default_acct_port() -> u16 {
    1813
}

fn default_timeout() -> u64 {
    3
}

fn default_retries() -> u8 {
    2
}

impl ServerConfig {
    fn resolve(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        if let Ok(ip) = self.address.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        (self.address.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ConfigError::Invalid(format!("Cannot resolve server address: {}", self.address))
            })
    }

    /// Authentication endpoint
    pub fn auth_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.resolve(self.auth_port)
    }

    /// Accounting endpoint
    pub fn acct_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.resolve(self.acct_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Name used in log lines
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::Invalid(
                "Server address cannot be empty".to_string(),
            ));
        }
        if self.secret.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Server {} has empty secret",
                self.address
            )));
        }
        if self.auth_port == 0 || self.acct_port == 0 {
            return Err(ConfigError::Invalid(format!(
                "Server {} has port 0",
                self.address
            )));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid(format!(
                "Server {} has timeout 0",
                self.address
            )));
        }
        Ok(())
    }
}

/// Plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Accept clients without a certificate; their common name becomes "UNDEF"
    #[serde(default)]
    pub client_cert_not_required: bool,

    /// Use the username in place of the certificate common name
    #[serde(default)]
    pub username_as_common_name: bool,

    /// NAS-Identifier sent with every request
    #[serde(default = "default_nas_identifier")]
    pub nas_identifier: String,

    /// NAS-IP-Address sent with every request, if set
    #[serde(default)]
    pub nas_ip_address: Option<Ipv4Addr>,

    /// NAS-Port-Type (default: 5, Virtual)
    #[serde(default = "default_nas_port_type")]
    pub nas_port_type: u32,

    /// Service-Type (default: 2, Framed)
    #[serde(default = "default_service_type")]
    pub service_type: u32,

    /// Framed-Protocol (default: 1, PPP)
    #[serde(default = "default_framed_protocol")]
    pub framed_protocol: u32,

    /// Upstream servers, tried in order
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Highest NAS-Port handle; bounds concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u16,

    /// Seconds to wait for a worker's answer before failing the event
    /// (default: wait indefinitely)
    #[serde(default)]
    pub worker_timeout: Option<u64>,

    /// Log level: "trace", "debug", "info", "warn", "error"
    /// (default: derived from the host's verbosity)
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_nas_identifier() -> String {
    "OpenVpn".to_string()
}

fn default_nas_port_type() -> u32 {
    NasPortType::Virtual.as_u32()
}

fn default_service_type() -> u32 {
    ServiceType::Framed.as_u32()
}

fn default_framed_protocol() -> u32 {
    FramedProtocol::Ppp.as_u32()
}

fn default_max_sessions() -> u16 {
    crate::session::DEFAULT_MAX_SESSIONS
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            client_cert_not_required: false,
            username_as_common_name: false,
            nas_identifier: default_nas_identifier(),
            nas_ip_address: None,
            nas_port_type: default_nas_port_type(),
            service_type: default_service_type(),
            framed_protocol: default_framed_protocol(),
            servers: vec![],
            max_sessions: default_max_sessions(),
            worker_timeout: None,
            log_level: None,
        }
    }
}

impl PluginConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: PluginConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout.map(Duration::from_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one RADIUS server is required".to_string(),
            ));
        }
        for server in &self.servers {
            server.validate()?;
        }

        if self.nas_identifier.is_empty() && self.nas_ip_address.is_none() {
            return Err(ConfigError::Invalid(
                "Either nas_identifier or nas_ip_address must be set".to_string(),
            ));
        }

        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_sessions cannot be 0".to_string(),
            ));
        }

        if self.worker_timeout == Some(0) {
            return Err(ConfigError::Invalid(
                "worker_timeout cannot be 0".to_string(),
            ));
        }

        if let Some(level) = &self.log_level {
            if !matches!(
                level.as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ) {
                return Err(ConfigError::Invalid(format!("Unknown log level: {}", level)));
            }
        }

        Ok(())
    }

    /// Create an example configuration
    pub fn example() -> Self {
        PluginConfig {
            client_cert_not_required: false,
            username_as_common_name: false,
            nas_identifier: "OpenVpn".to_string(),
            nas_ip_address: Some(Ipv4Addr::new(127, 0, 0, 1)),
            servers: vec![
                ServerConfig {
                    address: "192.168.0.153".to_string(),
                    auth_port: 1812,
                    acct_port: 1813,
                    secret: "testpw".to_string(),
                    timeout: 1,
                    retries: 3,
                    name: Some("Primary".to_string()),
                },
                ServerConfig {
                    address: "127.0.0.1".to_string(),
                    auth_port: 1812,
                    acct_port: 1813,
                    secret: "testpw".to_string(),
                    timeout: 1,
                    retries: 3,
                    name: Some("Fallback".to_string()),
                },
            ],
            worker_timeout: Some(30),
            log_level: Some("info".to_string()),
            ..PluginConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_servers() {
        let config = PluginConfig::default();
        assert_eq!(config.max_sessions, 1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_is_valid() {
        let config = PluginConfig::example();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{ "servers": [ { "address": "10.0.0.1", "secret": "s" } ] }"#;
        let config: PluginConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.client_cert_not_required);
        assert_eq!(config.nas_port_type, 5);
        assert_eq!(config.service_type, 2);
        assert_eq!(config.framed_protocol, 1);
        assert_eq!(config.servers[0].auth_port, 1812);
        assert_eq!(config.servers[0].acct_port, 1813);
        assert_eq!(config.servers[0].retries, 2);
        assert_eq!(config.worker_timeout(), None);
    }

    #[test]
    fn test_server_validation() {
        let mut config = PluginConfig::example();
        config.servers[0].secret.clear();
        assert!(config.validate().is_err());

        let mut config = PluginConfig::example();
        config.servers[1].timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_limits() {
        let mut config = PluginConfig::example();
        config.max_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = PluginConfig::example();
        config.worker_timeout = Some(0);
        assert!(config.validate().is_err());

        let mut config = PluginConfig::example();
        config.log_level = Some("loud".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_addresses() {
        let server = &PluginConfig::example().servers[0];
        assert_eq!(server.auth_addr().unwrap().to_string(), "192.168.0.153:1812");
        assert_eq!(server.acct_addr().unwrap().port(), 1813);
        assert_eq!(server.display_name(), "Primary");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radiusplugin.json");

        PluginConfig::example().to_file(&path).unwrap();
        let loaded = PluginConfig::from_file(&path).unwrap();
        assert_eq!(loaded.servers.len(), 2);
        assert_eq!(loaded.nas_ip_address, Some(Ipv4Addr::new(127, 0, 0, 1)));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PluginConfig::from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
