use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Largest UDP payload that fits an IPv4 datagram
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Server configuration
///
/// NIST 800-53 Controls:
/// - AC-10: Concurrent Session Control (max_connections)
/// - AC-12: Session Termination (idle_timeout_secs)
/// - SC-5: Denial of Service Protection (size limits, handler limit)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Sandbox root; every file operation is confined to this directory
    pub root_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// Maximum number of live sessions; new peers are refused beyond this
    pub max_connections: usize,
    /// Sessions idle longer than this are evicted by the reaper
    pub idle_timeout_secs: u64,
    /// How often the reaper scans the session table
    pub reap_interval_secs: u64,
    /// Shared secret for `LOGIN_ADMIN`
    pub admin_secret: String,
    /// Largest file that can be read, downloaded or uploaded
    pub max_file_size_bytes: u64,
    /// Requested kernel receive buffer (SO_RCVBUF)
    pub recv_buffer_size: usize,
    /// Largest datagram accepted or produced
    pub max_datagram_size: usize,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/var/lib/snow-owl/udpfs"),
            bind_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 5678),
            max_connections: 5,
            idle_timeout_secs: 30,
            reap_interval_secs: 5,
            admin_secret: "admin".to_string(),
            max_file_size_bytes: 60_000,
            recv_buffer_size: 65_536,
            max_datagram_size: MAX_UDP_PAYLOAD,
            logging: LoggingConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    /// Emit structured audit events for security-relevant actions
    pub audit_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            audit_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for SIEM integration
    Json,
}

/// Handler concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Upper bound on in-flight request handlers (0 = unbounded)
    ///
    /// The session limit only gates new peers. This bounds the work that
    /// existing peers can have in flight at once.
    pub max_concurrent_handlers: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: num_cpus::get() * 64,
        }
    }
}

pub fn load_config(path: &std::path::Path) -> Result<ServerConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))?;
    Ok(config)
}

pub fn write_config(path: &std::path::Path, config: &ServerConfig) -> Result<()> {
    let contents = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Validate server configuration for security and correctness
///
/// NIST 800-53 Controls:
/// - CM-6: Configuration Settings (validate all configuration parameters)
/// - AC-3: Access Enforcement (validate sandbox directory)
/// - SC-5: Denial of Service Protection (validate resource limits)
pub fn validate_config(config: &ServerConfig, validate_bind: bool) -> Result<()> {
    if !config.root_dir.is_absolute() {
        return Err(Error::Config("root_dir must be an absolute path".to_string()));
    }

    match std::fs::metadata(&config.root_dir) {
        Ok(meta) => {
            if !meta.is_dir() {
                return Err(Error::Config("root_dir must be a directory".to_string()));
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::Config(
                "root_dir does not exist; create it or adjust config".to_string(),
            ));
        }
        Err(e) => return Err(Error::Io(e)),
    }

    if let Err(e) = std::fs::read_dir(&config.root_dir) {
        return Err(Error::Config(format!("root_dir is not readable: {}", e)));
    }

    if config.bind_addr.port() == 0 {
        return Err(Error::Config("bind_addr port must be non-zero".to_string()));
    }

    if validate_bind && let Err(e) = std::net::UdpSocket::bind(config.bind_addr) {
        return Err(Error::Config(format!("bind_addr is not available: {}", e)));
    }

    if config.max_connections == 0 {
        return Err(Error::Config("max_connections must be at least 1".to_string()));
    }

    if config.idle_timeout_secs == 0 || config.reap_interval_secs == 0 {
        return Err(Error::Config(
            "idle_timeout_secs and reap_interval_secs must be non-zero".to_string(),
        ));
    }

    if config.admin_secret.trim().is_empty() {
        return Err(Error::Config("admin_secret must not be empty".to_string()));
    }

    if config.max_datagram_size == 0 || config.max_datagram_size > MAX_UDP_PAYLOAD {
        return Err(Error::Config(format!(
            "max_datagram_size must be in range 1-{}",
            MAX_UDP_PAYLOAD
        )));
    }

    // Leave room for the `DOWNLOAD:<name>:` frame around the largest file
    if config.max_file_size_bytes >= config.max_datagram_size as u64 {
        return Err(Error::Config(
            "max_file_size_bytes must be smaller than max_datagram_size".to_string(),
        ));
    }

    if let Some(ref log_file) = config.logging.file {
        let parent = log_file.parent().ok_or_else(|| {
            Error::Config("logging.file must include a parent directory".to_string())
        })?;
        match std::fs::metadata(parent) {
            Ok(meta) => {
                if !meta.is_dir() {
                    return Err(Error::Config(
                        "logging.file parent must be a directory".to_string(),
                    ));
                }
            }
            Err(e) => return Err(Error::Config(format!("logging.file parent error: {}", e))),
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::io::Result<PathBuf> {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "snow_owl_udpfs_test_{}_{}",
            name,
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    #[test]
    fn parses_minimal_toml() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root_dir = temp_dir("parse")?;
        let toml = format!(
            r#"
root_dir = "{}"
bind_addr = "127.0.0.1:5678"
max_connections = 2

[logging]
format = "json"
"#,
            root_dir.display()
        );
        let config: ServerConfig = toml::from_str(&toml)?;
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.idle_timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Json);
        validate_config(&config, false)?;
        Ok(())
    }

    #[test]
    fn round_trips_through_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = temp_dir("write")?;
        let path = dir.join("udpfs.toml");
        let mut config = ServerConfig::default();
        config.root_dir = dir.clone();
        config.admin_secret = "s3cret".to_string();
        write_config(&path, &config)?;

        let loaded = load_config(&path)?;
        assert_eq!(loaded.root_dir, dir);
        assert_eq!(loaded.admin_secret, "s3cret");
        Ok(())
    }

    #[test]
    fn rejects_non_absolute_root_dir() {
        let config = ServerConfig {
            root_dir: PathBuf::from("relative/path"),
            ..Default::default()
        };
        let err = validate_config(&config, false).unwrap_err();
        assert!(format!("{err}").contains("root_dir must be an absolute path"));
    }

    #[test]
    fn rejects_missing_root_dir() {
        let config = ServerConfig {
            root_dir: PathBuf::from("/nonexistent/snow-owl-udpfs"),
            ..Default::default()
        };
        let err = validate_config(&config, false).unwrap_err();
        assert!(format!("{err}").contains("root_dir does not exist"));
    }

    #[test]
    fn rejects_zero_bind_port() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut config = ServerConfig::default();
        config.root_dir = temp_dir("bind")?;
        config.bind_addr = "127.0.0.1:0".parse()?;
        let err = validate_config(&config, false).unwrap_err();
        assert!(format!("{err}").contains("bind_addr port must be non-zero"));
        Ok(())
    }

    #[test]
    fn rejects_empty_admin_secret() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut config = ServerConfig::default();
        config.root_dir = temp_dir("secret")?;
        config.admin_secret = "  ".to_string();
        let err = validate_config(&config, false).unwrap_err();
        assert!(format!("{err}").contains("admin_secret"));
        Ok(())
    }

    #[test]
    fn rejects_file_limit_exceeding_datagram() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let mut config = ServerConfig::default();
        config.root_dir = temp_dir("limits")?;
        config.max_file_size_bytes = 70_000;
        let err = validate_config(&config, false).unwrap_err();
        assert!(format!("{err}").contains("max_file_size_bytes"));
        Ok(())
    }

    #[test]
    fn rejects_bind_addr_when_in_use() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0")?;
        let port = socket.local_addr()?.port();

        let mut config = ServerConfig::default();
        config.root_dir = temp_dir("bind-in-use")?;
        config.bind_addr = format!("127.0.0.1:{port}").parse()?;
        let err = validate_config(&config, true).unwrap_err();
        assert!(format!("{err}").contains("bind_addr is not available"));
        Ok(())
    }
}
