use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::client::S30ClientBuilder;
use crate::endpoints::CloudEndpoints;
use crate::logger::MessageLogMode;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Lan,
    Cloud,
}

/// File-based client configuration.
///
/// ```toml
/// [connection]
/// mode = "lan"
/// ip = "192.168.1.50"
///
/// [polling]
/// long_poll_timeout_secs = 15
///
/// [logging]
/// message_log = "lennox.ndjson"
/// message_log_mode = "diffed"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub mode: ConnectionMode,
    /// Controller address for LAN mode, optionally with a port.
    pub ip: Option<String>,
    /// `https` for real controllers, `http` for simulators.
    pub protocol: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub app_id: Option<String>,
    /// Path to the certificate blob posted to the cloud authenticate step.
    pub certificate_file: Option<PathBuf>,
    /// Send every cloud route to this host instead of production.
    pub cloud_base_url: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Lan,
            ip: None,
            protocol: "https".to_string(),
            email: None,
            password: None,
            app_id: None,
            certificate_file: None,
            cloud_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub long_poll_timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout_secs: 15,
            retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub message_log: Option<PathBuf>,
    pub message_log_mode: MessageLogMode,
    pub diag_level: Option<u8>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            message_log: None,
            message_log_mode: MessageLogMode::Full,
            diag_level: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
    }

    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).map_err(|e| Error::Config(e.to_string()))
    }
}

impl S30ClientBuilder {
    /// Start a builder from file configuration. Callbacks still have to be
    /// attached by the caller.
    pub fn from_config(config: &Config) -> Result<Self> {
        let conn = &config.connection;
        let mut builder = match conn.mode {
            ConnectionMode::Lan => {
                let ip = conn
                    .ip
                    .as_deref()
                    .ok_or_else(|| Error::Config("connection.ip is required in lan mode".into()))?;
                S30ClientBuilder::new(ip).protocol(&conn.protocol)
            }
            ConnectionMode::Cloud => {
                let (Some(email), Some(password)) = (&conn.email, &conn.password) else {
                    return Err(Error::Config(
                        "connection.email and connection.password are required in cloud mode".into(),
                    ));
                };
                let mut builder = S30ClientBuilder::cloud(email, password);
                if let Some(ref base) = conn.cloud_base_url {
                    builder = builder.cloud_endpoints(CloudEndpoints::single_host(base));
                }
                if let Some(ref path) = conn.certificate_file {
                    builder = builder.certificate(std::fs::read_to_string(path)?.trim());
                }
                builder
            }
        };

        if let Some(ref app_id) = conn.app_id {
            builder = builder.app_id(app_id);
        }

        let polling = &config.polling;
        builder = builder
            .long_poll_timeout(Duration::from_secs(polling.long_poll_timeout_secs))
            .retries(polling.retries)
            .retry_delay(Duration::from_millis(polling.retry_delay_ms));

        let logging = &config.logging;
        if let Some(ref path) = logging.message_log {
            builder = builder.message_log(logging.message_log_mode, path);
        }
        if let Some(level) = logging.diag_level {
            builder = builder.diag_level(level);
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_document() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.connection.mode, ConnectionMode::Lan);
        assert_eq!(config.connection.protocol, "https");
        assert_eq!(config.polling.retries, 3);
        assert_eq!(config.logging.message_log_mode, MessageLogMode::Full);
    }

    #[test]
    fn parses_cloud_section() {
        let config = Config::from_toml_str(
            r#"
            [connection]
            mode = "cloud"
            email = "me@example.com"
            password = "hunter2"
            cloud_base_url = "http://127.0.0.1:9000"

            [logging]
            message_log_mode = "diffed"
            diag_level = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.mode, ConnectionMode::Cloud);
        assert_eq!(config.logging.message_log_mode, MessageLogMode::Diffed);
        assert_eq!(config.logging.diag_level, Some(2));
        assert!(S30ClientBuilder::from_config(&config).is_ok());
    }

    #[test]
    fn lan_without_ip_is_rejected() {
        let config = Config::from_toml_str("[connection]\nmode = \"lan\"\n").unwrap();
        let err = S30ClientBuilder::from_config(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reads_file_and_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.txt");
        std::fs::write(&cert, "CERT-BLOB\n").unwrap();
        let path = dir.path().join("lennox.toml");
        std::fs::write(
            &path,
            format!(
                "[connection]\nmode = \"cloud\"\nemail = \"a@b.c\"\npassword = \"x\"\ncertificate_file = {:?}\n",
                cert.display().to_string()
            ),
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.connection.certificate_file.as_deref(), Some(cert.as_path()));
        assert!(S30ClientBuilder::from_config(&config).is_ok());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::load("/nonexistent/lennox.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = Config::from_toml_str("[connection\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
