//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub polling: PollingConfig,
    pub pagination: PaginationConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// REST backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Backend base URL (e.g., "https://api.pixora.example")
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Session/identity cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// How long a verified identity is trusted without re-verifying (default: 300)
    pub identity_ttl_seconds: u64,
    /// Minimum spacing between two verification requests (default: 30)
    pub verify_min_interval_seconds: u64,
    /// Directory for persisted client state; in-memory only when unset
    pub storage_dir: Option<PathBuf>,
    /// Wipe every stored key on logout, not only auth keys
    #[serde(default = "default_true")]
    pub clear_all_on_logout: bool,
}

impl SessionConfig {
    pub fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_ttl_seconds)
    }

    pub fn verify_min_interval(&self) -> Duration {
        Duration::from_secs(self.verify_min_interval_seconds)
    }
}

/// Background refresh configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// User directory refresh interval (default: 300)
    pub directory_refresh_seconds: u64,
    /// Conversation poll interval (default: 60)
    pub messages_seconds: u64,
    /// Reel feed poll interval (default: 60)
    pub reels_seconds: u64,
    /// Prefer the server-sent event stream over polling
    #[serde(default = "default_true")]
    pub push_enabled: bool,
}

impl PollingConfig {
    pub fn directory_refresh(&self) -> Duration {
        Duration::from_secs(self.directory_refresh_seconds.max(1))
    }

    pub fn messages(&self) -> Duration {
        Duration::from_secs(self.messages_seconds.max(1))
    }

    pub fn reels(&self) -> Duration {
        Duration::from_secs(self.reels_seconds.max(1))
    }
}

/// Pagination defaults
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    /// Items requested per page (default: 20)
    pub default_limit: u32,
}

/// Upload workflow limits
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum files per upload session (default: 10)
    pub max_files: usize,
    /// Maximum size of a single file in bytes (default: 20 MiB)
    pub max_file_bytes: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:5000".to_string(),
                timeout_seconds: 30,
                user_agent: format!("Pixora/{}", env!("CARGO_PKG_VERSION")),
            },
            session: SessionConfig {
                identity_ttl_seconds: 300,
                verify_min_interval_seconds: 30,
                storage_dir: None,
                clear_all_on_logout: true,
            },
            polling: PollingConfig {
                directory_refresh_seconds: 300,
                messages_seconds: 60,
                reels_seconds: 60,
                push_enabled: true,
            },
            pagination: PaginationConfig { default_limit: 20 },
            upload: UploadConfig {
                max_files: 10,
                max_file_bytes: 20 * 1024 * 1024,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at a specific backend, defaults elsewhere
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.api.base_url = base_url.into();
        config
    }

    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (PIXORA__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::ClientError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("api.base_url", "http://localhost:5000")?
            .set_default("api.timeout_seconds", 30)?
            .set_default(
                "api.user_agent",
                format!("Pixora/{}", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("session.identity_ttl_seconds", 300)?
            .set_default("session.verify_min_interval_seconds", 30)?
            .set_default("session.clear_all_on_logout", true)?
            .set_default("polling.directory_refresh_seconds", 300)?
            .set_default("polling.messages_seconds", 60)?
            .set_default("polling.reels_seconds", 60)?
            .set_default("polling.push_enabled", true)?
            .set_default("pagination.default_limit", 20)?
            .set_default("upload.max_files", 10)?
            .set_default("upload.max_file_bytes", 20 * 1024 * 1024)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("PIXORA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::ClientError::Config(e.to_string()))?;

        let client_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::ClientError::Config(e.to_string()))?;
        client_config.validate()?;
        Ok(client_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::ClientError> {
        use crate::error::ClientError;

        let parsed = url::Url::parse(&self.api.base_url)
            .map_err(|e| ClientError::Config(format!("api.base_url is not a valid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::Config(
                "api.base_url must use http or https".to_string(),
            ));
        }

        if self.api.timeout_seconds == 0 {
            return Err(ClientError::Config(
                "api.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.pagination.default_limit == 0 {
            return Err(ClientError::Config(
                "pagination.default_limit must be greater than 0".to_string(),
            ));
        }

        if self.upload.max_files == 0 {
            return Err(ClientError::Config(
                "upload.max_files must be greater than 0".to_string(),
            ));
        }

        if self.session.verify_min_interval_seconds > self.session.identity_ttl_seconds {
            tracing::warn!(
                ttl = self.session.identity_ttl_seconds,
                min_interval = self.session.verify_min_interval_seconds,
                "Verification interval exceeds identity TTL; forced verifications may be skipped"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.identity_ttl(), Duration::from_secs(300));
        assert_eq!(config.session.verify_min_interval(), Duration::from_secs(30));
        assert_eq!(config.polling.messages(), Duration::from_secs(60));
    }

    #[test]
    fn validate_rejects_non_http_base_url() {
        let config = ClientConfig::for_base_url("ftp://example.com");
        let error = config.validate().expect_err("ftp must be rejected");
        assert!(matches!(
            error,
            crate::error::ClientError::Config(message) if message.contains("http or https")
        ));
    }

    #[test]
    fn validate_rejects_zero_page_limit() {
        let mut config = ClientConfig::default();
        config.pagination.default_limit = 0;
        let error = config.validate().expect_err("zero limit must fail");
        assert!(matches!(
            error,
            crate::error::ClientError::Config(message) if message.contains("default_limit")
        ));
    }

    #[test]
    fn polling_intervals_are_clamped() {
        let mut config = ClientConfig::default();
        config.polling.reels_seconds = 0;
        assert_eq!(config.polling.reels(), Duration::from_secs(1));
    }
}
