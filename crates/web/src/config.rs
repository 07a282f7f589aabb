//! Server configuration.
//!
//! [`ServerConfig`] is consumed once at startup. It can be built in code with struct
//! update syntax or loaded from a TOML document; missing keys fall back to the defaults.
//!
//! ```
//! use ember_web::ServerConfig;
//!
//! let config = ServerConfig::from_toml_str(r#"
//!     port = 9090
//!     session_cookie_name = "sid"
//!     default_rate_limit = 30
//!
//!     [[rate_limits]]
//!     endpoint = "/login"
//!     limit = 5
//! "#).unwrap();
//!
//! assert_eq!(config.port, 9090);
//! assert_eq!(config.rate_limits[0].limit, 5);
//! assert!(config.enable_session);
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// A per-endpoint rate limit override, in requests per window.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    pub endpoint: String,
    pub limit: u32,
}

impl RateLimitRule {
    pub fn new(endpoint: impl Into<String>, limit: u32) -> Self {
        Self { endpoint: endpoint.into(), limit }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_session: bool,
    /// where the file session backend keeps its records
    pub session_directory: PathBuf,
    pub session_cookie_name: String,
    /// cookies deleted together with the session cookie when the session is invalid
    pub associated_session_cookies: Vec<String>,
    /// maximum request body size in bytes
    pub max_request_size: u64,
    pub rate_limits: Vec<RateLimitRule>,
    /// requests per minute for endpoints without an override
    pub default_rate_limit: u32,
    pub blacklisted_ips: Vec<String>,
    pub whitelisted_ips: Vec<String>,
    /// resolve the client address from the first `X-Forwarded-For` entry
    pub trust_x_forwarded_for: bool,
    /// mark minted session cookies `Secure`
    pub session_is_secure: bool,
    /// how often stale rate limit entries are evicted, in seconds
    pub rate_limit_sweep_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_session: true,
            session_directory: PathBuf::from("./sessions"),
            session_cookie_name: "session_id".to_string(),
            associated_session_cookies: Vec::new(),
            max_request_size: 1024 * 1024 * 1024,
            rate_limits: Vec::new(),
            default_rate_limit: 100,
            blacklisted_ips: Vec::new(),
            whitelisted_ips: vec!["127.0.0.1".to_string()],
            trust_x_forwarded_for: false,
            session_is_secure: false,
            rate_limit_sweep_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    /// The address the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
