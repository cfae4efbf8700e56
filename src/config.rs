//! Configuration management
//!
//! TOML config loaded from a small list of conventional paths. Every section
//! has serde defaults so a partial file (or none at all) still yields a
//! usable configuration; only the account section has to be filled in before
//! supervision can start.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::models::{Credentials, Isp};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Campus account used for re-login.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccountConfig {
    #[serde(default)]
    pub username: String,

    /// Plaintext password; encoded before it ever goes on the wire.
    #[serde(default)]
    pub password: String,

    /// ISP preset: teacher, chinanet, unicom or cmcc.
    #[serde(default = "default_isp")]
    pub isp: String,
}

impl AccountConfig {
    pub fn credentials(&self) -> Result<Credentials> {
        if self.username.is_empty() || self.password.is_empty() {
            bail!("username and password must be set in the [account] section");
        }
        let isp = Isp::from_name(&self.isp)
            .with_context(|| format!("unknown isp '{}'", self.isp))?;
        Ok(Credentials::new(self.username.clone(), isp, &self.password))
    }
}

/// The two fixed addresses the portal answers on.
#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    #[serde(default = "default_primary_host")]
    pub primary_host: String,

    #[serde(default = "default_secondary_host")]
    pub secondary_host: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            primary_host: default_primary_host(),
            secondary_host: default_secondary_host(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Read timeout in seconds
    #[serde(default = "default_timeout")]
    pub read_timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub connect_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: default_timeout(),
            connect_timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_isp() -> String {
    "chinanet".to_string()
}

fn default_primary_host() -> String {
    "172.18.254.13".to_string()
}

fn default_secondary_host() -> String {
    "172.18.254.14".to_string()
}

fn default_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an explicit path, or probe the conventional
    /// locations, falling back to defaults when nothing is found.
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            return Self::read(&PathBuf::from(path));
        }

        let candidates = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/wifi-keeper/config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/wifi-keeper/config.toml"))
                .unwrap_or_default(),
        ];

        for candidate in &candidates {
            if candidate.exists() {
                return Self::read(candidate);
            }
        }

        Ok(Self::default())
    }

    fn read(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
