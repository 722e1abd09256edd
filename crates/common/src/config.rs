//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// General application configuration.
    pub app: AppConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Mail delivery configuration.
    pub mail: MailConfig,
}

/// General application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Name of this installation, used in notification subjects.
    pub instance_name: String,
    /// Public base URL, used for links in notifications.
    pub base_url: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Mail delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// Whether outgoing mail is enabled. When disabled, notices are
    /// logged and dropped.
    #[serde(default)]
    pub enabled: bool,
    /// SMTP server hostname.
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// SMTP username.
    #[serde(default)]
    pub username: Option<String>,
    /// SMTP password.
    #[serde(default)]
    pub password: Option<String>,
    /// Sender address for outgoing notices.
    pub from_address: String,
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

const fn default_smtp_port() -> u16 {
    587
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` file (via dotenvy)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `SCOUTREG_ENV`)
    /// 4. Environment variables with `SCOUTREG_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("SCOUTREG_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("SCOUTREG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("SCOUTREG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
