//! Layered configuration for the LMS server.
//!
//! Values are resolved in order: built-in defaults, then `lms.toml`, then
//! `LMS_*` environment variables (a `.env` file is loaded first when
//! present), then CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! cors_permissive = false
//!
//! [database]
//! path = ".lms/lms.db"
//!
//! [auth]
//! token_ttl_secs = 7200
//! max_login_attempts = 5
//! lock_time_secs = 600
//!
//! [gamification]
//! lesson_complete_points = 10
//!
//! [log]
//! level = "info"
//! format = "pretty"
//! directory = ""
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "lms.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow any origin. Meant for local development only.
    #[serde(default)]
    pub cors_permissive: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".lms/lms.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// Session lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,
    /// Failed logins before the account is locked.
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: i64,
    /// Lockout duration in seconds.
    #[serde(default = "default_lock_time")]
    pub lock_time_secs: i64,
}

fn default_token_ttl() -> i64 {
    7200
}

fn default_max_login_attempts() -> i64 {
    5
}

fn default_lock_time() -> i64 {
    600
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            max_login_attempts: default_max_login_attempts(),
            lock_time_secs: default_lock_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamificationSection {
    /// Points granted the first time a student completes a lesson.
    #[serde(default = "default_lesson_points")]
    pub lesson_complete_points: i64,
}

fn default_lesson_points() -> i64 {
    10
}

impl Default for GamificationSection {
    fn default() -> Self {
        Self {
            lesson_complete_points: default_lesson_points(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rolling log files. Empty logs to stdout.
    #[serde(default)]
    pub directory: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LmsConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub gamification: GamificationSection,
    #[serde(default)]
    pub log: LogSection,
}

impl LmsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse lms.toml")
    }

    /// Load `path` when it exists, else defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Defaults, file, `.env` and process environment, in that order.
    pub fn resolve(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `LMS_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("LMS_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid LMS_PORT '{}'", port))?;
        }
        if let Some(host) = lookup("LMS_HOST") {
            self.server.host = host;
        }
        if let Some(path) = lookup("LMS_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("LMS_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(format) = lookup("LMS_LOG_FORMAT") {
            self.log.format = format.parse()?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize lms.toml")?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.auth.token_ttl_secs <= 0 {
            warnings.push("auth.token_ttl_secs should be positive".to_string());
        }
        if self.auth.max_login_attempts <= 0 {
            warnings.push("auth.max_login_attempts should be positive; lockout is disabled".to_string());
        }
        if self.gamification.lesson_complete_points < 0 {
            warnings.push("gamification.lesson_complete_points cannot be negative".to_string());
        }
        warnings
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
