// Configuration File Support
//
// TOML configuration with environment variable overrides.
// The default location is the XDG config directory: ~/.config/jobgate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub quota: QuotaConfig,
    pub concurrency: ConcurrencyConfig,
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub delivery: DeliveryConfig,
    pub server: ServerConfig,
}

/// Daily allowance and premium plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotaConfig {
    /// Jobs per UTC day for non-privileged entities
    pub daily_free_limit: u32,

    /// Length of a purchased subscription
    pub premium_duration_days: u32,

    /// Price of a subscription, in the payment currency's smallest unit
    pub premium_price: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_free_limit: 3,
            premium_duration_days: 30,
            premium_price: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Jobs allowed in the running state at once, across all entities
    pub max_global_concurrent_jobs: usize,

    /// Soft cap on entity locks kept in memory
    pub max_tracked_entities: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_global_concurrent_jobs: 5,
            max_tracked_entities: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite connection URL
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/jobgate.db".to_string(),
        }
    }
}

/// External downloader invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Program to execute
    pub program: String,

    /// Arguments; `{url}` and `{output}` are substituted per job
    pub args: Vec<String>,

    /// Largest deliverable result
    pub max_result_bytes: u64,

    /// Directory for job artifacts (system temp dir if unset)
    pub work_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            args: [
                "-f",
                "best[ext=mp4]/best",
                "--merge-output-format",
                "mp4",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "-o",
                "{output}",
                "{url}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_result_bytes: 50 * 1024 * 1024,
            work_dir: None,
        }
    }
}

impl FetchConfig {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub outbox_dir: PathBuf,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            outbox_dir: PathBuf::from("data/outbox"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// A missing file yields the default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/jobgate/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "jobgate", "Jobgate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("jobgate").join("config.toml")
        }
    }

    /// Apply environment variable overrides
    ///
    /// Unparsable or out-of-range numeric values are ignored.
    fn apply_env_overrides(mut self) -> Self {
        self.logging = self.logging.apply_env_overrides();

        if let Ok(url) = std::env::var("JOBGATE_DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Some(limit) = env_positive::<u32>("JOBGATE_DAILY_FREE_LIMIT") {
            self.quota.daily_free_limit = limit;
        }
        if let Some(jobs) = env_positive::<usize>("JOBGATE_MAX_CONCURRENT_JOBS") {
            self.concurrency.max_global_concurrent_jobs = jobs;
        }
        if let Some(entities) = env_positive::<usize>("JOBGATE_MAX_TRACKED_ENTITIES") {
            self.concurrency.max_tracked_entities = entities;
        }
        if let Ok(program) = std::env::var("JOBGATE_FETCH_PROGRAM") {
            self.fetch.program = program;
        }
        if let Ok(dir) = std::env::var("JOBGATE_OUTBOX_DIR") {
            self.delivery.outbox_dir = PathBuf::from(dir);
        }
        if let Ok(bind) = std::env::var("JOBGATE_BIND") {
            self.server.bind = bind;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.quota.daily_free_limit == 0 {
            anyhow::bail!("Daily free limit must be > 0");
        }
        if self.quota.premium_duration_days == 0 {
            anyhow::bail!("Premium duration must be > 0 days");
        }
        if self.quota.premium_price <= 0 {
            anyhow::bail!("Premium price must be > 0");
        }
        if self.concurrency.max_global_concurrent_jobs == 0 {
            anyhow::bail!("Max global concurrent jobs must be > 0");
        }
        if self.concurrency.max_tracked_entities == 0 {
            anyhow::bail!("Max tracked entities must be > 0");
        }
        if self.storage.database_url.is_empty() {
            anyhow::bail!("Database URL must not be empty");
        }
        if self.fetch.program.is_empty() {
            anyhow::bail!("Fetch program must not be empty");
        }
        if self.fetch.max_result_bytes == 0 {
            anyhow::bail!("Max result size must be > 0 bytes");
        }
        for placeholder in ["{url}", "{output}"] {
            if !self.fetch.args.iter().any(|arg| arg.contains(placeholder)) {
                anyhow::bail!("Fetch args must contain the {} placeholder", placeholder);
            }
        }

        Ok(())
    }
}

fn env_positive<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| *value > T::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Tests touching process env must not interleave
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "JOBGATE_LOG_LEVEL",
        "JOBGATE_LOG_FORMAT",
        "JOBGATE_DATABASE_URL",
        "JOBGATE_DAILY_FREE_LIMIT",
        "JOBGATE_MAX_CONCURRENT_JOBS",
        "JOBGATE_MAX_TRACKED_ENTITIES",
        "JOBGATE_FETCH_PROGRAM",
        "JOBGATE_OUTBOX_DIR",
        "JOBGATE_BIND",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.quota.daily_free_limit, 3);
        assert_eq!(config.quota.premium_duration_days, 30);
        assert_eq!(config.concurrency.max_global_concurrent_jobs, 5);
        assert_eq!(config.concurrency.max_tracked_entities, 1000);
        assert_eq!(config.fetch.max_result_bytes, 50 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_limits() {
        let mut config = Config::default();
        config.quota.daily_free_limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.concurrency.max_global_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.concurrency.max_tracked_entities = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetch.max_result_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_missing_placeholder() {
        let mut config = Config::default();
        config.fetch.args = vec!["{url}".to_string()];
        assert!(config.validate().is_err());

        config.fetch.args = vec!["-o".to_string(), "{output}".to_string(), "{url}".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[quota]
daily_free_limit = 5

[concurrency]
max_global_concurrent_jobs = 2

[storage]
database_url = "sqlite::memory:"

[fetch]
program = "gallery-dl"
args = ["--dest", "{output}", "{url}"]
work_dir = "/var/tmp/jobgate"
"#;
        fs::write(temp_file.path(), toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.quota.daily_free_limit, 5);
        assert_eq!(config.quota.premium_price, 250);
        assert_eq!(config.concurrency.max_global_concurrent_jobs, 2);
        assert_eq!(config.concurrency.max_tracked_entities, 1000);
        assert_eq!(config.fetch.program, "gallery-dl");
        assert_eq!(config.fetch.work_dir(), PathBuf::from("/var/tmp/jobgate"));
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[quota\ndaily_free_limit = 1\n").unwrap();

        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[quota]\ndaily_free_limit = 0\n").unwrap();

        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        std::env::set_var("JOBGATE_LOG_FORMAT", "json");
        std::env::set_var("JOBGATE_DATABASE_URL", "sqlite::memory:");
        std::env::set_var("JOBGATE_DAILY_FREE_LIMIT", "7");
        std::env::set_var("JOBGATE_MAX_CONCURRENT_JOBS", "9");
        std::env::set_var("JOBGATE_BIND", "0.0.0.0:9000");

        let config = Config::default().apply_env_overrides();
        clear_env();

        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.storage.database_url, "sqlite::memory:");
        assert_eq!(config.quota.daily_free_limit, 7);
        assert_eq!(config.concurrency.max_global_concurrent_jobs, 9);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn test_env_overrides_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        std::env::set_var("JOBGATE_DAILY_FREE_LIMIT", "0");
        std::env::set_var("JOBGATE_MAX_CONCURRENT_JOBS", "many");
        std::env::set_var("JOBGATE_LOG_LEVEL", "loud");

        let config = Config::default().apply_env_overrides();
        clear_env();

        assert_eq!(config.quota.daily_free_limit, 3);
        assert_eq!(config.concurrency.max_global_concurrent_jobs, 5);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with("config.toml"));
    }
}
