use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ClientError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Operation endpoint, e.g. `http://localhost:9925`
  pub url: String,
  pub username: String,
  /// Falls back to the OPCLIENT_PASSWORD environment variable when omitted
  #[serde(default)]
  pub password: String,
  /// Default logical schema for calls that don't name one
  #[serde(default = "default_schema")]
  pub schema: String,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  /// Fan-out width for batch and parallel execution
  #[serde(default = "default_pool_size")]
  pub pool_size: usize,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default = "default_cache_ttl_ms")]
  pub ttl_ms: u64,
  #[serde(default = "default_cache_max_size")]
  pub max_size: usize,
  /// How often expired entries are swept in the background
  #[serde(default = "default_sweep_interval_ms")]
  pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      ttl_ms: default_cache_ttl_ms(),
      max_size: default_cache_max_size(),
      sweep_interval_ms: default_sweep_interval_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
  #[serde(default = "default_true")]
  pub keep_alive: bool,
  /// Idle sockets kept per host; defaults to the pool size
  pub max_idle_sockets: Option<usize>,
}

impl Default for ConnectionConfig {
  fn default() -> Self {
    Self {
      keep_alive: true,
      max_idle_sockets: None,
    }
  }
}

fn default_schema() -> String {
  "dev".to_string()
}

fn default_timeout_ms() -> u64 {
  30_000
}

fn default_max_retries() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  1_000
}

fn default_pool_size() -> usize {
  10
}

fn default_cache_ttl_ms() -> u64 {
  5_000
}

fn default_cache_max_size() -> usize {
  1_000
}

fn default_sweep_interval_ms() -> u64 {
  60_000
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Build a configuration with every optional field at its default.
  pub fn new(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      username: username.into(),
      password: password.into(),
      schema: default_schema(),
      timeout_ms: default_timeout_ms(),
      max_retries: default_max_retries(),
      retry_delay_ms: default_retry_delay_ms(),
      pool_size: default_pool_size(),
      cache: CacheConfig::default(),
      connection: ConnectionConfig::default(),
    }
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  pub fn cache_ttl(&self) -> Duration {
    Duration::from_millis(self.cache.ttl_ms)
  }

  pub fn max_idle_sockets(&self) -> usize {
    self.connection.max_idle_sockets.unwrap_or(self.pool_size)
  }

  /// Check the fields the client cannot work without.
  pub fn validate(&self) -> std::result::Result<(), ClientError> {
    url::Url::parse(&self.url)
      .map_err(|e| ClientError::Config(format!("invalid url '{}': {}", self.url, e)))?;
    if self.username.is_empty() {
      return Err(ClientError::Config("username is required".to_string()));
    }
    if self.pool_size == 0 {
      return Err(ClientError::Config("pool_size must be at least 1".to_string()));
    }
    Ok(())
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./opclient.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/opclient/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/opclient/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("opclient.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("opclient").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let mut config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    if config.password.is_empty() {
      config.password = Self::get_password()?;
    }

    config.validate()?;
    Ok(config)
  }

  pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the password from the OPCLIENT_PASSWORD environment variable.
  pub fn get_password() -> Result<String> {
    std::env::var("OPCLIENT_PASSWORD").map_err(|_| {
      eyre!("Password not found. Set it in the config file or the OPCLIENT_PASSWORD environment variable.")
    })
  }
}
