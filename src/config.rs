//! Configuration for the synchronization layer.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub signals: SignalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the CRM REST API, e.g. "https://crm.example.com"
  pub base_url: String,
}

/// Refresh cadence and burst damping.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Periodic refresh interval for the client collection
  #[serde(default = "default_client_interval_secs")]
  pub client_interval_secs: u64,
  /// Periodic refresh interval for the SIM card collection
  #[serde(default = "default_sim_card_interval_secs")]
  pub sim_card_interval_secs: u64,
  /// Minimum delay after a refresh completes before another may start
  #[serde(default = "default_cooldown_ms")]
  pub cooldown_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
  /// Polling fallback interval for invalidation markers
  #[serde(default = "default_poll_ms")]
  pub poll_ms: u64,
  /// Where invalidation markers live.
  #[serde(default, with = "serde_yaml::with::singleton_map")]
  pub store: SignalStoreConfig,
}

/// Signal marker storage backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStoreConfig {
  /// In-process store with an event feed. Single-process deployments and
  /// headless test environments.
  #[default]
  Memory,
  /// SQLite file shared between processes of the same profile. Polling-only
  /// delivery.
  Sqlite {
    /// Explicit database path; defaults to the per-user data directory.
    path: Option<PathBuf>,
  },
}

fn default_client_interval_secs() -> u64 {
  30
}

fn default_sim_card_interval_secs() -> u64 {
  300
}

fn default_cooldown_ms() -> u64 {
  500
}

fn default_poll_ms() -> u64 {
  1000
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      client_interval_secs: default_client_interval_secs(),
      sim_card_interval_secs: default_sim_card_interval_secs(),
      cooldown_ms: default_cooldown_ms(),
    }
  }
}

impl Default for SignalConfig {
  fn default() -> Self {
    Self {
      poll_ms: default_poll_ms(),
      store: SignalStoreConfig::default(),
    }
  }
}

impl SyncConfig {
  pub fn cooldown(&self) -> Duration {
    Duration::from_millis(self.cooldown_ms)
  }

  pub fn client_interval(&self) -> Duration {
    Duration::from_secs(self.client_interval_secs)
  }

  pub fn sim_card_interval(&self) -> Duration {
    Duration::from_secs(self.sim_card_interval_secs)
  }
}

impl SignalConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./crmsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/crmsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(SyncError::Config(format!(
          "config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(SyncError::Config(
        "no configuration file found; create one at ~/.config/crmsync/config.yaml\n\
         See config.example.yaml for the format."
          .to_string(),
      )),
    }
  }

  /// Build a config programmatically with all defaults except the API base.
  pub fn with_base_url(base_url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig {
        base_url: base_url.into(),
      },
      sync: SyncConfig::default(),
      signals: SignalConfig::default(),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("crmsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("crmsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      SyncError::Config(format!(
        "failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
      SyncError::Config(format!(
        "failed to parse config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Ok(config)
  }
}
