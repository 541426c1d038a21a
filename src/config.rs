use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the worker fronts, e.g. "https://app.example.com".
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Path prefix routed to the API policy.
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  #[serde(default)]
  pub shell: ShellConfig,
  #[serde(default)]
  pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Version token suffixed onto store names. Bumping it on deploy is the
  /// cache-invalidation mechanism; old generations are swept on activate.
  pub version: String,
  /// Override for the cache database path.
  pub db_path: Option<PathBuf>,
  /// Entry cap for the static store.
  pub static_max_entries: u64,
  /// Entry cap for the api store.
  pub api_max_entries: u64,
  /// Bounded network timeout before falling back to cache.
  pub network_timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "v1".to_string(),
      db_path: None,
      static_max_entries: 256,
      api_max_entries: 512,
      network_timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  /// Assets fetched and cached verbatim at install time. Any failure here
  /// fails installation.
  pub manifest: Vec<String>,
  /// The shell document served for failed navigations.
  pub document: String,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      manifest: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/logo192.png".to_string(),
      ],
      document: "/index.html".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Override for the queue database path.
  pub db_path: Option<PathBuf>,
  /// Replay attempts before an entry is abandoned.
  pub max_attempts: u32,
  /// Drain lease TTL; an expired lease can be stolen.
  pub lease_ttl_secs: i64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      db_path: None,
      max_attempts: 10,
      lease_ttl_secs: 120,
    }
  }
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offramp.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offramp/config.yaml
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
        "No configuration file found. Create one at ~/.config/offramp/config.yaml\n\
                 with at least an `origin:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offramp.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offramp").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
