use chrono::{Duration, FixedOffset, Local, Offset};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub display: DisplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Project URL of the hosted store, e.g. https://xyz.supabase.co
  pub url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false, nothing is persisted locally and every read goes remote
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Maximum age of a snapshot before a read refetches
  #[serde(default = "default_freshness_minutes")]
  pub freshness_minutes: i64,
  /// Explicit cache database path (defaults to one file per store origin)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      freshness_minutes: default_freshness_minutes(),
      path: None,
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_freshness_minutes() -> i64 {
  60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplayConfig {
  /// Offset used for calendar-day boundaries (defaults to the local offset)
  pub utc_offset_minutes: Option<i32>,
}

impl RemoteConfig {
  /// Origin of the store; the cache is scoped to it.
  pub fn origin(&self) -> Result<Url> {
    let trimmed = self.url.trim();
    if trimmed.is_empty() {
      return Err(eyre!("remote.url is empty in the configuration file"));
    }
    let url =
      Url::parse(trimmed).map_err(|e| eyre!("remote.url '{}' is not a valid URL: {}", trimmed, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("remote.url must use http or https, got '{}'", url.scheme()));
    }
    Ok(url)
  }

  /// Base URL of the REST endpoint, always ending with a slash.
  pub fn rest_base(&self) -> Result<Url> {
    let origin = self.origin()?;
    let base = format!("{}/rest/v1/", origin.as_str().trim_end_matches('/'));
    Url::parse(&base).map_err(|e| eyre!("Failed to build REST endpoint from '{}': {}", base, e))
  }
}

impl CacheConfig {
  pub fn freshness_window(&self) -> Duration {
    Duration::minutes(self.freshness_minutes.max(0))
  }
}

impl DisplayConfig {
  pub fn offset(&self) -> FixedOffset {
    self
      .utc_offset_minutes
      .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
      .unwrap_or_else(|| Local::now().offset().fix())
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tdo.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tdo/config.yaml
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
        "No configuration file found. Create one at ~/.config/tdo/config.yaml\n\
                 with at least `remote: {{ url: https://<project>.supabase.co }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tdo.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tdo").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse and validate a configuration document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.remote.origin()?;
    Ok(config)
  }

  /// Get the store API key from environment variables.
  ///
  /// Checks TDO_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("TDO_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .ok()
      .filter(|key| !key.trim().is_empty())
      .ok_or_else(|| {
        eyre!("Store API key not found. Set TDO_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("remote:\n  url: https://abc.supabase.co\n").unwrap();
    assert_eq!(config.remote.timeout_secs, 10);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.freshness_window(), Duration::hours(1));
    assert!(config.cache.path.is_none());
  }

  #[test]
  fn test_rest_base_appends_path_once() {
    let config = Config::from_yaml("remote:\n  url: https://abc.supabase.co/\n").unwrap();
    assert_eq!(
      config.remote.rest_base().unwrap().as_str(),
      "https://abc.supabase.co/rest/v1/"
    );
  }

  #[test]
  fn test_missing_url_fails_fast() {
    assert!(Config::from_yaml("cache:\n  enabled: false\n").is_err());
    assert!(Config::from_yaml("remote:\n  url: \"  \"\n").is_err());
    assert!(Config::from_yaml("remote:\n  url: ftp://abc\n").is_err());
  }

  #[test]
  fn test_explicit_offset() {
    let config = Config::from_yaml(
      "remote:\n  url: https://abc.supabase.co\ndisplay:\n  utc_offset_minutes: 540\n",
    )
    .unwrap();
    assert_eq!(config.display.offset().local_minus_utc(), 9 * 3600);
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/tdo.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
