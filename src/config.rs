use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{DEFAULT_MAX_ITEMS, DEFAULT_REMOTE_PREFIX, DEFAULT_TTL_SECS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub jira: JiraConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
  /// Auto-detect based on URL: .atlassian.net = cloud, else on-premise
  #[default]
  Auto,
  /// Jira Cloud - uses Basic auth (email + API token as password)
  Cloud,
  /// Jira On-premise - uses Bearer auth (PAT)
  Onpremise,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraConfig {
  pub url: String,
  pub email: String,
  /// Authentication type: auto, cloud, or onpremise
  #[serde(default)]
  pub auth_type: AuthType,
}

impl JiraConfig {
  /// Resolve `Auto` against the instance URL.
  pub fn effective_auth_type(&self) -> AuthType {
    match self.auth_type {
      AuthType::Auto if self.url.contains(".atlassian.net") => AuthType::Cloud,
      AuthType::Auto => AuthType::Onpremise,
      other => other,
    }
  }
}

/// Lookup cache settings. Every field has a default, so the whole section
/// may be left out.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  pub default_ttl_secs: u64,
  /// Memory tier capacity in entries; 0 turns the memory tier into a pass-through
  pub max_items: usize,
  /// Shared tier, e.g. `redis://localhost:6379` or `sqlite:///var/cache/jcache.db`
  pub remote_url: Option<String>,
  /// Prepended to every key in the shared tier
  pub remote_prefix: String,
  pub remote_timeout_ms: u64,
  /// Run a background expiry sweep at this interval
  pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      default_ttl_secs: DEFAULT_TTL_SECS,
      max_items: DEFAULT_MAX_ITEMS,
      remote_url: None,
      remote_prefix: DEFAULT_REMOTE_PREFIX.to_string(),
      remote_timeout_ms: 250,
      sweep_interval_secs: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./jcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/jcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/jcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("jcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("jcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the Jira API token from environment variables.
  ///
  /// Checks JCACHE_JIRA_TOKEN first, then JIRA_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("JCACHE_JIRA_TOKEN")
      .or_else(|_| std::env::var("JIRA_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Jira API token not found. Set JCACHE_JIRA_TOKEN or JIRA_API_TOKEN environment variable."
        )
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cache_section_is_optional() {
    let config = Config::parse(
      "jira:\n  url: https://acme.atlassian.net\n  email: dev@acme.test\n",
    )
    .unwrap();

    assert_eq!(config.cache, CacheConfig::default());
    assert!(config.cache.enabled);
    assert_eq!(config.cache.default_ttl_secs, 300);
    assert_eq!(config.cache.max_items, 1000);
    assert_eq!(config.cache.remote_url, None);
  }

  #[test]
  fn partial_cache_section_keeps_defaults() {
    let config = Config::parse(
      r#"
jira:
  url: https://jira.internal
  email: dev@acme.test
  auth_type: onpremise
cache:
  default_ttl_secs: 60
  remote_url: redis://cache:6379
"#,
    )
    .unwrap();

    assert_eq!(config.cache.default_ttl_secs, 60);
    assert_eq!(config.cache.remote_url.as_deref(), Some("redis://cache:6379"));
    assert_eq!(config.cache.max_items, 1000);
    assert_eq!(config.cache.remote_prefix, "jcache:");
    assert_eq!(config.jira.auth_type, AuthType::Onpremise);
  }

  #[test]
  fn auto_auth_follows_url() {
    let cloud = JiraConfig {
      url: "https://acme.atlassian.net".to_string(),
      email: String::new(),
      auth_type: AuthType::Auto,
    };
    assert_eq!(cloud.effective_auth_type(), AuthType::Cloud);

    let onprem = JiraConfig {
      url: "https://jira.acme.internal".to_string(),
      ..cloud.clone()
    };
    assert_eq!(onprem.effective_auth_type(), AuthType::Onpremise);

    let forced = JiraConfig {
      auth_type: AuthType::Cloud,
      ..onprem
    };
    assert_eq!(forced.effective_auth_type(), AuthType::Cloud);
  }

  #[test]
  fn missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
