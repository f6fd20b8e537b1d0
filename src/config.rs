use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  /// Base URL of the gym-progress app (e.g. "http://localhost:3000")
  pub origin: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
  /// Version tag naming the current cache generation
  pub version: String,
  /// Paths pre-warmed at install and served cache-first
  pub static_assets: Vec<String>,
  /// Document served when a navigation fails with nothing cached
  pub offline_page: String,
  /// Path segment marking build output
  pub build_segment: String,
  /// Route prefixes that always bypass the cache
  pub auth_exempt: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "gym-progress-v1".to_string(),
      static_assets: vec![
        "/offline.html".to_string(),
        "/manifest.json".to_string(),
        "/favicon.ico".to_string(),
      ],
      offline_page: "/offline.html".to_string(),
      build_segment: "/_next/".to_string(),
      auth_exempt: vec![
        "/select-profile".to_string(),
        "/create-profile".to_string(),
        "/logout".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
  /// Upper bound on every live fetch, in seconds
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 10 }
  }
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
  /// Cache database location (defaults to $XDG_DATA_HOME/gpcache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
  pub listen: SocketAddr,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./gpcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/gpcache/config.yaml
  ///
  /// When no file is found the defaults are used; the origin then has to come
  /// from the command line.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("gpcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gpcache").join("config.yaml");
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

  /// Check values that deserialize fine but cannot work.
  pub fn validate(&self) -> Result<()> {
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    if !self.cache.offline_page.starts_with('/') {
      return Err(eyre!(
        "cache.offline_page must be an absolute path, got {}",
        self.cache.offline_page
      ));
    }
    if let Some(asset) = self.cache.static_assets.iter().find(|a| !a.starts_with('/')) {
      return Err(eyre!(
        "cache.static_assets entries must be absolute paths, got {}",
        asset
      ));
    }
    if self.network.timeout_secs == 0 {
      return Err(eyre!("network.timeout_secs must be at least 1"));
    }
    Ok(())
  }

  /// The app origin as a URL.
  pub fn origin_url(&self) -> Result<Url> {
    let origin = self.origin.as_deref().ok_or_else(|| {
      eyre!(
        "No origin configured. Set `origin` in ~/.config/gpcache/config.yaml \
         or pass --origin."
      )
    })?;

    let url = Url::parse(origin).map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be http or https, got {}", origin));
    }
    // Request paths are mapped onto the origin as-is
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
      return Err(eyre!(
        "Origin must not carry a path, query or fragment, got {}",
        origin
      ));
    }
    Ok(url)
  }

  /// The cache database path, configured or default.
  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("origin: http://localhost:3000\n").unwrap();
    config.validate().unwrap();

    assert_eq!(config.cache.version, "gym-progress-v1");
    assert_eq!(
      config.cache.static_assets,
      vec!["/offline.html", "/manifest.json", "/favicon.ico"]
    );
    assert_eq!(config.network.timeout(), Duration::from_secs(10));
    assert_eq!(config.proxy.listen.port(), 8787);
    assert_eq!(
      config.origin_url().unwrap().as_str(),
      "http://localhost:3000/"
    );
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
origin: https://gym.example
cache:
  version: gym-progress-v2
  static_assets: ["/", "/offline.html"]
  offline_page: /offline.html
  build_segment: /_app/
  auth_exempt: ["/logout"]
network:
  timeout_secs: 3
storage:
  path: /tmp/gpcache.db
proxy:
  listen: 0.0.0.0:9000
"#;
    let config = Config::parse(yaml).unwrap();
    config.validate().unwrap();

    assert_eq!(config.cache.version, "gym-progress-v2");
    assert_eq!(config.cache.build_segment, "/_app/");
    assert_eq!(config.cache.auth_exempt, vec!["/logout"]);
    assert_eq!(config.network.timeout_secs, 3);
    assert_eq!(config.storage_path().unwrap(), PathBuf::from("/tmp/gpcache.db"));
    assert_eq!(config.proxy.listen.port(), 9000);
  }

  #[test]
  fn test_unknown_keys_are_rejected() {
    assert!(Config::parse("origin: http://x\ncache:\n  versoin: typo\n").is_err());
  }

  #[test]
  fn test_validation_errors() {
    let mut config = Config::default();
    config.cache.version = " ".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.cache.static_assets = vec!["offline.html".to_string()];
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.network.timeout_secs = 0;
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_origin_is_required_and_checked() {
    let mut config = Config::default();
    assert!(config.origin_url().is_err());

    config.origin = Some("ftp://gym.example".to_string());
    assert!(config.origin_url().is_err());

    config.origin = Some("not a url".to_string());
    assert!(config.origin_url().is_err());
  }

  #[test]
  fn test_origin_with_path_is_rejected() {
    let mut config = Config::default();

    config.origin = Some("http://localhost:3000/app".to_string());
    assert!(config.origin_url().is_err());

    config.origin = Some("http://localhost:3000/?tenant=a".to_string());
    assert!(config.origin_url().is_err());

    config.origin = Some("http://localhost:3000/".to_string());
    assert_eq!(config.origin_url().unwrap().as_str(), "http://localhost:3000/");
  }

  #[test]
  fn test_load_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gpcache.yaml");
    std::fs::write(&path, "origin: http://localhost:3000\ncache:\n  version: v9\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.cache.version, "v9");

    assert!(Config::load(Some(&dir.path().join("missing.yaml"))).is_err());
  }
}
