//! Request classification.

use super::types::Request;
use crate::config::CacheConfig;

/// How the worker treats a request, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Treatment {
  /// Not HTTP(S): left entirely to the host
  Ignored,
  /// Sensitive route: straight to the network, no cache, no fallback
  AuthExempt,
  /// Page load: network-first, offline document as last resort
  Navigation,
  /// Build output: network-first, errors propagate
  BuildAsset,
  /// Pre-warmed asset: cache-first
  StaticAsset,
  /// Everything else: network-first, synthetic 408 as last resort
  Other,
}

/// Route patterns used to classify requests.
#[derive(Debug, Clone)]
pub struct RouteTable {
  auth_exempt: Vec<String>,
  build_segment: String,
  static_assets: Vec<String>,
}

impl RouteTable {
  pub fn new(auth_exempt: Vec<String>, build_segment: String, static_assets: Vec<String>) -> Self {
    Self {
      auth_exempt,
      build_segment,
      static_assets,
    }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new(
      config.auth_exempt.clone(),
      config.build_segment.clone(),
      config.static_assets.clone(),
    )
  }

  pub fn classify(&self, request: &Request) -> Treatment {
    if !request.is_http() {
      return Treatment::Ignored;
    }

    let path = request.path();

    if self.is_auth_exempt(path) {
      Treatment::AuthExempt
    } else if request.is_navigation() {
      Treatment::Navigation
    } else if !self.build_segment.is_empty() && path.contains(&self.build_segment) {
      Treatment::BuildAsset
    } else if self.is_static_asset(path) {
      Treatment::StaticAsset
    } else {
      Treatment::Other
    }
  }

  fn is_auth_exempt(&self, path: &str) -> bool {
    self
      .auth_exempt
      .iter()
      .any(|route| !route.is_empty() && path.starts_with(route.as_str()))
  }

  fn is_static_asset(&self, path: &str) -> bool {
    self.static_assets.iter().any(|asset| {
      // The root entry would otherwise swallow every directory path
      if asset == "/" {
        path == "/"
      } else {
        path.ends_with(asset.as_str())
      }
    })
  }
}
