//! Request identity used as the cache key.

use sha2::{Digest, Sha256};
use url::Url;

use crate::worker::Request;

/// Normalized request identity: upper-cased method plus the origin-qualified
/// URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: String,
  pub url: String,
}

impl CacheKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  /// SHA256 of the normalized form, for stable fixed-length storage keys.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_fragment_is_ignored() {
    let a = CacheKey::new("GET", &url("https://gym.example/offline.html#top"));
    let b = CacheKey::new("GET", &url("https://gym.example/offline.html"));
    assert_eq!(a, b);
    assert_eq!(a.digest(), b.digest());
  }

  #[test]
  fn test_method_is_normalized() {
    let a = CacheKey::new("get", &url("https://gym.example/"));
    assert_eq!(a.method, "GET");
    assert_eq!(a.to_string(), "GET https://gym.example/");
  }

  #[test]
  fn test_query_and_origin_are_part_of_identity() {
    let base = CacheKey::new("GET", &url("https://gym.example/progress"));
    let query = CacheKey::new("GET", &url("https://gym.example/progress?machine=3"));
    let other_origin = CacheKey::new("GET", &url("https://cdn.example/progress"));
    assert_ne!(base.digest(), query.digest());
    assert_ne!(base.digest(), other_origin.digest());
  }

  #[test]
  fn test_digest_is_hex_sha256() {
    let key = CacheKey::new("GET", &url("https://gym.example/"));
    let digest = key.digest();
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
