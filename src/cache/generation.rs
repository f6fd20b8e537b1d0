//! Handle on a single cache generation.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::storage::{CacheStorage, CachedResponse};
use crate::worker::{Request, Response};

/// Response headers that never go into a cache entry.
const UNCACHED_HEADERS: &[&str] = &["set-cookie", "set-cookie2"];

/// The cache generation a worker version reads from and writes to.
///
/// Reads that fail are reported as misses and writes that fail are logged and
/// dropped, so a broken cache never takes the response path down with it.
#[derive(Clone)]
pub struct Generation {
  storage: Arc<dyn CacheStorage>,
  name: String,
}

impl Generation {
  pub fn new(storage: Arc<dyn CacheStorage>, name: impl Into<String>) -> Self {
    Self {
      storage,
      name: name.into(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  /// Create the generation in storage if it is missing.
  pub fn open(&self) -> Result<()> {
    self.storage.open_generation(&self.name)
  }

  /// Look up a request, treating storage errors as a miss.
  pub fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    let key = CacheKey::for_request(request);
    match self.storage.match_entry(&self.name, &key) {
      Ok(hit) => {
        debug!(generation = %self.name, key = %key, hit = hit.is_some(), "Cache lookup");
        hit
      }
      Err(e) => {
        warn!(generation = %self.name, key = %key, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  /// Store a response, propagating storage errors.
  ///
  /// Cookies are dropped from the stored copy so a cached page never sets a
  /// session again.
  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    let key = CacheKey::for_request(request);
    let headers = response
      .headers
      .iter()
      .filter(|(name, _)| {
        !UNCACHED_HEADERS
          .iter()
          .any(|h| name.eq_ignore_ascii_case(h))
      })
      .cloned()
      .collect();
    let snapshot = Response::new(response.status, headers, response.body.clone());
    self.storage.put_entry(&self.name, &key, &snapshot)
  }

  /// Store a response, logging and dropping storage errors.
  pub fn store(&self, request: &Request, response: &Response) {
    if let Err(e) = self.put(request, response) {
      warn!(generation = %self.name, url = %request.url, error = %e, "Cache write failed");
    }
  }
}
