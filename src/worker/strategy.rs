//! Fetch strategies over the current cache generation and the network.

use std::time::Duration;
use tracing::debug;
use url::{Origin, Url};

use super::network::{fetch_with_timeout, Network};
use super::types::{FetchError, Request, Response};
use crate::cache::{CacheResult, CachedResponse, Generation};

/// Why network-first could not produce a response on its own.
#[derive(Debug, Clone)]
pub enum Miss {
  /// The server answered with a non-ok status and nothing was cached
  Status(Response),
  /// The fetch failed and nothing was cached
  Error(FetchError),
}

/// Only successful `GET`s are written back, matching what a browser cache
/// accepts.
fn should_store(request: &Request, response: &Response) -> bool {
  request.method == "GET" && response.is_ok()
}

fn lookup(cache: &Generation, request: &Request) -> Option<CachedResponse> {
  if request.method == "GET" {
    cache.lookup(request)
  } else {
    None
  }
}

/// Try the network, fall back to the cached copy.
///
/// Ok responses are stored before being returned. Redirects are returned as
/// they are. Any other status, or a failed fetch, falls back to the cache; if
/// nothing is cached the caller decides what to serve from the [`Miss`].
pub async fn network_first(
  network: &dyn Network,
  cache: &Generation,
  request: &Request,
  timeout: Duration,
) -> Result<CacheResult, Miss> {
  let miss = match fetch_with_timeout(network, request, timeout).await {
    Ok(response) if response.is_ok() || response.is_redirect() => {
      if should_store(request, &response) {
        cache.store(request, &response);
      }
      return Ok(CacheResult::from_network(response));
    }
    Ok(response) => {
      debug!(url = %request.url, status = response.status, "Network returned non-ok status");
      Miss::Status(response)
    }
    Err(e) => {
      debug!(url = %request.url, error = %e, "Network fetch failed");
      Miss::Error(e)
    }
  };

  match lookup(cache, request) {
    Some(hit) => Ok(CacheResult::from_cache(hit.response, hit.cached_at)),
    None => Err(miss),
  }
}

/// Serve from the cache, fetching and storing on a miss.
///
/// Hits never touch the network and are never checked for freshness; entries
/// only go away with their generation. Misses are stored when the response is
/// ok and comes from `scope`'s origin.
pub async fn cache_first(
  network: &dyn Network,
  cache: &Generation,
  request: &Request,
  timeout: Duration,
  scope: &Url,
) -> Result<CacheResult, FetchError> {
  if let Some(hit) = lookup(cache, request) {
    return Ok(CacheResult::from_cache(hit.response, hit.cached_at));
  }

  let response = fetch_with_timeout(network, request, timeout).await?;
  if should_store(request, &response) && same_origin(&request.url, scope) {
    cache.store(request, &response);
  } else {
    debug!(url = %request.url, status = response.status, "Not caching response");
  }

  Ok(CacheResult::from_network(response))
}

fn same_origin(url: &Url, scope: &Url) -> bool {
  let origin = url.origin();
  matches!(origin, Origin::Tuple(..)) && origin == scope.origin()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::worker::testing::FakeNetwork;
  use std::sync::Arc;

  const TIMEOUT: Duration = Duration::from_secs(1);

  fn scope() -> Url {
    Url::parse("https://gym.example/").unwrap()
  }

  fn get(path: &str) -> Request {
    Request::get(scope().join(path).unwrap())
  }

  fn generation() -> Generation {
    let cache = unwritable_generation();
    cache.open().unwrap();
    cache
  }

  /// A generation that was never opened, so every write into it fails.
  fn unwritable_generation() -> Generation {
    Generation::new(Arc::new(SqliteStorage::open_in_memory().unwrap()), "gym-progress-v1")
  }

  #[tokio::test]
  async fn test_network_first_caches_ok_response() {
    let net = FakeNetwork::new();
    net.respond("/api/machines", 200, "[1,2]");
    let cache = generation();

    let result = network_first(&net, &cache, &get("/api/machines"), TIMEOUT)
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.body.as_ref(), b"[1,2]");
    assert!(cache.lookup(&get("/api/machines")).is_some());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache_on_error() {
    let net = FakeNetwork::new();
    net.fail("/api/machines");
    let cache = generation();
    cache.store(&get("/api/machines"), &Response::text(200, "cached"));

    let result = network_first(&net, &cache, &get("/api/machines"), TIMEOUT)
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.response.body.as_ref(), b"cached");
    assert!(result.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_network_first_does_not_cache_error_status() {
    let net = FakeNetwork::new();
    net.respond("/api/machines", 500, "boom");
    let cache = generation();

    let miss = network_first(&net, &cache, &get("/api/machines"), TIMEOUT)
      .await
      .unwrap_err();

    assert!(matches!(miss, Miss::Status(ref r) if r.status == 500));
    assert!(cache.lookup(&get("/api/machines")).is_none());
  }

  #[tokio::test]
  async fn test_network_first_error_status_prefers_cached_copy() {
    let net = FakeNetwork::new();
    net.respond("/progress", 503, "down");
    let cache = generation();
    cache.store(&get("/progress"), &Response::text(200, "last good"));

    let result = network_first(&net, &cache, &get("/progress"), TIMEOUT)
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.response.body.as_ref(), b"last good");
  }

  #[tokio::test]
  async fn test_network_first_passes_redirects_through_uncached() {
    let net = FakeNetwork::new();
    net.respond("/dashboard", 302, "");
    let cache = generation();

    let result = network_first(&net, &cache, &get("/dashboard"), TIMEOUT)
      .await
      .unwrap();

    assert_eq!(result.response.status, 302);
    assert!(cache.lookup(&get("/dashboard")).is_none());
  }

  #[tokio::test]
  async fn test_network_first_never_caches_non_get() {
    let net = FakeNetwork::new();
    net.respond("/api/sessions", 201, "created");
    let cache = generation();
    let post = get("/api/sessions").with_method("POST").with_body("{}");

    network_first(&net, &cache, &post, TIMEOUT).await.unwrap();

    assert!(cache.storage().entry_keys("gym-progress-v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_first_timeout_is_a_miss() {
    let net = FakeNetwork::new();
    net.hang("/slow");
    let cache = generation();

    let miss = network_first(&net, &cache, &get("/slow"), Duration::from_millis(20))
      .await
      .unwrap_err();

    assert!(matches!(miss, Miss::Error(FetchError::Timeout(_))));
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let net = FakeNetwork::new();
    net.respond("/manifest.json", 200, "fresh");
    let cache = generation();
    cache.store(&get("/manifest.json"), &Response::text(200, "cached"));

    let result = cache_first(&net, &cache, &get("/manifest.json"), TIMEOUT, &scope())
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.response.body.as_ref(), b"cached");
    assert_eq!(net.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_fetches_once_and_stores() {
    let net = FakeNetwork::new();
    net.respond("/manifest.json", 200, "fresh");
    let cache = generation();

    let result = cache_first(&net, &cache, &get("/manifest.json"), TIMEOUT, &scope())
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(net.calls(), 1);
    let stored = cache.lookup(&get("/manifest.json")).unwrap();
    assert_eq!(stored.response.body.as_ref(), b"fresh");
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let net = FakeNetwork::new();
    net.respond("/favicon.ico", 404, "missing");
    let cache = generation();

    let result = cache_first(&net, &cache, &get("/favicon.ico"), TIMEOUT, &scope())
      .await
      .unwrap();

    assert_eq!(result.response.status, 404);
    assert!(cache.lookup(&get("/favicon.ico")).is_none());
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_cross_origin() {
    let net = FakeNetwork::new();
    net.respond("/font.woff2", 200, "font");
    let cache = generation();
    let req = Request::get(Url::parse("https://cdn.example/font.woff2").unwrap());

    cache_first(&net, &cache, &req, TIMEOUT, &scope())
      .await
      .unwrap();

    assert!(cache.lookup(&req).is_none());
  }

  #[tokio::test]
  async fn test_cache_first_miss_with_network_error_propagates() {
    let net = FakeNetwork::new();
    net.fail("/manifest.json");
    let cache = generation();

    let err = cache_first(&net, &cache, &get("/manifest.json"), TIMEOUT, &scope())
      .await
      .unwrap_err();

    assert!(matches!(err, FetchError::Network(_)));
  }

  #[tokio::test]
  async fn test_network_first_returns_response_when_cache_write_fails() {
    let net = FakeNetwork::new();
    net.respond("/progress", 200, "<h1>Progress</h1>");
    let cache = unwritable_generation();

    let result = network_first(&net, &cache, &get("/progress"), TIMEOUT)
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.body.as_ref(), b"<h1>Progress</h1>");
    assert!(cache.lookup(&get("/progress")).is_none());
  }

  #[tokio::test]
  async fn test_cache_first_returns_response_when_cache_write_fails() {
    let net = FakeNetwork::new();
    net.respond("/manifest.json", 200, "{}");
    let cache = unwritable_generation();

    let result = cache_first(&net, &cache, &get("/manifest.json"), TIMEOUT, &scope())
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.body.as_ref(), b"{}");
    assert_eq!(net.calls(), 1);
  }
}
