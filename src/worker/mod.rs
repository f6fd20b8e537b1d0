//! The offline worker: request interception over a versioned cache.
//!
//! One [`OfflineWorker`] is one deployed version. It classifies every request,
//! applies the matching fetch strategy against its own cache generation, and
//! owns the install/activate lifecycle for that generation. A
//! [`Registration`] decides which version currently serves requests.

mod lifecycle;
mod network;
mod selector;
mod strategy;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use lifecycle::{InstallReport, Registration, WorkerState};
pub use network::{fetch_with_timeout, HttpNetwork, Network};
pub use selector::{RouteTable, Treatment};
pub use types::{FetchError, Request, RequestMode, Response};

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheResult, CacheStorage, Generation};
use crate::config::Config;
use strategy::{cache_first, network_first, Miss};

/// Served when a navigation fails and the offline page was never cached.
const BUILTIN_OFFLINE_PAGE: &str = "<!DOCTYPE html>
<html lang=\"en\">
<head><meta charset=\"utf-8\"><title>Offline</title></head>
<body><h1>You are offline</h1><p>Reconnect to keep logging your sessions.</p></body>
</html>
";

/// Outcome of intercepting a request.
#[derive(Debug, Clone)]
pub enum Intercept {
  /// Not handled; the host applies its default behavior
  Ignored,
  /// Handled by the worker
  Respond(CacheResult),
}

/// One deployed version of the offline worker.
pub struct OfflineWorker {
  scope: Url,
  routes: RouteTable,
  static_assets: Vec<String>,
  offline_page: String,
  timeout: Duration,
  network: Arc<dyn Network>,
  cache: Generation,
  state: Mutex<WorkerState>,
}

impl OfflineWorker {
  pub fn new(
    config: &Config,
    network: Arc<dyn Network>,
    storage: Arc<dyn CacheStorage>,
  ) -> Result<Self> {
    let scope = config.origin_url()?;
    if scope.cannot_be_a_base() {
      return Err(eyre!("Origin {} cannot be used as a base URL", scope));
    }

    Ok(Self {
      scope,
      routes: RouteTable::from_config(&config.cache),
      static_assets: config.cache.static_assets.clone(),
      offline_page: config.cache.offline_page.clone(),
      timeout: config.network.timeout(),
      network,
      cache: Generation::new(storage, config.cache.version.clone()),
      state: Mutex::new(WorkerState::Uninstalled),
    })
  }

  /// Version tag, which is also the name of the cache generation.
  pub fn version(&self) -> &str {
    self.cache.name()
  }

  pub fn scope(&self) -> &Url {
    &self.scope
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  pub(crate) fn cache(&self) -> &Generation {
    &self.cache
  }

  pub(crate) fn network(&self) -> &dyn Network {
    self.network.as_ref()
  }

  pub(crate) fn timeout(&self) -> Duration {
    self.timeout
  }

  pub(crate) fn static_assets(&self) -> &[String] {
    &self.static_assets
  }

  /// A `GET` for a path under this worker's origin.
  pub fn request_for(&self, path: &str) -> Result<Request> {
    let url = self
      .scope
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
    Ok(Request::get(url))
  }

  /// Handle one request.
  ///
  /// Errors only escape for sensitive routes, build assets and cache-first
  /// misses, where the network failure is the caller's to see.
  pub async fn intercept(&self, request: &Request) -> Result<Intercept, FetchError> {
    let treatment = self.routes.classify(request);
    debug!(
      version = self.version(),
      method = %request.method,
      url = %request.url,
      ?treatment,
      "Intercepting request"
    );

    let network = self.network.as_ref();
    let result = match treatment {
      Treatment::Ignored => return Ok(Intercept::Ignored),
      Treatment::AuthExempt => {
        let response = fetch_with_timeout(network, request, self.timeout).await?;
        CacheResult::passthrough(response)
      }
      Treatment::Navigation => {
        match network_first(network, &self.cache, request, self.timeout).await {
          Ok(result) => result,
          Err(miss) => {
            warn!(url = %request.url, reason = %describe(&miss), "Navigation failed, serving offline page");
            self.offline_document()
          }
        }
      }
      Treatment::BuildAsset => {
        match network_first(network, &self.cache, request, self.timeout).await {
          Ok(result) => result,
          Err(Miss::Status(response)) => CacheResult::from_network(response),
          Err(Miss::Error(e)) => return Err(e),
        }
      }
      Treatment::StaticAsset => {
        cache_first(network, &self.cache, request, self.timeout, &self.scope).await?
      }
      Treatment::Other => {
        match network_first(network, &self.cache, request, self.timeout).await {
          Ok(result) => result,
          Err(miss) => {
            debug!(url = %request.url, reason = %describe(&miss), "Serving synthetic network error");
            CacheResult::synthetic(Response::network_error())
          }
        }
      }
    };

    Ok(Intercept::Respond(result))
  }

  /// The offline document from the current generation, or the built-in page
  /// when it was never cached.
  fn offline_document(&self) -> CacheResult {
    let cached = self
      .request_for(&self.offline_page)
      .ok()
      .and_then(|request| self.cache.lookup(&request));

    match cached {
      Some(hit) => CacheResult::offline(hit.response, Some(hit.cached_at)),
      None => {
        warn!(page = %self.offline_page, "Offline page not cached, using built-in page");
        CacheResult::offline(
          Response::new(
            503,
            vec![(
              "content-type".to_string(),
              "text/html; charset=utf-8".to_string(),
            )],
            BUILTIN_OFFLINE_PAGE,
          ),
          None,
        )
      }
    }
  }
}

fn describe(miss: &Miss) -> String {
  match miss {
    Miss::Status(response) => format!("HTTP {}", response.status),
    Miss::Error(e) => e.to_string(),
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use super::*;
  use crate::cache::SqliteStorage;
  use super::testing::FakeNetwork;

  pub fn config(version: &str) -> Config {
    let mut config = Config::default();
    config.origin = Some("https://gym.example".to_string());
    config.cache.version = version.to_string();
    config.network.timeout_secs = 1;
    config
  }

  pub fn storage() -> Arc<dyn CacheStorage> {
    Arc::new(SqliteStorage::open_in_memory().unwrap())
  }

  pub fn worker(
    version: &str,
    net: &Arc<FakeNetwork>,
    storage: &Arc<dyn CacheStorage>,
  ) -> OfflineWorker {
    OfflineWorker::new(&config(version), net.clone(), storage.clone()).unwrap()
  }

  /// A worker whose generation already exists, as after install.
  pub fn open_worker(
    version: &str,
    net: &Arc<FakeNetwork>,
    storage: &Arc<dyn CacheStorage>,
  ) -> OfflineWorker {
    let w = worker(version, net, storage);
    w.cache().open().unwrap();
    w
  }
}
