//! Install/activate lifecycle and the registration that picks the serving
//! version.

use color_eyre::Result;
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

use super::network::fetch_with_timeout;
use super::types::{FetchError, Request};
use super::{Intercept, OfflineWorker};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
  /// Created, install not started
  #[default]
  Uninstalled,
  /// Pre-warming the cache generation
  Installing,
  /// Installed, waiting to take over
  Installed,
  /// Evicting stale generations
  Activating,
  /// Serving requests
  Active,
  /// Replaced by a newer version or failed to install
  Redundant,
}

/// A static asset that could not be pre-warmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAsset {
  pub path: String,
  pub reason: String,
}

/// Result of installing a version.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  pub version: String,
  /// Assets stored in the new generation, in configured order
  pub cached: Vec<String>,
  /// Assets that failed and were left out
  pub skipped: Vec<SkippedAsset>,
}

/// Result of activating a version.
#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  pub version: String,
  /// Stale generations removed from storage
  pub deleted: Vec<String>,
}

impl OfflineWorker {
  /// Open the version's cache generation and pre-warm every static asset.
  ///
  /// Assets are fetched concurrently and independently; one that cannot be
  /// fetched or stored is logged and skipped. Only failing to open the
  /// generation itself fails the install.
  pub async fn install(&self) -> Result<InstallReport> {
    self.set_state(WorkerState::Installing);
    info!(version = self.version(), "Installing");

    if let Err(e) = self.cache().open() {
      self.set_state(WorkerState::Redundant);
      return Err(e.wrap_err(format!("Failed to open cache generation {}", self.version())));
    }

    let outcomes = join_all(self.static_assets().iter().map(|path| self.prewarm(path))).await;

    let mut report = InstallReport {
      version: self.version().to_string(),
      ..Default::default()
    };
    for (path, outcome) in self.static_assets().iter().zip(outcomes) {
      match outcome {
        Ok(()) => report.cached.push(path.clone()),
        Err(reason) => {
          warn!(version = self.version(), asset = %path, %reason, "Skipping static asset");
          report.skipped.push(SkippedAsset {
            path: path.clone(),
            reason,
          });
        }
      }
    }

    self.set_state(WorkerState::Installed);
    info!(
      version = self.version(),
      cached = report.cached.len(),
      skipped = report.skipped.len(),
      "Installed"
    );

    Ok(report)
  }

  async fn prewarm(&self, path: &str) -> std::result::Result<(), String> {
    let request: Request = self.request_for(path).map_err(|e| e.to_string())?;
    let response = fetch_with_timeout(self.network(), &request, self.timeout())
      .await
      .map_err(|e: FetchError| e.to_string())?;

    if !response.is_ok() {
      return Err(format!("HTTP {}", response.status));
    }

    self
      .cache()
      .put(&request, &response)
      .map_err(|e| e.to_string())
  }

  /// Delete every cache generation other than this version's.
  ///
  /// Running it again is a no-op.
  pub fn activate(&self) -> Result<ActivateReport> {
    self.set_state(WorkerState::Activating);
    info!(version = self.version(), "Activating");

    let storage = self.cache().storage();
    let mut report = ActivateReport {
      version: self.version().to_string(),
      ..Default::default()
    };

    for generation in storage.generations()? {
      if generation.name == self.version() {
        continue;
      }
      if storage.delete_generation(&generation.name)? {
        info!(
          generation = %generation.name,
          entries = generation.entries,
          "Deleted stale cache generation"
        );
        report.deleted.push(generation.name);
      }
    }

    self.set_state(WorkerState::Active);
    Ok(report)
  }
}

/// Tracks the installing, waiting and active versions for one scope.
///
/// Requests are always served by the active version. A new version installs
/// alongside it and only takes over once it has activated.
#[derive(Default)]
pub struct Registration {
  installing: Mutex<Option<Arc<OfflineWorker>>>,
  waiting: Mutex<Option<Arc<OfflineWorker>>>,
  active: RwLock<Option<Arc<OfflineWorker>>>,
}

impl Registration {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn active(&self) -> Option<Arc<OfflineWorker>> {
    self
      .active
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn waiting(&self) -> Option<Arc<OfflineWorker>> {
    self
      .waiting
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn installing(&self) -> Option<Arc<OfflineWorker>> {
    self
      .installing
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Install a new version and let it take over right away.
  pub async fn register(&self, worker: OfflineWorker) -> Result<InstallReport> {
    let worker = Arc::new(worker);
    *self.installing.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker.clone());

    let installed = worker.install().await;
    self
      .installing
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    let report = installed?;

    let previous = self
      .waiting
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(worker);
    if let Some(previous) = previous {
      previous.set_state(WorkerState::Redundant);
    }

    self.skip_waiting()?;
    Ok(report)
  }

  /// Activate the waiting version, if any, and make it serve every request
  /// from now on.
  pub fn skip_waiting(&self) -> Result<Option<ActivateReport>> {
    let waiting = self
      .waiting
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    let Some(worker) = waiting else {
      return Ok(None);
    };

    let report = match worker.activate() {
      Ok(report) => report,
      Err(e) => {
        worker.set_state(WorkerState::Redundant);
        return Err(e);
      }
    };

    self.claim(worker);
    Ok(Some(report))
  }

  /// Route all subsequent requests, including those from pages that were
  /// already open, to `worker`.
  fn claim(&self, worker: Arc<OfflineWorker>) {
    let version = worker.version().to_string();
    let previous = self
      .active
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(worker);

    if let Some(previous) = previous {
      previous.set_state(WorkerState::Redundant);
      info!(from = previous.version(), to = %version, "Claimed clients");
    } else {
      info!(version = %version, "Claimed clients");
    }
  }

  /// Hand a request to the active version. Without one nothing is
  /// intercepted.
  pub async fn intercept(&self, request: &Request) -> Result<Intercept, FetchError> {
    match self.active() {
      Some(worker) => worker.intercept(request).await,
      None => Ok(Intercept::Ignored),
    }
  }
}
