//! Core types describing where a served response came from.

use chrono::{DateTime, Utc};

use crate::worker::Response;

/// A response handed back to the page, with metadata about its source.
#[derive(Debug, Clone)]
pub struct CacheResult {
  /// The response itself
  pub response: Response,
  /// Where the response came from
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  /// Fresh response from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Response read from the current cache generation.
  pub fn from_cache(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// The offline document served in place of a failed navigation.
  pub fn offline(response: Response, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      response,
      source: CacheSource::Offline,
      cached_at,
    }
  }

  /// Synthetic response built by the worker itself.
  pub fn synthetic(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Synthetic,
      cached_at: None,
    }
  }

  /// Network response that bypassed the cache entirely.
  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Stored copy from the current generation
  Cache,
  /// Offline fallback document
  Offline,
  /// Built by the worker (network error placeholder)
  Synthetic,
  /// Sent straight to the network, cache never consulted
  Passthrough,
}

impl CacheSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::Synthetic => "synthetic",
      Self::Passthrough => "passthrough",
    }
  }
}
