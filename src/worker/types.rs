//! Request and response model seen by the offline worker.
//!
//! Only the fields the worker actually consumes are modeled: the request URL,
//! method, mode and headers, and the response status, headers and body.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Status used for the synthetic response returned when a generic request
/// fails with nothing cached.
pub const NETWORK_ERROR_STATUS: u16 = 408;

/// Body of the synthetic network error response.
pub const NETWORK_ERROR_BODY: &str = "Network error";

/// Errors raised by a live fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Request timed out after {0:?}")]
  Timeout(Duration),

  #[error("Unsupported scheme: {0}")]
  UnsupportedScheme(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

/// How the request was issued by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Full document load or route transition
  Navigate,
  /// Sub-resource fetch from the same origin
  #[default]
  SameOrigin,
  /// Cross-origin fetch using CORS
  Cors,
  /// Cross-origin fetch without CORS
  NoCors,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Request {
  /// A plain sub-resource `GET`.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::SameOrigin,
      headers: Vec::new(),
      body: Bytes::new(),
    }
  }

  /// A navigation `GET` for a full page load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = body.into();
    self
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Whether the request uses a scheme the worker intercepts.
  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

/// A response snapshot, either live from the network or read back from a
/// cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  /// A plain text response.
  pub fn text(status: u16, body: impl Into<String>) -> Self {
    Self::new(
      status,
      vec![(
        "content-type".to_string(),
        "text/plain; charset=utf-8".to_string(),
      )],
      body.into(),
    )
  }

  /// The response handed to the page when a generic request fails and no
  /// cached copy exists.
  pub fn network_error() -> Self {
    Self::text(NETWORK_ERROR_STATUS, NETWORK_ERROR_BODY)
  }

  /// Status in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_redirect(&self) -> bool {
    (300..400).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(n, _)| n.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}
