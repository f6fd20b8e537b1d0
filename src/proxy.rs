//! HTTP front end that routes every page request through the offline worker.
//!
//! The proxy sits between the browser and the app origin. Each incoming
//! request is converted to a worker [`Request`], handed to the active version
//! of the [`Registration`], and the outcome is turned back into HTTP.

use axum::body::{to_bytes, Body};
use axum::extract::{Request as HttpRequest, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use url::Url;

use crate::cache::CacheSource;
use crate::worker::{
  fetch_with_timeout, FetchError, Intercept, Network, Registration, Request, RequestMode, Response,
};

/// Largest request body the proxy will buffer.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Response header naming where the body came from.
pub const SOURCE_HEADER: &str = "x-gpcache";

/// Response headers that the HTTP server computes itself.
const SKIP_RESPONSE_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

/// Shared proxy state.
pub struct ProxyState {
  pub registration: Arc<Registration>,
  pub origin: Url,
  /// Used for requests no active version intercepts
  pub network: Arc<dyn Network>,
  pub timeout: Duration,
}

pub fn router(state: Arc<ProxyState>) -> Router {
  Router::new().fallback(handle).with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn run<F>(listener: TcpListener, state: Arc<ProxyState>, shutdown: F) -> Result<()>
where
  F: Future<Output = ()> + Send + 'static,
{
  let addr = listener
    .local_addr()
    .map_err(|e| eyre!("Failed to read listen address: {}", e))?;
  info!(%addr, origin = %state.origin, "Proxy listening");

  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| eyre!("Proxy server failed: {}", e))
}

async fn handle(State(state): State<Arc<ProxyState>>, req: HttpRequest) -> HttpResponse {
  let request = match to_worker_request(&state.origin, req).await {
    Ok(request) => request,
    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  };

  match state.registration.intercept(&request).await {
    Ok(Intercept::Respond(result)) => into_http(result.response, Some(result.source)),
    Ok(Intercept::Ignored) => {
      match fetch_with_timeout(state.network.as_ref(), &request, state.timeout).await {
        Ok(response) => into_http(response, None),
        Err(e) => error_response(&request, &e),
      }
    }
    Err(e) => error_response(&request, &e),
  }
}

async fn to_worker_request(origin: &Url, req: HttpRequest) -> Result<Request, FetchError> {
  let (parts, body) = req.into_parts();

  // Only path and query come from the client; scheme and host are the origin's
  let mut url = origin.clone();
  url.set_path(parts.uri.path());
  url.set_query(parts.uri.query());

  let headers: Vec<(String, String)> = parts
    .headers
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body = to_bytes(body, MAX_BODY_BYTES)
    .await
    .map_err(|e| FetchError::InvalidRequest(format!("Failed to read body: {}", e)))?;

  let method = parts.method.as_str().to_string();
  let mode = detect_mode(&method, &headers);

  Ok(Request {
    method,
    url,
    mode,
    headers,
    body,
  })
}

/// Derive the fetch mode from `Sec-Fetch-Mode`, or guess a navigation from
/// `Accept` for clients that do not send it.
fn detect_mode(method: &str, headers: &[(String, String)]) -> RequestMode {
  let header = |name: &str| {
    headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  };

  match header("sec-fetch-mode") {
    Some("navigate") => RequestMode::Navigate,
    Some("cors") => RequestMode::Cors,
    Some("no-cors") => RequestMode::NoCors,
    Some(_) => RequestMode::SameOrigin,
    None => {
      let wants_html = header("accept").is_some_and(|accept| accept.contains("text/html"));
      if method == "GET" && wants_html {
        RequestMode::Navigate
      } else {
        RequestMode::SameOrigin
      }
    }
  }
}

fn into_http(response: Response, source: Option<CacheSource>) -> HttpResponse {
  let mut builder = axum::http::Response::builder().status(response.status);
  for (name, value) in &response.headers {
    if SKIP_RESPONSE_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
      continue;
    }
    builder = builder.header(name.as_str(), value.as_str());
  }
  if let Some(source) = source {
    builder = builder.header(SOURCE_HEADER, source.as_str());
  }

  builder
    .body(Body::from(response.body))
    .unwrap_or_else(|e| {
      warn!(error = %e, "Failed to build response");
      (StatusCode::BAD_GATEWAY, "Invalid upstream response").into_response()
    })
}

fn error_response(request: &Request, e: &FetchError) -> HttpResponse {
  warn!(method = %request.method, url = %request.url, error = %e, "Request failed");
  let status = match e {
    FetchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    FetchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    FetchError::Network(_) | FetchError::UnsupportedScheme(_) => StatusCode::BAD_GATEWAY,
  };
  (status, e.to_string()).into_response()
}
