//! Live network access for the offline worker.

use async_trait::async_trait;
use reqwest::{redirect, Client, Method};
use std::time::Duration;
use tracing::debug;

use super::types::{FetchError, Request, Response};

/// Request headers that describe the hop to the proxy rather than the request
/// itself. They are never forwarded upstream.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "content-length",
  "host",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
];

/// Something that can perform a live fetch.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Run a fetch bounded by `timeout`.
///
/// A fetch that does not finish in time is reported as a network failure, so
/// strategies fall back exactly as they would on a dropped connection.
pub async fn fetch_with_timeout(
  network: &dyn Network,
  request: &Request,
  timeout: Duration,
) -> Result<Response, FetchError> {
  match tokio::time::timeout(timeout, network.fetch(request)).await {
    Ok(result) => result,
    Err(_) => Err(FetchError::Timeout(timeout)),
  }
}

/// `reqwest`-backed network.
///
/// Clone is cheap, the underlying client shares its connection pool.
#[derive(Clone)]
pub struct HttpNetwork {
  client: Client,
  timeout: Duration,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self, FetchError> {
    // Redirects go back to the page untouched so the browser keeps the right URL
    let client = Client::builder()
      .timeout(timeout)
      .redirect(redirect::Policy::none())
      .build()
      .map_err(|e| FetchError::Network(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client, timeout })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    if !request.is_http() {
      return Err(FetchError::UnsupportedScheme(
        request.url.scheme().to_string(),
      ));
    }

    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|_| FetchError::InvalidRequest(format!("Bad method {}", request.method)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
        continue;
      }
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder.send().await.map_err(|e| self.map_error(e))?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(|e| self.map_error(e))?;

    debug!(url = %request.url, status, bytes = body.len(), "Network fetch complete");

    Ok(Response::new(status, headers, body))
  }
}

impl HttpNetwork {
  fn map_error(&self, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
      FetchError::Timeout(self.timeout)
    } else {
      FetchError::Network(e.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn network() -> HttpNetwork {
    HttpNetwork::new(Duration::from_secs(5)).unwrap()
  }

  #[tokio::test]
  async fn test_fetch_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/manifest.json"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_raw("{\"name\":\"Gym Progress\"}", "application/json"),
      )
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/manifest.json", server.uri())).unwrap();
    let resp = network().fetch(&Request::get(url)).await.unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    assert_eq!(resp.body.as_ref(), b"{\"name\":\"Gym Progress\"}");
  }

  #[tokio::test]
  async fn test_fetch_forwards_headers_but_not_host() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/sessions"))
      .and(header("x-requested-with", "gym"))
      .respond_with(ResponseTemplate::new(201))
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/api/sessions", server.uri())).unwrap();
    let req = Request::get(url)
      .with_method("post")
      .with_header("Host", "proxy.local")
      .with_header("X-Requested-With", "gym")
      .with_body("{}");
    let resp = network().fetch(&req).await.unwrap();

    assert_eq!(resp.status, 201);
  }

  #[tokio::test]
  async fn test_redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(path("/logout"))
      .respond_with(ResponseTemplate::new(302).insert_header("location", "/"))
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/logout", server.uri())).unwrap();
    let resp = network().fetch(&Request::get(url)).await.unwrap();

    assert_eq!(resp.status, 302);
    assert_eq!(resp.header("location"), Some("/"));
  }

  #[tokio::test]
  async fn test_slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
      .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
      .mount(&server)
      .await;

    let net = HttpNetwork::new(Duration::from_millis(50)).unwrap();
    let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
    let err = net.fetch(&Request::get(url)).await.unwrap_err();

    assert_eq!(err, FetchError::Timeout(Duration::from_millis(50)));
  }

  #[tokio::test]
  async fn test_connection_refused_is_network_error() {
    // Port 9 (discard) is not expected to accept HTTP connections
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    let err = network().fetch(&Request::get(url)).await.unwrap_err();
    assert!(matches!(
      err,
      FetchError::Network(_) | FetchError::Timeout(_)
    ));
  }

  #[tokio::test]
  async fn test_unsupported_scheme_is_rejected() {
    let url = Url::parse("ftp://gym.example/file").unwrap();
    let err = network().fetch(&Request::get(url)).await.unwrap_err();
    assert_eq!(err, FetchError::UnsupportedScheme("ftp".to_string()));
  }
}
