//! In-memory network used by the worker tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::network::Network;
use super::types::{FetchError, Request, Response};

#[derive(Clone)]
enum Reply {
  Respond(Response),
  Fail,
  Hang,
}

/// Network fake keyed by request path. Unknown paths fail like an unreachable
/// host. Every fetch is recorded.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Reply>>,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    self.set(path, Reply::Respond(Response::text(status, body)));
  }

  pub fn respond_with_headers(&self, path: &str, status: u16, headers: &[(&str, &str)], body: &str) {
    let mut response = Response::text(status, body);
    response
      .headers
      .extend(headers.iter().map(|(n, v)| (n.to_string(), v.to_string())));
    self.set(path, Reply::Respond(response));
  }

  pub fn fail(&self, path: &str) {
    self.set(path, Reply::Fail);
  }

  pub fn hang(&self, path: &str) {
    self.set(path, Reply::Hang);
  }

  fn set(&self, path: &str, reply: Reply) {
    self.routes.lock().unwrap().insert(path.to_string(), reply);
  }

  /// Total number of fetches seen.
  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  /// Number of fetches seen for one path.
  pub fn calls_for(&self, path: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let path = request.path().to_string();
    self.calls.lock().unwrap().push(path.clone());

    let reply = self.routes.lock().unwrap().get(&path).cloned();
    match reply {
      Some(Reply::Respond(response)) => Ok(response),
      Some(Reply::Hang) => std::future::pending().await,
      Some(Reply::Fail) | None => Err(FetchError::Network(format!(
        "connection refused: {}",
        request.url
      ))),
    }
  }
}
