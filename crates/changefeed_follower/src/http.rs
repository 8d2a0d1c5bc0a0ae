//! HTTP changes client.
//!
//! The actual HTTP library is abstracted via the [`HttpClient`] trait to
//! allow different implementations (reqwest, hyper, etc.). URL building,
//! authentication and TLS stay with that implementation; this module only
//! shapes the changes request and interprets the response status and body.

use crate::error::FetchError;
use crate::fetcher::ChangesClient;
use async_trait::async_trait;
use changefeed_protocol::{ChangesRequest, ChangesResponse};
use serde_json::Value;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST with a JSON body.
    Post,
}

/// A request for one database endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Target database.
    pub db: String,
    /// Endpoint below the database (e.g. `_changes`).
    pub endpoint: &'static str,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body bytes.
    pub body: Option<Vec<u8>>,
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Network
/// faults should be reported as [`FetchError::Connection`],
/// [`FetchError::Timeout`], [`FetchError::Dns`] or a tagged
/// [`FetchError::Transport`]; any status the server returned is answered
/// as an `HttpResponse`, not an error.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// Changes client that talks to the `_changes` endpoint over HTTP.
pub struct HttpChangesClient<H: HttpClient> {
    http: H,
}

impl<H: HttpClient> HttpChangesClient<H> {
    /// Creates a changes client over an HTTP client.
    pub fn new(http: H) -> Self {
        Self { http }
    }

    /// Returns the underlying HTTP client.
    pub fn http(&self) -> &H {
        &self.http
    }

    fn build_request(request: &ChangesRequest) -> Result<HttpRequest, FetchError> {
        let body = request.encode_body()?;
        Ok(HttpRequest {
            method: if body.is_some() {
                HttpMethod::Post
            } else {
                HttpMethod::Get
            },
            db: request.db.clone(),
            endpoint: "_changes",
            query: request.query_pairs(),
            body,
        })
    }
}

#[async_trait]
impl<H: HttpClient> ChangesClient for HttpChangesClient<H> {
    async fn fetch_changes(&self, request: &ChangesRequest) -> Result<ChangesResponse, FetchError> {
        let http_request = Self::build_request(request)?;
        let response = self.http.send(http_request).await?;

        if !response.is_success() {
            return Err(FetchError::http(
                response.status,
                error_reason(&response.body),
            ));
        }

        Ok(ChangesResponse::decode(&response.body)?)
    }
}

/// Extracts `error: reason` from a JSON error body, falling back to the raw text.
fn error_reason(body: &[u8]) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
        let error = map.get("error").and_then(Value::as_str);
        let reason = map.get("reason").and_then(Value::as_str);
        match (error, reason) {
            (Some(e), Some(r)) => return format!("{e}: {r}"),
            (Some(e), None) => return e.to_string(),
            (None, Some(r)) => return r.to_string(),
            (None, None) => {}
        }
    }
    String::from_utf8_lossy(body).trim().to_string()
}
