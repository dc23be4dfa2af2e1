// File: src/backend.rs
// Purpose: Backend capability, URL resolution and the default HTTP backend

use crate::config::Page;
use crate::error::{BackendError, ParamError};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Inbound request headers forwarded to backends, lower-cased.
/// They are part of the cache fingerprint.
pub const FORWARDED_HEADERS: &[&str] = &["accept-language", "authorization", "cookie"];

/// A resolved backend call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendRequest {
    /// Backend URL with path params substituted and the query string appended
    pub url: String,
    /// Path and query params of the inbound request
    pub params: HashMap<String, String>,
    /// Forwarded inbound headers, lower-cased names
    pub headers: BTreeMap<String, String>,
}

/// What a backend answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: StatusCode,
    /// Response headers, lower-cased names
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl BackendResponse {
    /// 200 response with a body and no headers
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Fetches the data a page renders.
///
/// Transport, retries and pooling are the implementation's business. A
/// non-success status must be reported as [`BackendError::Status`].
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError>;
}

/// Builds the backend of a page; `None` leaves the page without one
pub trait BackendFactory: Send + Sync {
    fn backend_for(&self, page: &Page) -> Option<Arc<dyn Backend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(&Page) -> Option<Arc<dyn Backend>> + Send + Sync,
{
    fn backend_for(&self, page: &Page) -> Option<Arc<dyn Backend>> {
        self(page)
    }
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Names of the `:name` placeholders in `pattern`, in order of appearance.
/// Port numbers (`host:8080`) are not placeholders.
pub fn placeholders(pattern: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(pattern)
        .filter_map(|caps| caps.get(1).map(|name| name.as_str()))
        .collect()
}

/// Substitute `:name` placeholders in `pattern` with URL-encoded params and
/// append `query` (sorted by key) as the query string.
///
/// Every placeholder must have a param.
pub fn resolve_backend_url(
    pattern: &str,
    params: &HashMap<String, String>,
    query: &BTreeMap<String, String>,
) -> Result<String, ParamError> {
    let mut url = String::with_capacity(pattern.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(pattern) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = params
            .get(name.as_str())
            .ok_or_else(|| ParamError::Unresolved(name.as_str().to_string()))?;

        url.push_str(&pattern[last..whole.start()]);
        url.push_str(&urlencoding::encode(value));
        last = whole.end();
    }
    url.push_str(&pattern[last..]);

    if !query.is_empty() {
        let encoded: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&encoded.join("&"));
    }

    Ok(url)
}

/// Backend calling the resolved URL with a GET request
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let mut call = self.client.get(&request.url);
        for (name, value) in &request.headers {
            call = call.header(name, value);
        }

        let response = call
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        debug!(url = %request.url, status = %status, "backend answered");
        if !status.is_success() {
            return Err(BackendError::Status(status));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builds an [`HttpBackend`] sharing one client for every page with a backend pattern
#[derive(Debug, Clone)]
pub struct HttpBackendFactory {
    backend: Arc<HttpBackend>,
}

impl HttpBackendFactory {
    pub fn new(backend: HttpBackend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }
}

impl BackendFactory for HttpBackendFactory {
    fn backend_for(&self, page: &Page) -> Option<Arc<dyn Backend>> {
        if page.backend_url_pattern.is_empty() {
            None
        } else {
            Some(self.backend.clone())
        }
    }
}
