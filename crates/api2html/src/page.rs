// File: src/page.rs
// Purpose: Per-route request pipeline: backend call, response cache, render, fallback

use crate::backend::{
    resolve_backend_url, Backend, BackendRequest, BackendResponse, FORWARDED_HEADERS,
};
use crate::config::Page;
use crate::error::{BackendError, ConfigError, PageError, ShapeError};
use crate::renderer::{render_to_string, Renderer};
use crate::template_store::TemplateStore;
use api2html_cache::{Fingerprint, ResponseCache};
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Template name looked up for not-found fallbacks
pub const NOT_FOUND_TEMPLATE: &str = "404";
/// Template name looked up for every other fallback
pub const SERVER_ERROR_TEMPLATE: &str = "500";

pub const DEFAULT_NOT_FOUND_BODY: &str = concat!(
    "<!DOCTYPE html>\n<html>\n<head><title>Page Not Found</title></head>\n",
    "<body>\n  <h1>404 Page Not Found</h1>\n</body>\n</html>\n",
);
pub const DEFAULT_SERVER_ERROR_BODY: &str = concat!(
    "<!DOCTYPE html>\n<html>\n<head><title>Internal Server Error</title></head>\n",
    "<body>\n  <h1>500 Internal Server Error</h1>\n</body>\n</html>\n",
);

/// Response cache shared by the pages of one engine
pub type PageCache = ResponseCache<BackendResponse>;

/// Content served when no error template is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPages {
    pub not_found: Bytes,
    pub server_error: Bytes,
}

impl ErrorPages {
    pub fn body_for(&self, status: StatusCode) -> Bytes {
        if status == StatusCode::NOT_FOUND {
            self.not_found.clone()
        } else {
            self.server_error.clone()
        }
    }
}

impl ErrorPages {
    /// Read `404` and `500` from `dir`, keeping the built-in body for a
    /// missing file
    pub fn from_dir(dir: &Path) -> Self {
        let defaults = Self::default();
        let read = |name: &str, default: Bytes| match fs::read(dir.join(name)) {
            Ok(content) => {
                debug!("Using {:?} as the {} page", dir.join(name), name);
                Bytes::from(content)
            }
            Err(_) => default,
        };

        Self {
            not_found: read("404", defaults.not_found),
            server_error: read("500", defaults.server_error),
        }
    }
}

impl Default for ErrorPages {
    fn default() -> Self {
        Self {
            not_found: Bytes::from_static(DEFAULT_NOT_FOUND_BODY.as_bytes()),
            server_error: Bytes::from_static(DEFAULT_SERVER_ERROR_BODY.as_bytes()),
        }
    }
}

/// The parts of an inbound request a page uses
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Path params extracted by the router
    pub params: HashMap<String, String>,
    pub query: BTreeMap<String, String>,
    /// Forwarded headers only, lower-cased names
    pub headers: BTreeMap<String, String>,
}

impl PageRequest {
    /// Keep the [`FORWARDED_HEADERS`] of an inbound header map
    pub fn forwarded_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
        FORWARDED_HEADERS
            .iter()
            .filter_map(|name| {
                let value = headers.get(*name)?.to_str().ok()?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Path params overlaid on query params
    pub fn all_params(&self) -> HashMap<String, String> {
        let mut all: HashMap<String, String> = self.query.clone().into_iter().collect();
        all.extend(self.params.clone());
        all
    }
}

/// A rendered page, ready to be written to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub cache_ttl: Option<Duration>,
}

impl IntoResponse for PageResponse {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            self.body,
        )
            .into_response();

        if let Some(ttl) = self.cache_ttl {
            // max-age has whole-second precision, round partial seconds up
            let max_age = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", max_age)) {
                response.headers_mut().insert(header::CACHE_CONTROL, value);
            }
        }

        response
    }
}

/// Where a page gets its data from, decided when the handler is built
enum DataSource {
    /// No backend pattern: render from `Extra` and `Params` only
    Static,
    Backend(Arc<dyn Backend>),
    /// A backend pattern without a backend to call
    Missing,
}

/// Request pipeline of one [`Page`].
///
/// Holds handles to the engine's template and layout stores and asks them for
/// the current renderer on every request, so a hot reload is picked up by the
/// next request while in-flight renders finish on the version they started with.
pub struct PageHandler {
    page: Page,
    extra: Map<String, Value>,
    cache_ttl: Duration,
    source: DataSource,
    templates: Arc<TemplateStore>,
    layouts: Arc<TemplateStore>,
    cache: Arc<PageCache>,
    error_pages: Arc<ErrorPages>,
    backend_timeout: Duration,
}

impl PageHandler {
    /// Build the handler of `page`.
    ///
    /// `global_extra` is overlaid by the page's own `extra`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        page: Page,
        cache_ttl: Duration,
        global_extra: &Map<String, Value>,
        backend: Option<Arc<dyn Backend>>,
        templates: Arc<TemplateStore>,
        layouts: Arc<TemplateStore>,
        cache: Arc<PageCache>,
        error_pages: Arc<ErrorPages>,
        backend_timeout: Duration,
    ) -> Self {
        let mut extra = global_extra.clone();
        extra.extend(page.extra.clone());

        let source = match (page.backend_url_pattern.is_empty(), backend) {
            (true, _) => DataSource::Static,
            (false, Some(backend)) => DataSource::Backend(backend),
            (false, None) => DataSource::Missing,
        };

        Self {
            page,
            extra,
            cache_ttl,
            source,
            templates,
            layouts,
            cache,
            error_pages,
            backend_timeout,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Serve one request. Never fails: errors become a fallback page.
    pub async fn handle(&self, request: PageRequest) -> PageResponse {
        let params = request.all_params();

        match self.render_page(&request, &params).await {
            Ok(body) => {
                debug!(page = %self.page.label(), "rendered page");
                PageResponse {
                    status: StatusCode::OK,
                    body: body.into(),
                    cache_ttl: (!self.cache_ttl.is_zero()).then_some(self.cache_ttl),
                }
            }
            Err(e) => self.fallback(&e, &params),
        }
    }

    /// Fallback page for `error`, rendered with the page context
    pub fn fallback(&self, error: &PageError, params: &HashMap<String, String>) -> PageResponse {
        let status = error.status();
        warn!(page = %self.page.label(), status = %status, "serving fallback: {}", error);
        PageResponse {
            status,
            body: render_fallback(
                &self.templates,
                &self.error_pages,
                status,
                &error.to_string(),
                self.base_context(params),
            ),
            cache_ttl: None,
        }
    }

    async fn render_page(
        &self,
        request: &PageRequest,
        params: &HashMap<String, String>,
    ) -> Result<Vec<u8>, PageError> {
        if self.page.template.is_empty() {
            return Err(ConfigError::NoResponseGeneratorDefined.into());
        }

        let data = match &self.source {
            DataSource::Static => None,
            DataSource::Missing => return Err(ConfigError::NoBackendDefined.into()),
            DataSource::Backend(backend) => {
                let backend_request = BackendRequest {
                    url: resolve_backend_url(
                        &self.page.backend_url_pattern,
                        &request.params,
                        &request.query,
                    )?,
                    params: params.clone(),
                    headers: request.headers.clone(),
                };
                Some(self.fetch(backend.as_ref(), &backend_request).await?)
            }
        };

        let mut context = self.base_context(params);
        if let Some(response) = data {
            let (key, value) = self.shape(&response)?;
            context.insert(key.to_string(), value);
        } else {
            context.insert("Data".to_string(), Value::Object(Map::new()));
        }
        let context = Value::Object(context);

        let template = self.templates.get(&self.page.template);
        let mut out = Vec::new();
        template.render(&mut out, &context)?;

        if self.page.layout.is_empty() {
            return Ok(out);
        }

        let content = String::from_utf8_lossy(&out).into_owned();
        let mut layout_context = self.base_context(params);
        layout_context.insert("content".to_string(), Value::String(content));

        let layout = self.layouts.get(&self.page.layout);
        let mut wrapped = Vec::new();
        layout.render(&mut wrapped, &Value::Object(layout_context))?;
        Ok(wrapped)
    }

    /// Cached response for `request`, or a fresh one stored under the page TTL
    async fn fetch(
        &self,
        backend: &dyn Backend,
        request: &BackendRequest,
    ) -> Result<BackendResponse, BackendError> {
        let key = Fingerprint::new(&request.url, &request.headers);
        if let Some(cached) = self.cache.lookup(&key).await {
            debug!(url = %request.url, "backend response served from cache");
            return Ok(cached);
        }

        let response = tokio::time::timeout(self.backend_timeout, backend.fetch(request))
            .await
            .map_err(|_| BackendError::Timeout(self.backend_timeout))??;
        if !response.status.is_success() {
            return Err(BackendError::Status(response.status));
        }

        self.cache
            .store(key, response.clone(), self.cache_ttl)
            .await;
        Ok(response)
    }

    /// Decode the payload as `Array` or `Data` depending on the page and the response
    fn shape(&self, response: &BackendResponse) -> Result<(&'static str, Value), PageError> {
        let payload: Value = serde_json::from_slice(&response.body).map_err(BackendError::from)?;

        if self.is_collection(response) {
            match payload {
                Value::Array(_) => Ok(("Array", payload)),
                other => Err(ShapeError::ExpectedArray(kind_of(&other)).into()),
            }
        } else {
            match payload {
                Value::Object(_) => Ok(("Data", payload)),
                other => Err(ShapeError::ExpectedObject(kind_of(&other)).into()),
            }
        }
    }

    /// `is_array`, or the configured header saying `array`/`true`/`1`
    fn is_collection(&self, response: &BackendResponse) -> bool {
        if self.page.is_array {
            return true;
        }
        if self.page.header.is_empty() {
            return false;
        }
        response
            .header(&self.page.header)
            .map(|value| {
                let value = value.trim();
                value.eq_ignore_ascii_case("array")
                    || value.eq_ignore_ascii_case("true")
                    || value == "1"
            })
            .unwrap_or(false)
    }

    fn base_context(&self, params: &HashMap<String, String>) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("Extra".to_string(), Value::Object(self.extra.clone()));
        context.insert("Params".to_string(), json!(params));
        context
    }

}

/// Body of a fallback page: the `"404"`/`"500"` template if one is registered
/// and renders, else the static error content
pub fn render_fallback(
    templates: &TemplateStore,
    error_pages: &ErrorPages,
    status: StatusCode,
    message: &str,
    mut context: Map<String, Value>,
) -> Bytes {
    let name = if status == StatusCode::NOT_FOUND {
        NOT_FOUND_TEMPLATE
    } else {
        SERVER_ERROR_TEMPLATE
    };

    if templates.contains(name) {
        context.insert(
            "Error".to_string(),
            json!({"status": status.as_u16(), "message": message}),
        );

        let renderer: Arc<dyn Renderer> = templates.get(name);
        match render_to_string(renderer.as_ref(), &Value::Object(context)) {
            Ok(body) => return body.into(),
            Err(e) => warn!("Error template '{}' failed: {}", name, e),
        }
    }

    error_pages.body_for(status)
}

impl std::fmt::Debug for PageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandler")
            .field("page", &self.page.label())
            .field("template", &self.page.template)
            .field("layout", &self.page.layout)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
