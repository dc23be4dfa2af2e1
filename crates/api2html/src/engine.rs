// File: src/engine.rs
// Purpose: Build the route table of a config: pages, static files, fallback

use crate::backend::{placeholders, BackendFactory, HttpBackend, HttpBackendFactory};
use crate::config::{Config, ConfigParser, FileConfigParser, Page};
use crate::error::{EngineError, PageError, ParamError};
use crate::hot_reload::ReloadHandle;
use crate::page::{render_fallback, ErrorPages, PageCache, PageHandler, PageRequest, PageResponse};
use crate::template_store::TemplateStore;
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path as AxumPath, Query, State,
    },
    http::{HeaderMap, StatusCode},
    routing::{any, get, MethodRouter},
    Router,
};
use serde_json::Map;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Engine-wide settings that are not part of the route table
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory holding static txt files, robots.txt, sitemap.xml and the
    /// default `404`/`500` bodies
    pub static_dir: PathBuf,
    /// Poll interval of the template watcher
    pub reload_interval: Duration,
    /// Upper bound for one backend call
    pub backend_timeout: Duration,
    /// Overrides the bodies read from `static_dir`
    pub error_pages: Option<ErrorPages>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("./static"),
            reload_interval: Duration::from_secs(1),
            backend_timeout: Duration::from_secs(10),
            error_pages: None,
        }
    }
}

/// Builds [`Engine`]s from config files.
///
/// The config parser and the backend factory are injectable; the defaults
/// read JSON/TOML files and call backends over HTTP.
#[derive(Clone)]
pub struct EngineFactory {
    parser: Arc<dyn ConfigParser>,
    backend_factory: Arc<dyn BackendFactory>,
    options: EngineOptions,
}

impl Default for EngineFactory {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl EngineFactory {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            parser: Arc::new(FileConfigParser),
            backend_factory: Arc::new(HttpBackendFactory::new(HttpBackend::new(
                reqwest::Client::new(),
            ))),
            options,
        }
    }

    pub fn with_parser(mut self, parser: impl ConfigParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn with_backend_factory(mut self, factory: impl BackendFactory + 'static) -> Self {
        self.backend_factory = Arc::new(factory);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Parse `config_path` and build its engine.
    ///
    /// With `live_reload` the template and layout files are watched; this
    /// needs a running Tokio runtime. Any failure aborts the whole build.
    pub fn build(
        &self,
        config_path: impl AsRef<Path>,
        live_reload: bool,
    ) -> Result<Engine, EngineError> {
        let config_path = config_path.as_ref();
        let config = self
            .parser
            .parse(config_path)
            .map_err(EngineError::Config)?;
        info!("Loaded {} page(s) from {:?}", config.pages.len(), config_path);

        self.build_from(config, live_reload)
    }

    /// Build the engine of an already parsed config
    pub fn build_from(&self, config: Config, live_reload: bool) -> Result<Engine, EngineError> {
        let templates = Arc::new(load_store("template", &config.templates)?);
        let layouts = Arc::new(load_store("layout", &config.layouts)?);

        // everything is validated before a single route is mounted
        let mut pages = Vec::with_capacity(config.pages.len());
        for page in &config.pages {
            pages.push((page.clone(), validate_page(page, &templates, &layouts)?));
        }

        let error_pages = Arc::new(
            self.options
                .error_pages
                .clone()
                .unwrap_or_else(|| ErrorPages::from_dir(&self.options.static_dir)),
        );
        let cache = Arc::new(PageCache::new());
        let fallback: MethodRouter = any(not_found).with_state(Fallback {
            templates: templates.clone(),
            error_pages: error_pages.clone(),
        });

        let mut mounted = HashSet::new();
        let mut router = Router::new();

        for (page, ttl) in pages {
            let pattern = page.url_pattern.clone();
            claim(&mut mounted, &pattern)?;

            let backend = self.backend_factory.backend_for(&page);
            let handler = PageHandler::new(
                page,
                ttl,
                &config.extra,
                backend,
                templates.clone(),
                layouts.clone(),
                cache.clone(),
                error_pages.clone(),
                self.options.backend_timeout,
            );
            debug!("Mounted {:?}", handler);
            router = router.route(&pattern, get(serve_page).with_state(Arc::new(handler)));
        }

        let static_dir = &self.options.static_dir;
        let mut files: Vec<String> = config
            .static_txt_content
            .iter()
            .map(|name| name.trim_start_matches('/').to_string())
            .collect();
        if config.robots {
            files.push("robots.txt".to_string());
        }
        if config.sitemap {
            files.push("sitemap.xml".to_string());
        }
        for name in files {
            let route = format!("/{}", name);
            claim(&mut mounted, &route)?;

            let path = static_dir.join(&name);
            if !path.exists() {
                warn!("Static file does not exist: {:?}", path);
            }
            router = router.route_service(&route, ServeFile::new(path));
            info!("Serving static file {}", route);
        }

        router = match &config.public_folder {
            Some(folder) => {
                let prefix = folder.prefix.trim_end_matches('/');
                let serve_dir = ServeDir::new(&folder.path);
                info!("Serving {:?} under '{}/'", folder.path, prefix);
                if prefix.is_empty() {
                    router.fallback_service(serve_dir.fallback(fallback))
                } else {
                    let prefix = if prefix.starts_with('/') {
                        prefix.to_string()
                    } else {
                        format!("/{}", prefix)
                    };
                    claim(&mut mounted, &prefix)?;
                    router
                        .nest_service(&prefix, serve_dir.not_found_service(fallback.clone()))
                        .fallback_service(fallback)
                }
            }
            None => router.fallback_service(fallback),
        };

        let reloaders = if live_reload {
            vec![
                ReloadHandle::spawn(templates.clone(), self.options.reload_interval)?,
                ReloadHandle::spawn(layouts.clone(), self.options.reload_interval)?,
            ]
        } else {
            Vec::new()
        };

        Ok(Engine {
            router: router.layer(TraceLayer::new_for_http()),
            templates,
            layouts,
            cache,
            reloaders,
        })
    }
}

impl std::fmt::Debug for EngineFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineFactory")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A built route table together with the state it serves from.
///
/// Template watchers live as long as the engine; dropping it stops them.
pub struct Engine {
    router: Router,
    templates: Arc<TemplateStore>,
    layouts: Arc<TemplateStore>,
    cache: Arc<PageCache>,
    reloaders: Vec<ReloadHandle>,
}

impl Engine {
    /// The axum router serving every mounted route
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    pub fn layouts(&self) -> &Arc<TemplateStore> {
        &self.layouts
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn is_live_reloading(&self) -> bool {
        self.reloaders.iter().any(ReloadHandle::is_running)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("templates", &self.templates.names())
            .field("layouts", &self.layouts.names())
            .field("live_reload", &!self.reloaders.is_empty())
            .finish_non_exhaustive()
    }
}

fn load_store(
    kind: &'static str,
    sources: &BTreeMap<String, PathBuf>,
) -> Result<TemplateStore, EngineError> {
    let store = TemplateStore::new(kind);
    for (name, path) in sources {
        store.register(name.clone(), path.clone())?;
    }
    Ok(store)
}

/// Check one page against the loaded stores, returning its parsed TTL
fn validate_page(
    page: &Page,
    templates: &TemplateStore,
    layouts: &TemplateStore,
) -> Result<Duration, EngineError> {
    if !page.url_pattern.starts_with('/') {
        return Err(EngineError::InvalidRoute {
            page: page.label().to_string(),
            pattern: page.url_pattern.clone(),
        });
    }

    // every backend placeholder must be filled by a route parameter
    let route_params: HashSet<&str> = page
        .url_pattern
        .split('/')
        .filter_map(|segment| segment.strip_prefix(':').or_else(|| segment.strip_prefix('*')))
        .collect();
    if let Some(name) = placeholders(&page.backend_url_pattern)
        .into_iter()
        .find(|name| !route_params.contains(name))
    {
        return Err(EngineError::UnboundParam {
            page: page.label().to_string(),
            name: name.to_string(),
        });
    }

    let ttl = page.cache_ttl().map_err(|e| EngineError::CacheTtl {
        page: page.label().to_string(),
        value: page.cache_ttl.clone(),
        reason: e.to_string(),
    })?;

    // an empty template is answered at request time
    if !page.template.is_empty() && !templates.contains(&page.template) {
        return Err(EngineError::UnknownTemplate {
            page: page.label().to_string(),
            kind: "template",
            name: page.template.clone(),
        });
    }
    if !page.layout.is_empty() && !layouts.contains(&page.layout) {
        return Err(EngineError::UnknownTemplate {
            page: page.label().to_string(),
            kind: "layout",
            name: page.layout.clone(),
        });
    }

    Ok(ttl)
}

fn claim(mounted: &mut HashSet<String>, route: &str) -> Result<(), EngineError> {
    if mounted.insert(route.to_string()) {
        Ok(())
    } else {
        Err(EngineError::DuplicateRoute(route.to_string()))
    }
}

async fn serve_page(
    State(handler): State<Arc<PageHandler>>,
    params: Result<AxumPath<HashMap<String, String>>, PathRejection>,
    query: Result<Query<BTreeMap<String, String>>, QueryRejection>,
    headers: HeaderMap,
) -> PageResponse {
    let params = match params {
        Ok(AxumPath(params)) => params,
        // routes without parameters
        Err(PathRejection::MissingPathParams(_)) => HashMap::new(),
        Err(rejection) => {
            let error: PageError = ParamError::Invalid(rejection.body_text()).into();
            return handler.fallback(&error, &HashMap::new());
        }
    };
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            let error: PageError = ParamError::Invalid(rejection.body_text()).into();
            return handler.fallback(&error, &params);
        }
    };

    let request = PageRequest {
        params,
        query,
        headers: PageRequest::forwarded_headers(&headers),
    };
    handler.handle(request).await
}

#[derive(Clone)]
struct Fallback {
    templates: Arc<TemplateStore>,
    error_pages: Arc<ErrorPages>,
}

async fn not_found(State(fallback): State<Fallback>) -> PageResponse {
    let body = render_fallback(
        &fallback.templates,
        &fallback.error_pages,
        StatusCode::NOT_FOUND,
        "no route matched",
        Map::new(),
    );
    PageResponse {
        status: StatusCode::NOT_FOUND,
        body,
        cache_ttl: None,
    }
}
