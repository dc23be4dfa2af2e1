// api2html - API to HTML gateway
// Turns JSON backend responses into HTML pages from a declarative route table

//! Each configured page binds a URL pattern to a backend URL and a template.
//! A request resolves the backend call, consults the response cache, renders
//! the payload through the page template (and layout), and answers with a
//! fallback page when anything goes wrong.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! let engine = api2html::new("config.json", true)?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, engine.router()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod hot_reload;
pub mod page;
pub mod renderer;
pub mod template_store;

use std::path::Path;

// Re-export core types
pub use backend::{
    Backend, BackendFactory, BackendRequest, BackendResponse, HttpBackend, HttpBackendFactory,
};
pub use config::{Config, ConfigParser, FileConfigParser, Page, PublicFolder};
pub use engine::{Engine, EngineFactory, EngineOptions};
pub use error::{
    BackendError, ConfigError, EngineError, PageError, ParamError, RenderError, ShapeError,
};
pub use hot_reload::ReloadHandle;
pub use page::{ErrorPages, PageHandler, PageRequest, PageResponse};
pub use renderer::{ErrorRenderer, Renderer, TemplateRenderer};
pub use template_store::{Subscription, TemplateSource, TemplateStore};

// Re-export the cache crate
pub use api2html_cache::{Fingerprint, ResponseCache};

/// Build an engine for `config_path` with the default factory
pub fn new(config_path: impl AsRef<Path>, live_reload: bool) -> Result<Engine, EngineError> {
    EngineFactory::default().build(config_path, live_reload)
}
