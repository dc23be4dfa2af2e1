// File: src/error.rs
// Purpose: Error taxonomy shared by the store, the page pipeline and the engine

use axum::http::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Missing pieces of configuration, pinned into an `ErrorRenderer` or
/// answered with a fallback page at request time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no response generator defined")]
    NoResponseGeneratorDefined,

    #[error("no backend defined")]
    NoBackendDefined,

    #[error("no renderer defined")]
    NoRendererDefined,
}

/// Failure to build or run a renderer
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to build template '{name}': {message}")]
    Build { name: String, message: String },

    #[error("failed to read template source {path:?}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render failed: {0}")]
    Render(String),

    #[error("failed to write rendered output: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<handlebars::RenderError> for RenderError {
    fn from(err: handlebars::RenderError) -> Self {
        RenderError::Render(err.to_string())
    }
}

/// Failure reported by a backend call
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("backend answered with status {0}")]
    Status(StatusCode),

    #[error("backend did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("backend payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The backend payload does not have the shape the page expects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("expected a JSON array, got {0}")]
    ExpectedArray(&'static str),

    #[error("expected a JSON object, got {0}")]
    ExpectedObject(&'static str),
}

/// Request parameters that cannot build the backend call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("invalid request parameters: {0}")]
    Invalid(String),

    #[error("no value for backend URL parameter ':{0}'")]
    Unresolved(String),
}

/// Any failure of the per-request pipeline
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Params(#[from] ParamError),
}

impl PageError {
    /// Status code the fallback response is served with
    pub fn status(&self) -> StatusCode {
        match self {
            PageError::Config(ConfigError::NoBackendDefined) | PageError::Params(_) => {
                StatusCode::NOT_FOUND
            }
            PageError::Backend(BackendError::Status(status))
                if *status == StatusCode::NOT_FOUND =>
            {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failure to build an engine. No partial engine is ever returned.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load config: {0:#}")]
    Config(anyhow::Error),

    #[error("page '{page}': invalid cache_ttl '{value}': {reason}")]
    CacheTtl {
        page: String,
        value: String,
        reason: String,
    },

    #[error("page '{page}' uses unknown {kind} '{name}'")]
    UnknownTemplate {
        page: String,
        kind: &'static str,
        name: String,
    },

    #[error("page '{page}': route pattern '{pattern}' must start with '/'")]
    InvalidRoute { page: String, pattern: String },

    #[error("page '{page}': backend parameter ':{name}' is not part of the route pattern")]
    UnboundParam { page: String, name: String },

    #[error("route '{0}' is mounted more than once")]
    DuplicateRoute(String),

    #[error(transparent)]
    Template(#[from] RenderError),

    #[error("failed to start template watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("live reload requires a running Tokio runtime")]
    NoRuntime,
}
