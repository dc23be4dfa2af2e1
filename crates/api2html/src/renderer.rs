// File: src/renderer.rs
// Purpose: The Renderer capability and its variants

use crate::error::{ConfigError, RenderError};
use handlebars::Handlebars;
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;

/// Turns a value into written output.
///
/// Instances are immutable. A hot reload publishes a new instance instead of
/// mutating the one a request may still be using.
pub trait Renderer: Send + Sync {
    fn render(&self, out: &mut dyn Write, value: &Value) -> Result<(), RenderError>;
}

/// Any matching closure is a renderer
impl<F> Renderer for F
where
    F: Fn(&mut dyn Write, &Value) -> Result<(), RenderError> + Send + Sync,
{
    fn render(&self, out: &mut dyn Write, value: &Value) -> Result<(), RenderError> {
        self(out, value)
    }
}

/// Render into an owned string
pub fn render_to_string(renderer: &dyn Renderer, value: &Value) -> Result<String, RenderError> {
    let mut buf = Vec::new();
    renderer.render(&mut buf, value)?;
    String::from_utf8(buf).map_err(|e| RenderError::Render(e.to_string()))
}

/// Renderer that always fails with the pinned error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRenderer(pub ConfigError);

impl Renderer for ErrorRenderer {
    fn render(&self, _out: &mut dyn Write, _value: &Value) -> Result<(), RenderError> {
        Err(RenderError::Config(self.0))
    }
}

/// Renderer handed out for names nobody registered
pub const EMPTY_RENDERER: ErrorRenderer = ErrorRenderer(ConfigError::NoRendererDefined);

/// Shared handle to the empty renderer
pub fn empty_renderer() -> Arc<dyn Renderer> {
    Arc::new(EMPTY_RENDERER)
}

/// Mustache-style template compiled with handlebars.
///
/// `{{a.b}}` is HTML-escaped, `{{{a.b}}}` is written raw, missing values
/// render as empty strings.
pub struct TemplateRenderer {
    name: String,
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    /// Compile `source`. Syntax errors are reported here, never at render time.
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self, RenderError> {
        let name = name.into();
        let mut registry = Handlebars::new();
        registry
            .register_template_string(&name, source)
            .map_err(|e| RenderError::Build {
                name: name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self { name, registry })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, out: &mut dyn Write, value: &Value) -> Result<(), RenderError> {
        self.registry.render_to_write(&self.name, value, out)?;
        Ok(())
    }
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
