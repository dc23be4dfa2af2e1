// File: src/template_store.rs
// Purpose: Named registry of live-reloadable renderers

use crate::error::RenderError;
use crate::renderer::{empty_renderer, Renderer, TemplateRenderer};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where a renderer is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Template file, re-read on reload
    File(PathBuf),
    /// Fixed template text, never reloaded
    Inline(String),
}

impl TemplateSource {
    fn read(&self) -> Result<String, RenderError> {
        match self {
            TemplateSource::File(path) => {
                fs::read_to_string(path).map_err(|source| RenderError::Source {
                    path: path.clone(),
                    source,
                })
            }
            TemplateSource::Inline(content) => Ok(content.clone()),
        }
    }
}

impl From<PathBuf> for TemplateSource {
    fn from(path: PathBuf) -> Self {
        TemplateSource::File(path)
    }
}

impl From<&Path> for TemplateSource {
    fn from(path: &Path) -> Self {
        TemplateSource::File(path.to_path_buf())
    }
}

/// One published version of a named renderer
struct Entry {
    source: TemplateSource,
    /// Canonical file path, used to match watcher events
    watched_path: Option<PathBuf>,
    /// Content the renderer was built from
    content: String,
    renderer: Arc<dyn Renderer>,
    version: u64,
}

/// Receives every future renderer published under one name.
///
/// The channel holds a single slot: a subscriber that falls behind skips
/// intermediate versions but always ends on the latest one, and never sees an
/// older version after a newer one. Dropping the subscription ends delivery.
pub struct Subscription {
    name: String,
    rx: watch::Receiver<Arc<dyn Renderer>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest renderer, without waiting
    pub fn current(&self) -> Arc<dyn Renderer> {
        self.rx.borrow().clone()
    }

    /// Wait for the next version. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Arc<dyn Renderer>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("name", &self.name).finish()
    }
}

/// Registry of named renderers.
///
/// Reads take a snapshot of the registry and never wait for a writer.
/// Writers (registration and reloads) are serialized and publish a fully built
/// renderer by swapping in a new map. A render in progress keeps using the
/// renderer it obtained.
pub struct TemplateStore {
    kind: &'static str,
    entries: ArcSwap<HashMap<String, Arc<Entry>>>,
    write_lock: Mutex<()>,
    subscribers: Mutex<HashMap<String, watch::Sender<Arc<dyn Renderer>>>>,
}

impl TemplateStore {
    /// Create an empty store. `kind` only labels log lines ("template", "layout").
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register `name` and build its renderer now.
    ///
    /// A build failure is returned to the caller and nothing is registered.
    pub fn register(
        &self,
        name: impl Into<String>,
        source: impl Into<TemplateSource>,
    ) -> Result<(), RenderError> {
        let name = name.into();
        let source = source.into();
        let _guard = self.lock_writes();

        let content = source.read()?;
        let renderer = TemplateRenderer::compile(&name, &content)?;
        let watched_path = match &source {
            TemplateSource::File(path) => {
                Some(fs::canonicalize(path).unwrap_or_else(|_| path.clone()))
            }
            TemplateSource::Inline(_) => None,
        };

        info!("Registered {} '{}' ({:?})", self.kind, name, source);
        self.publish(
            name,
            Entry {
                source,
                watched_path,
                content,
                renderer: Arc::new(renderer),
                version: 0,
            },
        );

        Ok(())
    }

    /// Current renderer for `name`, or the empty renderer if none is registered
    pub fn get(&self, name: &str) -> Arc<dyn Renderer> {
        self.entries
            .load()
            .get(name)
            .map(|entry| entry.renderer.clone())
            .unwrap_or_else(empty_renderer)
    }

    /// Whether `name` has been registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.load().contains_key(name)
    }

    /// Number of times `name` has been (re)built, starting at 1
    pub fn version(&self, name: &str) -> Option<u64> {
        self.entries.load().get(name).map(|entry| entry.version)
    }

    /// Subscribe to future versions of `name`.
    ///
    /// Unregistered names are allowed: the subscription starts on the empty
    /// renderer and receives the first real one when it is registered.
    pub fn subscribe(&self, name: &str) -> Subscription {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|_, tx| tx.receiver_count() > 0);
        let tx = subscribers
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(self.get(name)).0);

        Subscription {
            name: name.to_string(),
            rx: tx.subscribe(),
        }
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Names whose file source is `path`
    pub fn names_for_path(&self, path: &Path) -> Vec<String> {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.entries
            .load()
            .iter()
            .filter(|(_, entry)| entry.watched_path.as_deref() == Some(path.as_path()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Directories holding file sources, for the watcher
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .entries
            .load()
            .values()
            .filter_map(|entry| entry.watched_path.as_deref()?.parent().map(Path::to_path_buf))
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Rebuild `name` if its source changed since the last successful build.
    ///
    /// Returns `Ok(true)` when a new renderer was published. On a failed build
    /// the previous renderer stays live and the error is returned.
    pub fn reload(&self, name: &str) -> Result<bool, RenderError> {
        let _guard = self.lock_writes();

        let Some(entry) = self.entries.load().get(name).cloned() else {
            return Ok(false);
        };
        if matches!(entry.source, TemplateSource::Inline(_)) {
            return Ok(false);
        }

        let content = entry.source.read()?;
        if content == entry.content {
            return Ok(false);
        }

        let renderer = TemplateRenderer::compile(name, &content)?;
        self.publish(
            name.to_string(),
            Entry {
                source: entry.source.clone(),
                watched_path: entry.watched_path.clone(),
                content,
                renderer: Arc::new(renderer),
                version: 0,
            },
        );
        info!(
            "Reloaded {} '{}' (version {})",
            self.kind,
            name,
            entry.version + 1
        );

        Ok(true)
    }

    /// Reload every file-backed renderer, logging failures. Returns how many changed.
    pub fn reload_all(&self) -> usize {
        let mut reloaded = 0;
        for name in self.names() {
            match self.reload(&name) {
                Ok(true) => reloaded += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    "Keeping previous {} '{}', reload failed: {}",
                    self.kind, name, e
                ),
            }
        }
        reloaded
    }

    /// Swap in a map holding `entry` and notify subscribers. Caller holds the write lock.
    fn publish(&self, name: String, mut entry: Entry) {
        let current = self.entries.load_full();
        entry.version = current.get(&name).map_or(1, |previous| previous.version + 1);
        let renderer = entry.renderer.clone();

        let mut next = HashMap::clone(&current);
        next.insert(name.clone(), Arc::new(entry));
        self.entries.store(Arc::new(next));

        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|_, tx| tx.receiver_count() > 0);
        if let Some(tx) = subscribers.get(&name) {
            tx.send_replace(renderer);
            debug!("Notified subscribers of {} '{}'", self.kind, name);
        }
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        lock(&self.write_lock)
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new("template")
    }
}

impl std::fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateStore")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::renderer::render_to_string;
    use serde_json::json;
    use std::time::Duration;

    fn render(store: &TemplateStore, name: &str) -> Result<String, RenderError> {
        render_to_string(store.get(name).as_ref(), &json!({"who": "world"}))
    }

    #[test]
    fn test_register_and_get() {
        let store = TemplateStore::default();
        store
            .register("hello", TemplateSource::Inline("hello {{who}}".into()))
            .unwrap();

        assert_eq!(render(&store, "hello").unwrap(), "hello world");
        assert_eq!(store.version("hello"), Some(1));
        assert_eq!(store.names(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_dropped_subscriptions_are_released() {
        let store = TemplateStore::default();
        let first = store.subscribe("never-registered");
        let second = store.subscribe("also-missing");
        assert_eq!(lock(&store.subscribers).len(), 2);

        drop(first);
        drop(second);
        let _kept = store.subscribe("kept");
        let subscribers = lock(&store.subscribers);
        assert_eq!(subscribers.len(), 1);
        assert!(subscribers.contains_key("kept"));
    }

    #[test]
    fn test_unknown_name_gets_empty_renderer() {
        let store = TemplateStore::default();
        let err = render(&store, "nope").unwrap_err();
        assert!(matches!(
            err,
            RenderError::Config(ConfigError::NoRendererDefined)
        ));
        assert!(!store.contains("nope"));
    }

    #[test]
    fn test_register_fails_on_broken_template() {
        let store = TemplateStore::default();
        let result = store.register("bad", TemplateSource::Inline("{{#each}}".into()));
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_register_fails_on_missing_file() {
        let store = TemplateStore::default();
        let err = store
            .register("missing", PathBuf::from("/definitely/not/here.hbs"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Source { .. }));
    }

    #[test]
    fn test_reload_picks_up_new_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.hbs");
        fs::write(&path, "v1 {{who}}").unwrap();

        let store = TemplateStore::default();
        store.register("page", path.clone()).unwrap();
        let before = store.get("page");

        assert!(!store.reload("page").unwrap());

        fs::write(&path, "v2 {{who}}").unwrap();
        assert!(store.reload("page").unwrap());
        assert_eq!(render(&store, "page").unwrap(), "v2 world");
        assert_eq!(store.version("page"), Some(2));

        // a renderer obtained earlier keeps rendering the old version
        assert_eq!(
            render_to_string(before.as_ref(), &json!({"who": "world"})).unwrap(),
            "v1 world"
        );
    }

    #[test]
    fn test_broken_reload_keeps_last_good_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.hbs");
        fs::write(&path, "good {{who}}").unwrap();

        let store = TemplateStore::default();
        store.register("page", path.clone()).unwrap();

        fs::write(&path, "{{#if who}}never closed").unwrap();
        assert!(store.reload("page").is_err());
        assert_eq!(store.reload_all(), 0);
        assert_eq!(render(&store, "page").unwrap(), "good world");

        fs::remove_file(&path).unwrap();
        assert!(matches!(store.reload("page"), Err(RenderError::Source { .. })));
        assert_eq!(render(&store, "page").unwrap(), "good world");
        assert_eq!(store.version("page"), Some(1));
    }

    #[test]
    fn test_names_for_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.hbs");
        fs::write(&path, "x").unwrap();

        let store = TemplateStore::default();
        store.register("a", path.clone()).unwrap();
        store.register("b", path.clone()).unwrap();
        store.register("c", TemplateSource::Inline("x".into())).unwrap();

        let mut names = store.names_for_path(&path);
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.watched_dirs().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_receives_new_versions() {
        let store = TemplateStore::default();
        store
            .register("page", TemplateSource::Inline("one".into()))
            .unwrap();

        let mut sub = store.subscribe("page");
        assert_eq!(sub.name(), "page");

        store
            .register("page", TemplateSource::Inline("two".into()))
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(render_to_string(next.as_ref(), &json!({})).unwrap(), "two");
    }

    #[tokio::test]
    async fn test_slow_subscriber_sees_latest_only() {
        let store = TemplateStore::default();
        let mut sub = store.subscribe("page");

        for body in ["one", "two", "three"] {
            store
                .register("page", TemplateSource::Inline(body.into()))
                .unwrap();
        }

        let latest = sub.next().await.unwrap();
        assert_eq!(render_to_string(latest.as_ref(), &json!({})).unwrap(), "three");

        // nothing newer is pending
        let pending = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_subscription_ends_with_store() {
        let store = TemplateStore::default();
        let mut sub = store.subscribe("page");
        assert!(matches!(
            render_to_string(sub.current().as_ref(), &json!({})),
            Err(RenderError::Config(ConfigError::NoRendererDefined))
        ));

        drop(store);
        assert!(sub.next().await.is_none());
    }
}
