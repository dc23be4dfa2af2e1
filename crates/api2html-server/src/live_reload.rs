use api2html::{Engine, TemplateStore};
use tokio::task::JoinHandle;
use tower_livereload::Reloader;
use tracing::{debug, info};

/// Trigger a browser reload whenever a template or layout of `engine` is
/// rebuilt. The returned tasks end when the engine's stores are dropped.
pub fn forward_reloads(engine: &Engine, reloader: Reloader) -> Vec<JoinHandle<()>> {
    let mut tasks = subscribe_all(engine.templates(), &reloader);
    tasks.extend(subscribe_all(engine.layouts(), &reloader));
    info!("Browser live reload enabled for {} renderer(s)", tasks.len());
    tasks
}

fn subscribe_all(store: &TemplateStore, reloader: &Reloader) -> Vec<JoinHandle<()>> {
    store
        .names()
        .into_iter()
        .map(|name| {
            let mut subscription = store.subscribe(&name);
            let reloader = reloader.clone();
            tokio::spawn(async move {
                while subscription.next().await.is_some() {
                    debug!("'{}' changed, reloading browsers", subscription.name());
                    reloader.reload();
                }
            })
        })
        .collect()
}
