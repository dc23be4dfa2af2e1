use crate::error::EngineError;
use crate::template_store::TemplateStore;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Background reload task of one [`TemplateStore`].
///
/// The task reacts to file system events for the store's template files and
/// also re-checks every file source on a fixed interval, so a missed or
/// unsupported event only delays a reload. Dropping the handle stops the task.
pub struct ReloadHandle {
    task: JoinHandle<()>,
}

impl ReloadHandle {
    /// Start watching `store`. Must be called from inside a Tokio runtime.
    pub fn spawn(store: Arc<TemplateStore>, interval: Duration) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let (tx, mut rx) = mpsc::channel::<PathBuf>(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    // Only process modify and create events
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        for path in event.paths {
                            // a full queue only delays the reload until the next tick
                            let _ = tx.try_send(path);
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            }
        })?;

        for dir in store.watched_dirs() {
            if dir.exists() {
                watcher.watch(&dir, RecursiveMode::NonRecursive)?;
                info!("Watching: {:?}", dir);
            } else {
                warn!("Path does not exist: {:?}", dir);
            }
        }

        let task = runtime.spawn(async move {
            let _watcher = watcher; // Keep watcher alive

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    Some(path) = rx.recv() => {
                        let names = store.names_for_path(&path);
                        if names.is_empty() {
                            continue;
                        }
                        debug!("File changed: {:?} -> {:?}", path, names);
                        let store = store.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            for name in names {
                                if let Err(e) = store.reload(&name) {
                                    warn!(
                                        "Keeping previous renderer '{}', reload failed: {}",
                                        name, e
                                    );
                                }
                            }
                        })
                        .await;
                        if let Err(e) = result {
                            error!("Reload task failed: {}", e);
                        }
                    }
                    _ = ticker.tick() => {
                        let store = store.clone();
                        match tokio::task::spawn_blocking(move || store.reload_all()).await {
                            Ok(0) => {}
                            Ok(n) => debug!("Periodic check reloaded {} renderer(s)", n),
                            Err(e) => error!("Reload task failed: {}", e),
                        }
                    }
                }
            }
        });

        Ok(Self { task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ReloadHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ReloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadHandle")
            .field("running", &self.is_running())
            .finish()
    }
}
