//! Script file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;
use crate::script::{ExecutionScope, ExecutionSerializer};

/// Watches the startup script and emits its new source on every change.
pub struct ScriptWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<String>,
}

impl ScriptWatcher {
    /// Create a new ScriptWatcher.
    ///
    /// Returns the watcher and a receiver for script updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        match std::fs::read_to_string(&path) {
                            Ok(source) => {
                                tracing::info!(path = ?path, "Script change detected, reloading");
                                let _ = tx.send(source);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to read script, keeping current state")
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Script watcher started");
        Ok(watcher)
    }
}

/// Execute every update through the serializer until shutdown.
///
/// Identical consecutive sources are skipped; editors often emit several
/// events for one save.
pub async fn apply_updates(
    mut updates: mpsc::UnboundedReceiver<String>,
    serializer: Arc<ExecutionSerializer>,
    shutdown: Shutdown,
) {
    let mut last: Option<String> = None;
    loop {
        let source = tokio::select! {
            source = updates.recv() => match source {
                Some(source) => source,
                None => break,
            },
            _ = shutdown.wait() => break,
        };

        if last.as_deref() == Some(source.as_str()) {
            continue;
        }
        match serializer.execute(source.clone(), ExecutionScope::detached()).await {
            Ok(_) => tracing::info!("Script reloaded"),
            Err(e) => tracing::error!(error = %e, "Script reload failed, keeping current state"),
        }
        last = Some(source);
    }
}
