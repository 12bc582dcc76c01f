//! Configuration file watcher for hot reload.
//!
//! Editors often write a file in several steps, so change events are
//! coalesced: the file is reloaded once the events stop for `debounce`.
//! Only settings the running server can apply (the rate limiter kill switch)
//! are compared; a reload that leaves them unchanged is not forwarded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::loader::load_config;
use crate::config::schema::ServerConfig;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches the configuration file and forwards reloads that change a
/// live-applicable setting.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    current: ServerConfig,
    update_tx: mpsc::UnboundedSender<ServerConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, starting from the configuration in use.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path, current: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                debounce: DEFAULT_DEBOUNCE,
                current,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching the file. Must be called inside a Tokio runtime.
    /// Dropping the returned handle stops the watch and the reload task.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce = ?self.debounce, "Config watcher started");
        tokio::spawn(reload_loop(
            self.path,
            self.debounce,
            self.current,
            event_rx,
            self.update_tx,
        ));
        Ok(watcher)
    }
}

/// Whether `next` differs from `current` in a setting applied without restart.
fn has_live_changes(current: &ServerConfig, next: &ServerConfig) -> bool {
    current.limiter.enabled != next.limiter.enabled
}

/// Reload the file after each quiet burst of change events until the event
/// source closes. Returns how many times the file was read.
async fn reload_loop(
    path: PathBuf,
    debounce: Duration,
    mut current: ServerConfig,
    mut events: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<ServerConfig>,
) -> usize {
    let mut reloads = 0;

    while events.recv().await.is_some() {
        let mut closed = false;
        loop {
            match timeout(debounce, events.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        reloads += 1;
        match load_config(&path) {
            Ok(next) if has_live_changes(&current, &next) => {
                tracing::info!(path = ?path, limiter_enabled = next.limiter.enabled, "Config file changed");
                if updates.send(next.clone()).is_err() {
                    break;
                }
                current = next;
            }
            Ok(_) => {
                tracing::debug!(path = ?path, "Config reloaded with no live-applicable changes");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            }
        }

        if closed {
            break;
        }
    }

    reloads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(file: &tempfile::NamedTempFile, contents: &str) {
        std::fs::write(file.path(), contents).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_coalesced_and_only_changes_forwarded() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(&file, "[limiter]\nenabled = false\n");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(reload_loop(
            file.path().to_path_buf(),
            Duration::from_millis(100),
            ServerConfig::default(),
            event_rx,
            update_tx,
        ));

        for _ in 0..3 {
            event_tx.send(()).unwrap();
        }
        let update = update_rx.recv().await.unwrap();
        assert!(!update.limiter.enabled);

        // Same kill switch value, different unrelated setting.
        write_config(&file, "env = \"staging\"\n[limiter]\nenabled = false\n");
        event_tx.send(()).unwrap();
        drop(event_tx);

        assert_eq!(task.await.unwrap(), 2);
        assert!(update_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_file_keeps_current_config() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(&file, "[limiter]\nburst = 0\nenabled = false\n");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        event_tx.send(()).unwrap();
        drop(event_tx);

        let reloads = reload_loop(
            file.path().to_path_buf(),
            Duration::from_millis(100),
            ServerConfig::default(),
            event_rx,
            update_tx,
        )
        .await;

        assert_eq!(reloads, 1);
        assert!(update_rx.try_recv().is_err());
    }
}
