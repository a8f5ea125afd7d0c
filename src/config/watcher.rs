//! Hot reload of the service catalog.
//!
//! Many editors and deploy tools replace the config file instead of writing
//! it in place, which drops a watch placed on the file itself. The parent
//! directory is watched instead and events are filtered down to the config
//! file. A new catalog is sent only when the file contents changed and the
//! new config validates; otherwise the running catalog stays in place.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Watches one config file and publishes every accepted revision.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of the catalog updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (updates, receiver) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, receiver)
    }

    /// Start watching. Dropping the returned watcher stops reloads.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = watched_dir(&self.path);
        let file_name = self.path.file_name().map(OsStr::to_os_string);
        let mut reloader = Reloader::new(self.path.clone(), self.updates);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, file_name.as_deref()) => {
                    reloader.reload();
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Watching service catalog for changes");
        Ok(watcher)
    }
}

/// Reloads the file and forwards accepted revisions.
struct Reloader {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ProxyConfig>,
    last_seen: Option<Vec<u8>>,
}

impl Reloader {
    fn new(path: PathBuf, updates: mpsc::UnboundedSender<ProxyConfig>) -> Self {
        let last_seen = std::fs::read(&path).ok();
        Self {
            path,
            updates,
            last_seen,
        }
    }

    /// True when a new catalog was published.
    fn reload(&mut self) -> bool {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            // Mid-replace; the create event for the new file follows.
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Config file not readable");
                return false;
            }
        };
        if self.last_seen.as_deref() == Some(contents.as_slice()) {
            return false;
        }
        self.last_seen = Some(contents);

        match load_config(&self.path) {
            Ok(config) => {
                tracing::info!(
                    path = %self.path.display(),
                    services = config.services.len(),
                    "Service catalog changed, publishing"
                );
                self.updates.send(config).is_ok()
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Rejected config revision, running catalog unchanged"
                );
                false
            }
        }
    }
}

fn watched_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn touches(event: &Event, file_name: Option<&OsStr>) -> bool {
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }
    let Some(file_name) = file_name else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(file_name))
}
