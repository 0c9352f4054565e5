//! Hot-reload support for plugins
//!
//! Watches plugin directories and reloads a plugin once changes to its
//! library have settled. Events are only queued from the watcher thread;
//! reloading happens on the caller's thread in [`PluginWatcher::poll`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

use ae_core::ApiRegistry;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{PluginError, Result};
use crate::library::is_library_file;
use crate::registry::{PluginRegistry, ReloadReport};

/// Configuration for hot-reload
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Wait for file changes to settle before reloading
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

/// Watches plugin libraries and reloads them when they change
pub struct PluginWatcher {
    config: WatchConfig,
    watcher: Option<RecommendedWatcher>,
    events: Option<Receiver<notify::Result<Event>>>,
    directories: Vec<PathBuf>,
    /// Module name -> time the last change was seen
    pending: HashMap<String, Instant>,
    /// Modules whose reload failed, by source path
    orphans: HashMap<PathBuf, String>,
}

impl PluginWatcher {
    /// Create a new watcher
    pub fn new(config: WatchConfig) -> Result<Self> {
        let (tx, rx) = channel();

        let watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| PluginError::Watch(e.to_string()))?;

        Ok(Self {
            config,
            watcher: Some(watcher),
            events: Some(rx),
            directories: Vec::new(),
            pending: HashMap::new(),
            orphans: HashMap::new(),
        })
    }

    /// Create a watcher that never sees file events
    ///
    /// Reloads can still be queued with [`PluginWatcher::trigger_reload`].
    pub fn disabled(config: WatchConfig) -> Self {
        Self {
            config,
            watcher: None,
            events: None,
            directories: Vec::new(),
            pending: HashMap::new(),
            orphans: HashMap::new(),
        }
    }

    /// Check if file events are being received
    pub fn is_enabled(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start watching a plugin directory (non-recursively)
    pub fn watch(&mut self, directory: impl AsRef<Path>) -> Result<()> {
        let directory = directory.as_ref();
        let Some(watcher) = self.watcher.as_mut() else {
            return Ok(());
        };

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(|e| PluginError::Watch(e.to_string()))?;

        log::debug!("Watching plugin directory {}", directory.display());
        self.directories.push(directory.to_path_buf());
        Ok(())
    }

    /// Directories being watched
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Queue a reload of `name` as if its library had just changed
    pub fn trigger_reload(&mut self, name: impl Into<String>) {
        self.pending.insert(name.into(), Instant::now());
    }

    /// Modules waiting for their debounce window
    pub fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending.keys().cloned().collect();
        names.sort();
        names
    }

    /// Process file events and reload plugins whose changes have settled
    ///
    /// Call once per frame. A failed reload is logged and retried on the
    /// next change to the library.
    pub fn poll(&mut self, plugins: &mut PluginRegistry, api: &ApiRegistry) -> Vec<ReloadReport> {
        let events: Vec<Event> = match self.events {
            Some(ref rx) => rx.try_iter().filter_map(|res| res.ok()).collect(),
            None => Vec::new(),
        };
        for event in &events {
            self.handle_event(event, plugins);
        }

        let now = Instant::now();
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) >= self.config.debounce)
            .map(|(name, _)| name.clone())
            .collect();

        let mut reloaded = Vec::new();
        for name in ready {
            self.pending.remove(&name);
            match self.reload(&name, plugins, api) {
                Ok(report) => {
                    log::info!("Hot-reloaded plugin '{}'", name);
                    reloaded.push(report);
                }
                Err(e) => log::error!("Failed to hot-reload plugin '{}': {}", name, e),
            }
        }
        reloaded
    }

    fn reload(
        &mut self,
        name: &str,
        plugins: &mut PluginRegistry,
        api: &ApiRegistry,
    ) -> Result<ReloadReport> {
        if plugins.contains(name) {
            let source = plugins.get(name).map(|p| p.source_path().to_path_buf());
            let result = plugins.reload(api, name);
            if let (Err(_), Some(source)) = (&result, source) {
                if !plugins.contains(name) {
                    self.orphans.insert(source, name.to_string());
                }
            }
            return result;
        }

        // A previous reload failed and left the module unloaded
        let source = self
            .orphans
            .iter()
            .find(|(_, orphan)| orphan.as_str() == name)
            .map(|(path, _)| path.clone())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        plugins.load_plugin(api, &source, name)?;
        self.orphans.remove(&source);

        let stale_apis: Vec<String> = plugins
            .get(name)
            .map(|p| p.apis().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(ReloadReport {
            name: name.to_string(),
            generation: 0,
            stale_apis,
            retracted: Vec::new(),
        })
    }

    fn handle_event(&mut self, event: &Event, plugins: &PluginRegistry) {
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return;
        }

        for path in &event.paths {
            if !is_library_file(path) {
                continue;
            }
            if let Some(name) = self.module_for(path, plugins) {
                log::debug!("Detected change in plugin '{}': {}", name, path.display());
                self.pending.insert(name, Instant::now());
            }
        }
    }

    /// Resolve a changed file to the module loaded from it
    fn module_for(&self, path: &Path, plugins: &PluginRegistry) -> Option<String> {
        if let Some(name) = plugins.find_by_source(path) {
            return Some(name.to_string());
        }

        let changed = path.canonicalize().ok()?;
        let loaded = plugins.names().iter().find(|name| {
            plugins
                .get(name)
                .and_then(|p| p.source_path().canonicalize().ok())
                .map_or(false, |source| source == changed)
        });

        loaded.cloned().or_else(|| {
            self.orphans
                .iter()
                .find(|(source, _)| {
                    source.as_path() == path
                        || source.canonicalize().ok().as_ref() == Some(&changed)
                })
                .map(|(_, name)| name.clone())
        })
    }
}

impl Drop for PluginWatcher {
    fn drop(&mut self) {
        log::debug!("Shutting down plugin watcher");
    }
}
