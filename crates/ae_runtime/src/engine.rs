//! Engine context
//!
//! The one object a host creates: it owns the API registry and the plugin
//! registry, so both outlive every plugin and every interface record.

use std::path::Path;

use ae_core::{Api, ApiRegistry};
use ae_plugin::{LoadReport, PluginRegistry, SharedLibraryLoader};

#[cfg(feature = "hot-reload")]
use ae_plugin::{PluginWatcher, ReloadReport, WatchConfig};

use crate::config::{Result, RuntimeConfig};

/// Host-side engine context
pub struct Engine {
    // Field order is drop order: plugins go before the registry they use
    #[cfg(feature = "hot-reload")]
    watcher: Option<PluginWatcher>,
    plugins: PluginRegistry,
    api: ApiRegistry,
}

impl Engine {
    /// Create an engine that loads plugins through the OS loader
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        Self::with_registry(config, PluginRegistry::new())
    }

    /// Create an engine with a custom library loader
    pub fn with_loader(config: &RuntimeConfig, loader: Box<dyn SharedLibraryLoader>) -> Result<Self> {
        Self::with_registry(config, PluginRegistry::with_loader(loader))
    }

    fn with_registry(config: &RuntimeConfig, mut plugins: PluginRegistry) -> Result<Self> {
        config.validate()?;

        if let Some(dir) = &config.hot_reload.shadow_dir {
            plugins = plugins.with_shadow_dir(dir);
        }

        let api = ApiRegistry::with_capacity(config.registry_capacity);
        api.publish_self().map_err(ae_plugin::PluginError::from)?;

        log::debug!("Engine context created ({} buckets)", config.registry_capacity);

        Ok(Self {
            #[cfg(feature = "hot-reload")]
            watcher: None,
            plugins,
            api,
        })
    }

    // ========== Plugins ==========

    /// Load every plugin at `path`
    pub fn load_plugins(&mut self, path: impl AsRef<Path>) -> LoadReport {
        self.plugins.load(&self.api, path)
    }

    /// Unload every plugin, most recently loaded first
    pub fn shutdown(&mut self) {
        if !self.plugins.is_empty() {
            log::info!("Unloading {} plugin(s)", self.plugins.len());
        }
        self.plugins.unload_all(&self.api);
    }

    /// The plugin registry
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Mutable access to the plugin registry, together with the API registry
    /// its operations need
    pub fn plugins_mut(&mut self) -> (&mut PluginRegistry, &ApiRegistry) {
        (&mut self.plugins, &self.api)
    }

    // ========== Interfaces ==========

    /// The API registry
    pub fn api(&self) -> &ApiRegistry {
        &self.api
    }

    /// Copy out a typed interface; all-zero if nothing was published
    pub fn get_api<T: Api>(&self) -> ae_core::Result<T> {
        self.api.get_api::<T>()
    }

    // ========== Hot Reload ==========

    /// Start watching the plugin directory for changes
    #[cfg(feature = "hot-reload")]
    pub fn enable_hot_reload(&mut self, config: &RuntimeConfig) -> Result<()> {
        let mut watcher = PluginWatcher::new(WatchConfig {
            debounce: config.debounce(),
        })?;

        let dir = if config.plugin_dir.is_dir() {
            config.plugin_dir.as_path()
        } else {
            config.plugin_dir.parent().unwrap_or_else(|| Path::new("."))
        };
        watcher.watch(dir)?;

        log::info!("Hot-reload enabled for {}", dir.display());
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Check if a watcher is running
    #[cfg(feature = "hot-reload")]
    pub fn is_hot_reload_enabled(&self) -> bool {
        self.watcher.is_some()
    }

    /// Process pending hot-reloads; call once per frame
    #[cfg(feature = "hot-reload")]
    pub fn update(&mut self) -> Vec<ReloadReport> {
        match self.watcher.as_mut() {
            Some(watcher) => watcher.poll(&mut self.plugins, &self.api),
            None => Vec::new(),
        }
    }

    /// Queue a reload of a plugin as if its library had changed
    #[cfg(feature = "hot-reload")]
    pub fn trigger_reload(&mut self, name: &str) {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.trigger_reload(name);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("api", &self.api)
            .field("plugins", &self.plugins)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ae_core::ffi::{ApiRegistryApi, API_REGISTRY_API_NAME};

    #[test]
    fn test_new_engine_publishes_registry_table() {
        let engine = Engine::new(&RuntimeConfig::default()).unwrap();

        assert!(engine.api().is_registered(API_REGISTRY_API_NAME));
        let stamp = engine.api().stamp(API_REGISTRY_API_NAME).unwrap();
        assert_eq!(stamp.size, std::mem::size_of::<ApiRegistryApi>());
        assert!(engine.plugins().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RuntimeConfig {
            registry_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert!(Engine::new(&config).is_err());
    }

    #[test]
    fn test_load_from_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(&RuntimeConfig::default()).unwrap();

        let report = engine.load_plugins(dir.path());
        assert_eq!(report.attempted, 0);
        assert!(report.is_clean());
    }
}
