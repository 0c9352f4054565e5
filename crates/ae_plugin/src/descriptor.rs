//! Plugin descriptor and lifecycle state
//!
//! ```text
//!            load                 handshake ok
//! Unloaded ────────▶ Loading ──────────────────▶ Active
//!    ▲                  │  ▲                        │
//!    │  handshake fails │  │ reload                 │ unload / reload
//!    └──────────────────┘  │                        ▼
//!    ▲                     └─────────────────── Unloading
//!    └──────────────────────────────────────────────┘
//!                        unload done
//! ```

use std::path::{Path, PathBuf};

use ae_core::ffi::{ApiRegistryApi, PluginLoadFn, PluginUnloadFn};

use crate::error::{PluginError, Result};
use crate::library::SharedLibrary;

/// The current state of a plugin
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Not loaded
    Unloaded,
    /// Library open, `plugin_load` not finished yet
    Loading,
    /// Loaded and published
    Active,
    /// `plugin_unload` running or library being closed
    Unloading,
}

impl PluginState {
    /// Check if moving to `next` is a legal transition
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Unloaded, Loading)
                | (Loading, Active)
                | (Loading, Unloaded)
                | (Active, Unloading)
                | (Unloading, Loading)
                | (Unloading, Unloaded)
        )
    }
}

impl Default for PluginState {
    fn default() -> Self {
        PluginState::Unloaded
    }
}

/// A loaded plugin: its library plus the two resolved entry points
pub struct PluginDescriptor {
    name: String,
    source_path: PathBuf,
    loaded_path: PathBuf,
    library: Option<Box<dyn SharedLibrary>>,
    load_fn: PluginLoadFn,
    unload_fn: PluginUnloadFn,
    state: PluginState,
    apis: Vec<(String, u64)>,
    generation: u32,
}

impl PluginDescriptor {
    /// Create a descriptor for a freshly opened library, in state `Loading`
    pub(crate) fn new(
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        loaded_path: impl Into<PathBuf>,
        library: Box<dyn SharedLibrary>,
        load_fn: PluginLoadFn,
        unload_fn: PluginUnloadFn,
    ) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            loaded_path: loaded_path.into(),
            library: Some(library),
            load_fn,
            unload_fn,
            state: PluginState::Loading,
            apis: Vec::new(),
            generation: 0,
        }
    }

    // ========== Accessors ==========

    /// Module name (library base file name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the plugin was discovered at
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Path the library was actually opened from (differs when shadow-copied)
    pub fn loaded_path(&self) -> &Path {
        &self.loaded_path
    }

    /// Current lifecycle state
    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Interfaces published during the last `plugin_load`
    pub fn apis(&self) -> impl Iterator<Item = &str> + '_ {
        self.apis.iter().map(|(name, _)| name.as_str())
    }

    /// Number of times the plugin has been reloaded
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Check if the library is currently open
    pub fn is_open(&self) -> bool {
        self.library.is_some()
    }

    // ========== Lifecycle ==========

    /// Move to `next`, rejecting illegal transitions
    pub(crate) fn transition(&mut self, next: PluginState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PluginError::invalid_state(&self.name, self.state, next));
        }
        log::debug!("Plugin '{}': {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Record published interfaces with the sequence they were stamped at
    pub(crate) fn set_apis(&mut self, apis: Vec<(String, u64)>) {
        self.apis = apis;
    }

    pub(crate) fn take_apis(&mut self) -> Vec<(String, u64)> {
        std::mem::take(&mut self.apis)
    }

    /// Swap in a newly opened library for a reload
    pub(crate) fn replace_library(
        &mut self,
        loaded_path: PathBuf,
        library: Box<dyn SharedLibrary>,
        load_fn: PluginLoadFn,
        unload_fn: PluginUnloadFn,
    ) {
        self.loaded_path = loaded_path;
        self.library = Some(library);
        self.load_fn = load_fn;
        self.unload_fn = unload_fn;
        self.generation += 1;
    }

    /// Close the library; entry points must not be called afterwards
    pub(crate) fn close(&mut self) {
        if self.library.take().is_some() {
            log::debug!("Closed library for plugin '{}'", self.name);
        }
    }

    /// Call `plugin_load(registry, reload)`
    ///
    /// # Safety
    /// `registry` must be a live table and the library must be open.
    pub(crate) unsafe fn call_load(&self, registry: *mut ApiRegistryApi, reload: bool) {
        if self.library.is_some() {
            (self.load_fn)(registry, reload);
        }
    }

    /// Call `plugin_unload(registry)`
    ///
    /// # Safety
    /// `registry` must be a live table and the library must be open.
    pub(crate) unsafe fn call_unload(&self, registry: *mut ApiRegistryApi) {
        if self.library.is_some() {
            (self.unload_fn)(registry);
        }
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("source_path", &self.source_path)
            .field("loaded_path", &self.loaded_path)
            .field("state", &self.state)
            .field("apis", &self.apis().collect::<Vec<_>>())
            .field("generation", &self.generation)
            .finish()
    }
}
