//! # ae_plugin - Plugin Loading
//!
//! Discovers plugins (shared libraries exporting `plugin_load` and
//! `plugin_unload`), loads them against an [`ApiRegistry`](ae_core::ApiRegistry)
//! and drives their lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │   DirListing    │────▶│ PluginRegistry  │
//! │ (plugins/*.so)  │     │ (by module name)│
//! └─────────────────┘     └────────┬────────┘
//!                                  │ load_library / load_function
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  PluginWatcher  │     │SharedLibraryLoad│
//! │  (hot-reload)   │     │ er (libloading) │
//! └─────────────────┘     └────────┬────────┘
//!                                  │ plugin_load(api_registry, reload)
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │   ApiRegistry   │
//!                         └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use ae_core::ApiRegistry;
//! use ae_plugin::PluginRegistry;
//!
//! let api = ApiRegistry::new();
//! let mut plugins = PluginRegistry::new();
//!
//! let report = plugins.load(&api, "plugins");
//! for (path, error) in &report.failed {
//!     eprintln!("skipped {}: {}", path.display(), error);
//! }
//! ```
//!
//! ## Plugin Side
//!
//! ```c
//! void plugin_load(struct ae_api_registry_api* registry, bool reload)
//! {
//!     registry->set_api(registry, "ae_window_api", &window_api, sizeof(window_api));
//! }
//!
//! void plugin_unload(struct ae_api_registry_api* registry) {}
//! ```

pub mod descriptor;
pub mod error;
pub mod fs;
pub mod library;
pub mod registry;

#[cfg(feature = "hot-reload")]
pub mod watch;

pub use descriptor::{PluginDescriptor, PluginState};
pub use error::{PluginError, Result};
pub use fs::{DirListing, FsEntry};
pub use library::{NativeLoader, SharedLibrary, SharedLibraryLoader, LIBRARY_EXTENSION};
pub use registry::{LoadReport, PluginRegistry, ReloadReport};

#[cfg(feature = "hot-reload")]
pub use watch::{PluginWatcher, WatchConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::descriptor::PluginState;
    pub use crate::error::{PluginError, Result};
    pub use crate::registry::{LoadReport, PluginRegistry, ReloadReport};

    #[cfg(feature = "hot-reload")]
    pub use crate::watch::PluginWatcher;
}
