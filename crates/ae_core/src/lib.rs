//! # ae_core - Assembler Registry Core
//!
//! The pieces every other part of the engine is wired through:
//!
//! - [`StrHashMap`]: chained string-keyed map, the backing store of both
//!   registries
//! - [`BlobMap`]: fixed-size, address-stable byte slots on top of it
//! - [`ApiRegistry`]: type-keyed store of interface tables (structs of
//!   function pointers) acting as the service locator between plugins
//! - [`ffi`]: the C ABI table plugins receive in `plugin_load`
//!
//! ## Philosophy
//! The engine has no hardcoded subsystems. Window, renderer, logging and
//! the rest publish an interface table here when their plugin loads, and
//! everything else looks them up by name.
//!
//! ```ignore
//! use ae_core::{Api, ApiRegistry};
//!
//! #[repr(C)]
//! #[derive(Clone, Copy)]
//! struct WindowApi {
//!     update: Option<extern "C" fn() -> bool>,
//! }
//!
//! unsafe impl Api for WindowApi {
//!     const NAME: &'static str = "ae_window_api";
//! }
//!
//! let registry = ApiRegistry::new();
//! let window = registry.get_api::<WindowApi>()?;
//! ```

pub mod api_registry;
pub mod blob;
pub mod error;
pub mod ffi;
pub mod hash;
pub mod hash_map;

pub use api_registry::{Api, ApiRegistry, ApiSlot, ApiStamp};
pub use blob::{Blob, BlobMap};
pub use error::{ApiError, Result};
pub use ffi::{ApiRegistryApi, PluginLoadFn, PluginUnloadFn};
pub use hash::ApiId;
pub use hash_map::StrHashMap;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api_registry::{Api, ApiRegistry, ApiSlot};
    pub use crate::error::{ApiError, Result};
    pub use crate::ffi::{ApiRegistryApi, PluginLoadFn, PluginUnloadFn};
}
