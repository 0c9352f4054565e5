//! # ae_runtime - Assembler Host Runtime
//!
//! Everything a host process needs: the [`Engine`] context owning both
//! registries, and [`RuntimeConfig`] gathered from file, environment and
//! command line. The `assembler` binary is a thin loop over these.
//!
//! ```ignore
//! use ae_runtime::{Engine, RuntimeConfig};
//!
//! let (config, _) = RuntimeConfig::load();
//! let mut engine = Engine::new(&config)?;
//! let report = engine.load_plugins(&config.plugin_dir);
//! let window = engine.get_api::<WindowApi>()?;
//! ```

pub mod config;
pub mod engine;

pub use config::{HotReloadConfig, Result, RuntimeConfig, RuntimeError};
pub use engine::Engine;
