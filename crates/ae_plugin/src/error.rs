//! Error types for plugin loading

use std::path::PathBuf;
use thiserror::Error;

use crate::descriptor::PluginState;

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// Errors that can occur while discovering, loading or reloading plugins
#[derive(Debug, Error)]
pub enum PluginError {
    /// Failed to load dynamic library
    #[error("Failed to load library '{path}': {message}")]
    LoadError {
        path: PathBuf,
        message: String,
    },

    /// Library does not export a required symbol
    #[error("Symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound {
        library: String,
        symbol: String,
    },

    /// No plugin loaded under this name
    #[error("Plugin '{0}' is not loaded")]
    NotFound(String),

    /// A plugin with the same module name is already loaded
    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// Lifecycle transition not allowed from the current state
    #[error("Plugin '{name}' cannot go from {from:?} to {to:?}")]
    InvalidState {
        name: String,
        from: PluginState,
        to: PluginState,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File watcher error
    #[error("Watch error: {0}")]
    Watch(String),

    /// API registry rejected an operation
    #[error("API registry error: {0}")]
    Api(#[from] ae_core::ApiError),
}

impl PluginError {
    /// Create a load error
    pub fn load_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PluginError::LoadError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a symbol not found error
    pub fn symbol_not_found(library: impl Into<String>, symbol: impl Into<String>) -> Self {
        PluginError::SymbolNotFound {
            library: library.into(),
            symbol: symbol.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(name: impl Into<String>, from: PluginState, to: PluginState) -> Self {
        PluginError::InvalidState {
            name: name.into(),
            from,
            to,
        }
    }
}
