//! Shared-library loading
//!
//! The plugin registry only needs to open a library, resolve symbols by name
//! and close it again. [`SharedLibraryLoader`] abstracts those three steps so
//! registries can be driven by the OS loader ([`NativeLoader`]) or by an
//! in-process stand-in.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::error::{PluginError, Result};

/// Platform extension of loadable libraries (`so`, `dll` or `dylib`)
pub const LIBRARY_EXTENSION: &str = std::env::consts::DLL_EXTENSION;

/// An open shared library; dropping it closes the library
pub trait SharedLibrary: Send {
    /// Resolve an exported symbol, `None` if absent
    fn load_function(&self, name: &str) -> Option<*const c_void>;

    /// Path the library was opened from
    fn path(&self) -> &Path;
}

/// Opens shared libraries
pub trait SharedLibraryLoader: Send + Sync {
    /// Open the library at `path`
    fn load_library(&self, path: &Path) -> Result<Box<dyn SharedLibrary>>;
}

/// Loader backed by the operating system (`dlopen` / `LoadLibrary`)
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    /// Create a new native loader
    pub fn new() -> Self {
        Self
    }
}

impl SharedLibraryLoader for NativeLoader {
    fn load_library(&self, path: &Path) -> Result<Box<dyn SharedLibrary>> {
        // Safety: running a library's initialisers is inherent to plugin loading
        let library = unsafe {
            Library::new(path).map_err(|e| PluginError::load_error(path, e.to_string()))?
        };

        log::debug!("Opened library {}", path.display());
        Ok(Box::new(NativeLibrary {
            library,
            path: path.to_path_buf(),
        }))
    }
}

/// A library opened by [`NativeLoader`]
pub struct NativeLibrary {
    library: Library,
    path: PathBuf,
}

impl SharedLibrary for NativeLibrary {
    fn load_function(&self, name: &str) -> Option<*const c_void> {
        // Safety: the address is only reinterpreted by the caller, which
        // knows the exported signature
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()) };

        match symbol {
            Ok(symbol) if !symbol.is_null() => {
                log::debug!("Resolved '{}' in {}", name, self.path.display());
                Some(*symbol)
            }
            _ => None,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        log::debug!("Closing library {}", self.path.display());
    }
}

/// Check if a path carries the platform library extension
pub fn is_library_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(LIBRARY_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_library_file() {
        let lib = format!("libwindow.{}", LIBRARY_EXTENSION);
        assert!(is_library_file(Path::new(&lib)));
        assert!(!is_library_file(Path::new("window.txt")));
        assert!(!is_library_file(Path::new("window")));
    }

    #[test]
    fn test_missing_library_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("missing.{}", LIBRARY_EXTENSION));

        let err = NativeLoader::new().load_library(&path).err().unwrap();
        assert!(matches!(err, PluginError::LoadError { .. }));
    }

    #[test]
    fn test_garbage_library_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("garbage.{}", LIBRARY_EXTENSION));
        std::fs::write(&path, b"definitely not an object file").unwrap();

        assert!(NativeLoader::new().load_library(&path).is_err());
    }
}
