//! Plugin registry
//!
//! Discovers shared libraries, resolves their `plugin_load` / `plugin_unload`
//! exports and drives them through the [`ApiRegistry`]. Every plugin is keyed
//! by its library base name, so `plugins/librender.so` becomes `librender`.
//!
//! Discovery never aborts on a bad module: unloadable files and libraries
//! missing an export are logged, reported in [`LoadReport::failed`] and
//! skipped.

use std::ffi::c_void;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use ae_core::ffi::{PluginLoadFn, PluginUnloadFn, PLUGIN_LOAD_SYMBOL, PLUGIN_UNLOAD_SYMBOL};
use ae_core::{ApiRegistry, StrHashMap};

use crate::descriptor::{PluginDescriptor, PluginState};
use crate::error::{PluginError, Result};
use crate::fs::{DirListing, FsEntry};
use crate::library::{NativeLoader, SharedLibrary, SharedLibraryLoader, LIBRARY_EXTENSION};

/// Outcome of a [`PluginRegistry::load`] pass
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Files carrying the library extension
    pub attempted: usize,
    /// Modules loaded and initialised, in load order
    pub loaded: Vec<String>,
    /// Files that were skipped and why
    pub failed: Vec<(PathBuf, PluginError)>,
}

impl LoadReport {
    /// Check if every attempt succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of a [`PluginRegistry::reload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    /// Module that was reloaded
    pub name: String,
    /// Reload count after this reload
    pub generation: u32,
    /// Interfaces whose function pointers changed; copies held by the host
    /// must be fetched again
    pub stale_apis: Vec<String>,
    /// Interfaces the old library published that the new one did not; their
    /// slots are now zeroed
    pub retracted: Vec<String>,
}

/// Registry of loaded plugins
pub struct PluginRegistry {
    loader: Box<dyn SharedLibraryLoader>,
    plugins: StrHashMap<PluginDescriptor>,
    /// Module names in load order
    order: Vec<String>,
    shadow_dir: Option<PathBuf>,
}

impl PluginRegistry {
    /// Create a registry that opens libraries through the OS loader
    pub fn new() -> Self {
        Self::with_loader(Box::new(NativeLoader::new()))
    }

    /// Create a registry with a custom library loader
    pub fn with_loader(loader: Box<dyn SharedLibraryLoader>) -> Self {
        Self {
            loader,
            plugins: StrHashMap::new(),
            order: Vec::new(),
            shadow_dir: None,
        }
    }

    /// Copy every library into `dir` before opening it
    ///
    /// The copy is what gets loaded, which leaves the source file free to be
    /// rebuilt while the plugin is running.
    pub fn with_shadow_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shadow_dir = Some(dir.into());
        self
    }

    /// Directory shadow copies are written to, if enabled
    pub fn shadow_dir(&self) -> Option<&Path> {
        self.shadow_dir.as_deref()
    }

    // ========== Loading ==========

    /// Load every plugin found at `path`
    ///
    /// A directory is scanned (non-recursively, in filesystem order) for files
    /// with the platform library extension; a single library file is loaded
    /// directly. Anything else loads nothing.
    pub fn load(&mut self, api: &ApiRegistry, path: impl AsRef<Path>) -> LoadReport {
        let path = normalize_path(path.as_ref());
        let listing = DirListing::new(&path);
        let mut report = LoadReport::default();

        if listing.is_dir() {
            let entries = match listing.entries() {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Cannot list plugin directory {}: {}", path.display(), e);
                    return report;
                }
            };
            for entry in entries {
                if !entry.is_dir() && entry.extension() == Some(LIBRARY_EXTENSION) {
                    self.attempt(api, &entry, &mut report);
                }
            }
        } else {
            let entry = FsEntry::from_path(&path);
            if entry.extension() == Some(LIBRARY_EXTENSION) {
                self.attempt(api, &entry, &mut report);
            }
        }

        log::info!(
            "Loaded {} of {} plugin(s) from {}",
            report.loaded.len(),
            report.attempted,
            path.display()
        );
        report
    }

    fn attempt(&mut self, api: &ApiRegistry, entry: &FsEntry, report: &mut LoadReport) {
        report.attempted += 1;
        let name = entry.name();

        match self.load_plugin(api, entry.full_path(), name) {
            Ok(()) => report.loaded.push(name.to_string()),
            Err(e) => {
                log::warn!("Skipping plugin {}: {}", entry.full_path().display(), e);
                report.failed.push((entry.full_path().to_path_buf(), e));
            }
        }
    }

    /// Load a single library as module `name`
    pub fn load_plugin(&mut self, api: &ApiRegistry, path: &Path, name: &str) -> Result<()> {
        if self.plugins.contains_key(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }

        let loaded_path = stage_library(self.shadow_dir.as_deref(), path, name, 0)?;
        let (library, load_fn, unload_fn) = match open_plugin(&*self.loader, &loaded_path) {
            Ok(opened) => opened,
            Err(e) => {
                discard_shadow_copy(path, &loaded_path);
                return Err(e);
            }
        };

        let mut descriptor =
            PluginDescriptor::new(name, path, loaded_path, library, load_fn, unload_fn);

        let mark = api.sequence();
        // Safety: the library is open and the table outlives the call
        unsafe { descriptor.call_load(api.abi(), false) };
        descriptor.set_apis(published_since(api, mark));
        descriptor.transition(PluginState::Active)?;

        log::info!(
            "Loaded plugin '{}' from {} ({} interface(s))",
            name,
            path.display(),
            descriptor.apis().count()
        );

        self.plugins.insert(name, descriptor);
        self.order.push(name.to_string());
        Ok(())
    }

    // ========== Unloading ==========

    /// Unload a plugin: `plugin_unload`, retract its interfaces, close it
    ///
    /// Returns the interfaces that were retracted.
    pub fn unload(&mut self, api: &ApiRegistry, name: &str) -> Result<Vec<String>> {
        let descriptor = self
            .plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        descriptor.transition(PluginState::Unloading)?;
        // Safety: the library is still open
        unsafe { descriptor.call_unload(api.abi()) };

        let retracted = retract_owned(api, descriptor.take_apis(), &[]);
        descriptor.close();
        descriptor.transition(PluginState::Unloaded)?;
        discard_shadow_copy(descriptor.source_path(), descriptor.loaded_path());

        self.plugins.remove(name);
        self.order.retain(|n| n != name);

        log::info!("Unloaded plugin '{}'", name);
        Ok(retracted)
    }

    /// Unload every plugin, most recently loaded first
    pub fn unload_all(&mut self, api: &ApiRegistry) {
        let names: Vec<String> = self.order.iter().rev().cloned().collect();
        for name in names {
            if let Err(e) = self.unload(api, &name) {
                log::warn!("Failed to unload plugin '{}': {}", name, e);
            }
        }
    }

    // ========== Reloading ==========

    /// Reload a plugin from its source path
    ///
    /// The old library gets `plugin_unload` and is closed, the source is
    /// reopened and `plugin_load` is called with `reload = true`. If the new
    /// library cannot be opened the plugin ends up unloaded and its
    /// interfaces are retracted.
    pub fn reload(&mut self, api: &ApiRegistry, name: &str) -> Result<ReloadReport> {
        let result = self.reload_in_place(api, name);

        if let Err(ref e) = result {
            if self.state(name) == PluginState::Unloaded && self.plugins.contains_key(name) {
                log::warn!("Reload of plugin '{}' failed, plugin unloaded: {}", name, e);
                self.plugins.remove(name);
                self.order.retain(|n| n != name);
            }
        }
        result
    }

    fn reload_in_place(&mut self, api: &ApiRegistry, name: &str) -> Result<ReloadReport> {
        let descriptor = self
            .plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        descriptor.transition(PluginState::Unloading)?;
        // Safety: the old library is still open
        unsafe { descriptor.call_unload(api.abi()) };
        let old_apis = descriptor.take_apis();
        descriptor.close();
        discard_shadow_copy(descriptor.source_path(), descriptor.loaded_path());

        let source = descriptor.source_path().to_path_buf();
        let generation = descriptor.generation() + 1;
        let opened = stage_library(self.shadow_dir.as_deref(), &source, name, generation)
            .and_then(|loaded_path| match open_plugin(&*self.loader, &loaded_path) {
                Ok(opened) => Ok((loaded_path, opened)),
                Err(e) => {
                    discard_shadow_copy(&source, &loaded_path);
                    Err(e)
                }
            });

        let (loaded_path, (library, load_fn, unload_fn)) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                retract_owned(api, old_apis, &[]);
                descriptor.transition(PluginState::Unloaded)?;
                return Err(e);
            }
        };

        descriptor.replace_library(loaded_path, library, load_fn, unload_fn);
        descriptor.transition(PluginState::Loading)?;

        let mark = api.sequence();
        // Safety: the new library is open and the table outlives the call
        unsafe { descriptor.call_load(api.abi(), true) };
        let new_apis = published_since(api, mark);

        let republished: Vec<&str> = new_apis.iter().map(|(n, _)| n.as_str()).collect();
        let mut stale_apis: Vec<String> = old_apis.iter().map(|(n, _)| n.clone()).collect();
        stale_apis.extend(republished.iter().map(|n| n.to_string()));
        stale_apis.sort();
        stale_apis.dedup();

        let retracted = retract_owned(api, old_apis, &republished);
        descriptor.set_apis(new_apis);
        descriptor.transition(PluginState::Active)?;

        log::info!(
            "Reloaded plugin '{}' (generation {}, {} stale interface(s))",
            name,
            generation,
            stale_apis.len()
        );

        Ok(ReloadReport {
            name: name.to_string(),
            generation,
            stale_apis,
            retracted,
        })
    }

    // ========== Queries ==========

    /// Get a loaded plugin
    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(name)
    }

    /// Check if a plugin is loaded
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Lifecycle state of a plugin; `Unloaded` if unknown
    pub fn state(&self, name: &str) -> PluginState {
        self.plugins.get(name).map(|p| p.state()).unwrap_or_default()
    }

    /// Module names in load order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Find the module loaded from `source_path`
    pub fn find_by_source(&self, source_path: &Path) -> Option<&str> {
        self.order
            .iter()
            .find(|name| {
                self.plugins
                    .get(name)
                    .map_or(false, |p| p.source_path() == source_path)
            })
            .map(|name| name.as_str())
    }

    /// Number of loaded plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Check if no plugin is loaded
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.order)
            .field("shadow_dir", &self.shadow_dir)
            .finish()
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        // No API registry here, so `plugin_unload` is not called
        for name in self.order.iter().rev() {
            if let Some(descriptor) = self.plugins.get_mut(name) {
                descriptor.close();
                discard_shadow_copy(descriptor.source_path(), descriptor.loaded_path());
            }
        }
    }
}

/// Strip trailing separators; an empty path means the current directory
fn normalize_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_end_matches(|c: char| c == '/' || c == MAIN_SEPARATOR);

    if trimmed.is_empty() {
        if raw.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(MAIN_SEPARATOR.to_string())
        }
    } else {
        PathBuf::from(trimmed)
    }
}

/// Copy `source` into the shadow directory, or return it unchanged
fn stage_library(
    shadow_dir: Option<&Path>,
    source: &Path,
    name: &str,
    generation: u32,
) -> Result<PathBuf> {
    let Some(dir) = shadow_dir else {
        return Ok(source.to_path_buf());
    };

    fs::create_dir_all(dir)?;
    let target = dir.join(format!("{}.{}.{}", name, generation, LIBRARY_EXTENSION));
    fs::copy(source, &target)?;

    log::debug!("Shadow-copied {} to {}", source.display(), target.display());
    Ok(target)
}

fn discard_shadow_copy(source: &Path, loaded: &Path) {
    if source == loaded {
        return;
    }
    if let Err(e) = fs::remove_file(loaded) {
        log::debug!("Could not remove shadow copy {}: {}", loaded.display(), e);
    }
}

/// Open a library and resolve both plugin exports
fn open_plugin(
    loader: &dyn SharedLibraryLoader,
    path: &Path,
) -> Result<(Box<dyn SharedLibrary>, PluginLoadFn, PluginUnloadFn)> {
    let library = loader.load_library(path)?;

    let load = resolve(&*library, PLUGIN_LOAD_SYMBOL)?;
    let unload = resolve(&*library, PLUGIN_UNLOAD_SYMBOL)?;

    // Safety: both exports follow the plugin ABI by contract
    let (load_fn, unload_fn) = unsafe {
        (
            std::mem::transmute::<*const c_void, PluginLoadFn>(load),
            std::mem::transmute::<*const c_void, PluginUnloadFn>(unload),
        )
    };
    Ok((library, load_fn, unload_fn))
}

fn resolve(library: &dyn SharedLibrary, symbol: &str) -> Result<*const c_void> {
    library
        .load_function(symbol)
        .ok_or_else(|| PluginError::symbol_not_found(library.path().display().to_string(), symbol))
}

fn published_since(api: &ApiRegistry, mark: u64) -> Vec<(String, u64)> {
    api.published_since(mark)
        .into_iter()
        .filter_map(|name| {
            let sequence = api.stamp(&name)?.sequence;
            Some((name, sequence))
        })
        .collect()
}

/// Retract interfaces still holding the record a plugin published
///
/// Records another module overwrote since, and names in `keep`, are left
/// alone.
fn retract_owned(api: &ApiRegistry, apis: Vec<(String, u64)>, keep: &[&str]) -> Vec<String> {
    apis.into_iter()
        .filter(|(name, _)| !keep.contains(&name.as_str()))
        .filter(|(name, sequence)| api.stamp(name).map(|s| s.sequence) == Some(*sequence))
        .filter_map(|(name, _)| api.retract_api(&name).then_some(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("plugins/")), PathBuf::from("plugins"));
        assert_eq!(normalize_path(Path::new("plugins//")), PathBuf::from("plugins"));
        assert_eq!(normalize_path(Path::new("plugins")), PathBuf::from("plugins"));
        assert_eq!(normalize_path(Path::new("")), PathBuf::from("."));
    }

    #[test]
    fn test_stage_without_shadow_dir_is_identity() {
        let source = Path::new("/plugins/librender.so");
        assert_eq!(stage_library(None, source, "librender", 0).unwrap(), source);
    }

    #[test]
    fn test_stage_copies_into_shadow_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(format!("librender.{}", LIBRARY_EXTENSION));
        fs::write(&source, b"image").unwrap();
        let shadow = dir.path().join("shadow");

        let staged = stage_library(Some(&shadow), &source, "librender", 3).unwrap();
        assert_eq!(staged, shadow.join(format!("librender.3.{}", LIBRARY_EXTENSION)));
        assert_eq!(fs::read(&staged).unwrap(), b"image");

        discard_shadow_copy(&source, &staged);
        assert!(!staged.exists());
        assert!(source.exists());
    }

    #[test]
    fn test_retract_owned_skips_overwritten_records() {
        let api = ApiRegistry::new();
        api.set_api_bytes("mine", &[1; 8]).unwrap();
        api.set_api_bytes("shared", &[2; 8]).unwrap();
        let owned = published_since(&api, 0);

        // Another module takes over "shared"
        api.set_api_bytes("shared", &[3; 8]).unwrap();

        let retracted = retract_owned(&api, owned, &[]);
        assert_eq!(retracted, vec!["mine"]);
        assert!(!api.is_registered("mine"));
        assert!(api.is_registered("shared"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.state("anything"), PluginState::Unloaded);
        assert!(registry.get("anything").is_none());
    }
}
