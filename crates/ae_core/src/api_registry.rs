//! API registry
//!
//! Type-keyed store of interface tables shared between the host and every
//! plugin. An interface is a flat `#[repr(C)]` struct (usually function
//! pointers) copied into a fixed-size slot keyed by its type name.
//!
//! `get_api` never fails for an unknown name: it reserves a zero-filled slot
//! and returns it, so a consumer can bind to an interface before its provider
//! has been loaded and read it once the provider publishes. Because of that a
//! zeroed slot means "not published yet"; use [`ApiRegistry::is_registered`]
//! when the distinction matters.
//!
//! Every published record carries an [`ApiStamp`]. Records published through
//! the typed Rust API are version-stamped, so a host and plugin built against
//! different schema versions fail loudly instead of reading a truncated table.

use std::ffi::c_void;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::blob::{BlobMap, SLOT_ALIGN};
use crate::error::{ApiError, Result};
use crate::ffi::{ApiRegistryApi, API_REGISTRY_API_NAME};
use crate::hash::ApiId;
use crate::hash_map::{StrHashMap, DEFAULT_CAPACITY};

/// An interface table that can be stored in the registry
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` without padding bytes, and the all-zero
/// bit pattern must be a valid value (use `Option<extern "C" fn ..>` for
/// function pointers). Any bytes published under [`Api::NAME`] with a matching
/// size must form a valid value of the type.
pub unsafe trait Api: Copy + 'static {
    /// Registry key, the interface's type name
    const NAME: &'static str;

    /// Schema version, bumped on any layout change
    const VERSION: u32 = 1;
}

/// Metadata recorded for every published interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiStamp {
    /// Identifier derived from name and version
    pub id: ApiId,
    /// Schema version, `None` for raw byte publications
    pub version: Option<u32>,
    /// Size of the published table in bytes
    pub size: usize,
    /// Registry sequence number at publication
    pub sequence: u64,
}

struct RegistryState {
    apis: BlobMap,
    stamps: StrHashMap<ApiStamp>,
    sequence: u64,
}

/// Registry storage plus the C ABI table pointing back at it
pub(crate) struct Shared {
    state: Mutex<RegistryState>,
    abi: ApiRegistryApi,
}

// Safety: the ABI table only holds a pointer back to this allocation, and all
// mutable state sits behind the mutex
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(ApiError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl Shared {
    pub(crate) fn set_bytes(&self, name: &str, bytes: &[u8], version: Option<u32>) -> Result<()> {
        validate_name(name)?;

        let mut state = self.state.lock();
        state.apis.insert(name, bytes)?;
        state.sequence += 1;

        let stamp = ApiStamp {
            id: ApiId::new(name, version.unwrap_or(0)),
            version,
            size: bytes.len(),
            sequence: state.sequence,
        };
        state.stamps.insert(name, stamp);

        log::debug!("Published interface '{}' ({} bytes, id {})", name, bytes.len(), stamp.id);
        Ok(())
    }

    pub(crate) fn reserve(&self, name: &str, size: usize) -> Result<(NonNull<u8>, usize)> {
        validate_name(name)?;

        let mut state = self.state.lock();
        let slot = state.apis.get_or_reserve(name, size)?;
        Ok((slot.as_non_null(), slot.len()))
    }

    pub(crate) fn count(&self, name: &str) -> u32 {
        self.state.lock().stamps.contains_key(name) as u32
    }
}

/// Snapshot handle to an interface slot
///
/// The slot address stays valid for the lifetime of the registry.
pub struct ApiSlot<'a> {
    shared: &'a Shared,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'a> ApiSlot<'a> {
    /// Stable address of the slot
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Slot size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the slot has no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy out the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        let _guard = self.shared.state.lock();
        // Safety: the slot is owned by the registry and never freed or moved
        // while the registry lives; writes happen under the same lock
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len).to_vec() }
    }

    /// Check if nothing has been written to the slot
    pub fn is_zeroed(&self) -> bool {
        self.to_vec().iter().all(|b| *b == 0)
    }
}

/// Process-wide store of interface tables
pub struct ApiRegistry {
    shared: Box<Shared>,
}

impl ApiRegistry {
    /// Create a registry with the default bucket count
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a registry with `capacity` buckets
    pub fn with_capacity(capacity: usize) -> Self {
        let mut shared = Box::new(Shared {
            state: Mutex::new(RegistryState {
                apis: BlobMap::with_capacity(capacity),
                stamps: StrHashMap::with_capacity(capacity),
                sequence: 0,
            }),
            abi: ApiRegistryApi::detached(),
        });

        let raw = &*shared as *const Shared as *mut c_void;
        shared.abi.registry = raw;

        Self { shared }
    }

    /// Pointer handed to plugins as their view of the registry
    ///
    /// Valid for as long as this registry lives. Plugins must treat the
    /// table as read-only.
    pub fn abi(&self) -> *mut ApiRegistryApi {
        &self.shared.abi as *const ApiRegistryApi as *mut ApiRegistryApi
    }

    /// Publish this registry's own table under `ae_api_registry_api`
    ///
    /// Lets plugins find the registry like any other interface.
    pub fn publish_self(&self) -> Result<()> {
        // Safety: the table is a plain `repr(C)` struct of pointers
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &self.shared.abi as *const ApiRegistryApi as *const u8,
                size_of::<ApiRegistryApi>(),
            )
        };
        self.shared.set_bytes(API_REGISTRY_API_NAME, bytes, None)
    }

    // ========== Raw Interfaces ==========

    /// Publish or overwrite an interface from raw bytes
    pub fn set_api_bytes(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.shared.set_bytes(name, bytes, None)
    }

    /// Get the slot for `name`, reserving a zeroed one of `size` bytes if needed
    pub fn get_api_bytes(&self, name: &str, size: usize) -> Result<ApiSlot<'_>> {
        let (ptr, len) = self.shared.reserve(name, size)?;
        Ok(ApiSlot {
            shared: &*self.shared,
            ptr,
            len,
        })
    }

    // ========== Typed Interfaces ==========

    /// Publish or overwrite a typed interface
    pub fn set_api<T: Api>(&self, api: &T) -> Result<()> {
        // Safety: `Api` types are padding-free `repr(C)` structs
        let bytes = unsafe {
            std::slice::from_raw_parts(api as *const T as *const u8, size_of::<T>())
        };
        self.shared.set_bytes(T::NAME, bytes, Some(T::VERSION))
    }

    /// Copy out a typed interface; all-zero if nothing was published yet
    pub fn get_api<T: Api>(&self) -> Result<T> {
        let ptr = self.api_ptr::<T>()?;
        let _guard = self.shared.state.lock();
        // Safety: the slot is aligned, at least `size_of::<T>()` bytes and
        // holds either zeroes or bytes published for `T::NAME`
        Ok(unsafe { ptr.as_ptr().read() })
    }

    /// Stable pointer to the slot of a typed interface
    ///
    /// The pointer stays valid for the lifetime of the registry and observes
    /// later publications.
    pub fn api_ptr<T: Api>(&self) -> Result<NonNull<T>> {
        if align_of::<T>() > SLOT_ALIGN {
            return Err(ApiError::Unsupported("interfaces aligned above 8 bytes"));
        }

        let mut state = self.shared.state.lock();

        if let Some(stamp) = state.stamps.get(T::NAME) {
            if let Some(version) = stamp.version {
                if version != T::VERSION {
                    return Err(ApiError::VersionMismatch {
                        name: T::NAME.to_string(),
                        registered: version,
                        requested: T::VERSION,
                    });
                }
            }
            if stamp.size != size_of::<T>() {
                return Err(ApiError::SizeMismatch {
                    name: T::NAME.to_string(),
                    expected: size_of::<T>(),
                    found: stamp.size,
                });
            }
        }

        let slot = state.apis.get_or_reserve(T::NAME, size_of::<T>())?;
        Ok(slot.as_non_null().cast())
    }

    // ========== Queries ==========

    /// Check if an interface has been published (not merely reserved)
    pub fn is_registered(&self, name: &str) -> bool {
        self.shared.state.lock().stamps.contains_key(name)
    }

    /// Number of published records for `name` (0 or 1)
    pub fn get_api_count(&self, name: &str) -> u32 {
        self.shared.count(name)
    }

    /// Stamp of a published interface
    pub fn stamp(&self, name: &str) -> Option<ApiStamp> {
        self.shared.state.lock().stamps.get(name).copied()
    }

    /// Names of all published interfaces in publication order
    pub fn api_names(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut names: Vec<(u64, String)> = state
            .stamps
            .iter()
            .map(|(name, stamp)| (stamp.sequence, name.to_string()))
            .collect();
        names.sort_unstable();
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Current publication sequence number
    pub fn sequence(&self) -> u64 {
        self.shared.state.lock().sequence
    }

    /// Names published (or re-published) after `sequence`
    pub fn published_since(&self, sequence: u64) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut names: Vec<(u64, String)> = state
            .stamps
            .iter()
            .filter(|(_, stamp)| stamp.sequence > sequence)
            .map(|(name, stamp)| (stamp.sequence, name.to_string()))
            .collect();
        names.sort_unstable();
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Number of slots, reserved or published
    pub fn slot_count(&self) -> usize {
        self.shared.state.lock().apis.len()
    }

    // ========== Removal ==========

    /// Removing interfaces is not supported: handed-out slot pointers must stay valid
    pub fn remove_api(&self, name: &str) -> Result<()> {
        log::warn!("remove_api('{}') ignored: interface removal is not supported", name);
        Err(ApiError::Unsupported("remove_api"))
    }

    /// Zero a published interface in place and drop its stamp
    ///
    /// Used when the publishing module goes away; the slot keeps its address
    /// so consumers holding it observe "not published" instead of dangling
    /// function pointers. Returns whether the interface was published.
    pub fn retract_api(&self, name: &str) -> bool {
        let mut state = self.shared.state.lock();
        if let Some(slot) = state.apis.get_mut(name) {
            slot.zero();
        }
        let published = state.stamps.remove(name).is_some();
        if published {
            log::debug!("Retracted interface '{}'", name);
        }
        published
    }

    // ========== Objects ==========

    /// Object records are not supported
    pub fn add_object(&self, name: &str, _object: &[u8]) -> Result<()> {
        log::warn!("add_object('{}') ignored: object records are not supported", name);
        Err(ApiError::Unsupported("add_object"))
    }

    /// Object records are not supported; always `None`
    pub fn get_object(&self, _name: &str) -> Option<ApiSlot<'_>> {
        None
    }

    /// Object records are not supported
    pub fn remove_object(&self, _name: &str) -> Result<()> {
        Err(ApiError::Unsupported("remove_object"))
    }

    /// Object records are not supported; always 0
    pub fn get_object_count(&self, _name: &str) -> u32 {
        0
    }
}

impl Default for ApiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ApiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ApiRegistry")
            .field("published", &state.stamps.len())
            .field("slots", &state.apis.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, Debug)]
    struct CounterApi {
        next: Option<extern "C" fn(u32) -> u32>,
        base: u64,
    }

    unsafe impl Api for CounterApi {
        const NAME: &'static str = "counter_api";
        const VERSION: u32 = 2;
    }

    extern "C" fn next(value: u32) -> u32 {
        value + 1
    }

    #[test]
    fn test_unregistered_is_zeroed_not_null() {
        let registry = ApiRegistry::new();
        let slot = registry.get_api_bytes("ae_window_api", 32).unwrap();

        assert!(!slot.as_ptr().is_null());
        assert_eq!(slot.len(), 32);
        assert!(slot.is_zeroed());
        assert!(!registry.is_registered("ae_window_api"));
        assert_eq!(registry.get_api_count("ae_window_api"), 0);
    }

    #[test]
    fn test_typed_round_trip() {
        let registry = ApiRegistry::new();
        registry
            .set_api(&CounterApi { next: Some(next), base: 41 })
            .unwrap();

        let api = registry.get_api::<CounterApi>().unwrap();
        assert_eq!(api.base, 41);
        assert_eq!((api.next.unwrap())(1), 2);

        let stamp = registry.stamp("counter_api").unwrap();
        assert_eq!(stamp.version, Some(2));
        assert_eq!(stamp.id, ApiId::new("counter_api", 2));
    }

    #[test]
    fn test_typed_get_before_set_sees_later_publication() {
        let registry = ApiRegistry::new();
        let early = registry.get_api::<CounterApi>().unwrap();
        assert!(early.next.is_none());

        let ptr = registry.api_ptr::<CounterApi>().unwrap();
        registry
            .set_api(&CounterApi { next: Some(next), base: 7 })
            .unwrap();

        assert_eq!(registry.api_ptr::<CounterApi>().unwrap(), ptr);
        assert_eq!(registry.get_api::<CounterApi>().unwrap().base, 7);
    }

    #[test]
    fn test_raw_publication_with_wrong_size_fails_loudly() {
        let registry = ApiRegistry::new();
        registry.set_api_bytes("counter_api", &[0u8; 8]).unwrap();

        let err = registry.get_api::<CounterApi>().unwrap_err();
        assert!(matches!(err, ApiError::SizeMismatch { expected: 16, found: 8, .. }));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let registry = ApiRegistry::new();
        assert!(matches!(registry.set_api_bytes("", &[1]), Err(ApiError::InvalidName(_))));
        assert!(matches!(registry.get_api_bytes("bad\0name", 4), Err(ApiError::InvalidName(_))));
    }

    #[test]
    fn test_remove_api_is_unsupported() {
        let registry = ApiRegistry::new();
        registry.set_api_bytes("kept", &[5; 4]).unwrap();

        assert_eq!(registry.remove_api("kept"), Err(ApiError::Unsupported("remove_api")));
        assert!(registry.is_registered("kept"));
        assert_eq!(registry.get_api_bytes("kept", 4).unwrap().to_vec(), vec![5; 4]);
    }

    #[test]
    fn test_retract_zeroes_in_place() {
        let registry = ApiRegistry::new();
        registry.set_api_bytes("plugin_api", &[3; 8]).unwrap();
        let before = registry.get_api_bytes("plugin_api", 8).unwrap().as_ptr();

        assert!(registry.retract_api("plugin_api"));
        assert!(!registry.retract_api("plugin_api"));

        let slot = registry.get_api_bytes("plugin_api", 8).unwrap();
        assert_eq!(slot.as_ptr(), before);
        assert!(slot.is_zeroed());
        assert!(!registry.is_registered("plugin_api"));
    }

    #[test]
    fn test_published_since_tracks_sequence() {
        let registry = ApiRegistry::new();
        registry.set_api_bytes("first", &[1]).unwrap();
        let mark = registry.sequence();

        registry.set_api_bytes("second", &[2]).unwrap();
        registry.set_api_bytes("first", &[3]).unwrap();

        assert_eq!(registry.published_since(mark), vec!["second", "first"]);
        assert_eq!(registry.api_names(), vec!["second", "first"]);
    }

    #[test]
    fn test_publish_self() {
        let registry = ApiRegistry::new();
        registry.publish_self().unwrap();

        let slot = registry
            .get_api_bytes(API_REGISTRY_API_NAME, size_of::<ApiRegistryApi>())
            .unwrap();
        // Safety: the slot holds a byte copy of the registry's own table
        let table = unsafe { &*(slot.as_ptr() as *const ApiRegistryApi) };
        assert_eq!(table.registry, unsafe { (*registry.abi()).registry });
    }

    #[test]
    fn test_object_namespace_is_inert() {
        let registry = ApiRegistry::new();
        assert!(registry.add_object("thing", &[1, 2]).is_err());
        assert!(registry.get_object("thing").is_none());
        assert!(registry.remove_object("thing").is_err());
        assert_eq!(registry.get_object_count("thing"), 0);
    }
}
