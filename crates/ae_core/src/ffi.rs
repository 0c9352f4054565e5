//! C ABI types shared with plugins
//!
//! Plugins never see [`ApiRegistry`](crate::ApiRegistry) directly. They receive
//! a pointer to [`ApiRegistryApi`], a `#[repr(C)]` table of `extern "C"` entry
//! points whose first field points back at the registry. Layouts here must
//! stay in sync with the C header plugins are compiled against.
//!
//! Entry points never unwind: bad pointers, invalid names and rejected writes
//! are logged and reported as null / 0.

use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::size_of;
use std::ptr;

use crate::api_registry::{Api, Shared};

/// Symbol every plugin exports to be initialized
pub const PLUGIN_LOAD_SYMBOL: &str = "plugin_load";

/// Symbol every plugin exports to be torn down
pub const PLUGIN_UNLOAD_SYMBOL: &str = "plugin_unload";

/// Name the registry publishes its own table under
pub const API_REGISTRY_API_NAME: &str = "ae_api_registry_api";

/// `plugin_load(api_registry, reload)`
pub type PluginLoadFn = unsafe extern "C" fn(registry: *mut ApiRegistryApi, reload: bool);

/// `plugin_unload(api_registry)`
pub type PluginUnloadFn = unsafe extern "C" fn(registry: *mut ApiRegistryApi);

pub type SetApiFn =
    unsafe extern "C" fn(this: *mut ApiRegistryApi, name: *const c_char, api: *const c_void, size: u32);
pub type RemoveApiFn = unsafe extern "C" fn(this: *mut ApiRegistryApi, name: *const c_char) -> *mut c_void;
pub type GetApiFn =
    unsafe extern "C" fn(this: *mut ApiRegistryApi, name: *const c_char, size: u32) -> *mut c_void;
pub type GetCountFn = unsafe extern "C" fn(this: *mut ApiRegistryApi, name: *const c_char) -> u32;
pub type AddObjectFn = unsafe extern "C" fn(
    this: *mut ApiRegistryApi,
    name: *const c_char,
    object: *mut c_void,
    size: u32,
) -> *mut c_void;
pub type GetObjectFn = unsafe extern "C" fn(this: *mut ApiRegistryApi, name: *const c_char) -> *mut c_void;

/// The registry as plugins see it
#[repr(C)]
pub struct ApiRegistryApi {
    /// Opaque pointer to the owning registry
    pub registry: *mut c_void,
    /// Publish or overwrite an interface
    pub set_api: SetApiFn,
    /// Declared, unsupported: always returns null
    pub remove_api: RemoveApiFn,
    /// Get an interface slot, reserving a zeroed one if needed
    pub get_api: GetApiFn,
    /// 1 if the interface is published, else 0
    pub get_api_count: GetCountFn,
    /// Declared, unsupported: always returns null
    pub add_object: AddObjectFn,
    /// Declared, unsupported: always returns null
    pub remove_object: RemoveApiFn,
    /// Declared, unsupported: always returns null
    pub get_object: GetObjectFn,
    /// Declared, unsupported: always returns 0
    pub get_object_count: GetCountFn,
}

impl ApiRegistryApi {
    /// Table with every entry point wired but no registry attached yet
    pub(crate) fn detached() -> Self {
        Self {
            registry: ptr::null_mut(),
            set_api: abi_set_api,
            remove_api: abi_remove_api,
            get_api: abi_get_api,
            get_api_count: abi_get_api_count,
            add_object: abi_add_object,
            remove_object: abi_remove_api,
            get_object: abi_get_object,
            get_object_count: abi_get_object_count,
        }
    }
}

unsafe fn shared_from<'a>(this: *mut ApiRegistryApi) -> Option<&'a Shared> {
    let table = this.as_ref()?;
    (table.registry as *const Shared).as_ref()
}

unsafe fn name_from<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    match CStr::from_ptr(name).to_str() {
        Ok(name) => Some(name),
        Err(_) => {
            log::warn!("Interface name is not valid UTF-8");
            None
        }
    }
}

unsafe extern "C" fn abi_set_api(
    this: *mut ApiRegistryApi,
    name: *const c_char,
    api: *const c_void,
    size: u32,
) {
    let (Some(shared), Some(name)) = (shared_from(this), name_from(name)) else {
        return;
    };
    if api.is_null() {
        log::warn!("set_api('{}') called with a null table", name);
        return;
    }

    let bytes = std::slice::from_raw_parts(api as *const u8, size as usize);
    if let Err(e) = shared.set_bytes(name, bytes, None) {
        log::warn!("set_api('{}') rejected: {}", name, e);
    }
}

unsafe extern "C" fn abi_get_api(this: *mut ApiRegistryApi, name: *const c_char, size: u32) -> *mut c_void {
    let (Some(shared), Some(name)) = (shared_from(this), name_from(name)) else {
        return ptr::null_mut();
    };

    match shared.reserve(name, size as usize) {
        Ok((slot, _)) => slot.as_ptr() as *mut c_void,
        Err(e) => {
            log::warn!("get_api('{}') failed: {}", name, e);
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn abi_get_api_count(this: *mut ApiRegistryApi, name: *const c_char) -> u32 {
    match (shared_from(this), name_from(name)) {
        (Some(shared), Some(name)) => shared.count(name),
        _ => 0,
    }
}

unsafe extern "C" fn abi_remove_api(_this: *mut ApiRegistryApi, _name: *const c_char) -> *mut c_void {
    ptr::null_mut()
}

unsafe extern "C" fn abi_add_object(
    _this: *mut ApiRegistryApi,
    _name: *const c_char,
    _object: *mut c_void,
    _size: u32,
) -> *mut c_void {
    ptr::null_mut()
}

unsafe extern "C" fn abi_get_object(_this: *mut ApiRegistryApi, _name: *const c_char) -> *mut c_void {
    ptr::null_mut()
}

unsafe extern "C" fn abi_get_object_count(_this: *mut ApiRegistryApi, _name: *const c_char) -> u32 {
    0
}

/// Publish a typed interface through a registry table
///
/// Plugin-side counterpart of [`ApiRegistry::set_api`](crate::ApiRegistry::set_api).
///
/// # Safety
/// `registry` must be null or point to a live table handed out by the host.
pub unsafe fn publish<T: Api>(registry: *mut ApiRegistryApi, api: &T) {
    let Some(table) = registry.as_ref() else {
        return;
    };
    let Ok(name) = CString::new(T::NAME) else {
        return;
    };
    (table.set_api)(registry, name.as_ptr(), api as *const T as *const c_void, size_of::<T>() as u32);
}

/// Get the slot of a typed interface through a registry table
///
/// Returns null only if the table is null or the lookup was rejected; an
/// interface that has not been published yet comes back zero-filled.
///
/// # Safety
/// `registry` must be null or point to a live table handed out by the host.
pub unsafe fn lookup<T: Api>(registry: *mut ApiRegistryApi) -> *mut T {
    let Some(table) = registry.as_ref() else {
        return ptr::null_mut();
    };
    let Ok(name) = CString::new(T::NAME) else {
        return ptr::null_mut();
    };
    (table.get_api)(registry, name.as_ptr(), size_of::<T>() as u32) as *mut T
}
