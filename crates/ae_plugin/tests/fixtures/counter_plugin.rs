//! Minimal native plugin compiled by `native_tests.rs`
//!
//! Publishes `counter_api` on load and bumps `counter_unloads` on unload,
//! talking to the host only through the C registry table.

use std::ffi::{c_char, c_void};

/// Leading fields of the host's registry table
#[allow(dead_code)]
#[repr(C)]
pub struct ApiRegistryApi {
    registry: *mut c_void,
    set_api: unsafe extern "C" fn(*mut ApiRegistryApi, *const c_char, *const c_void, u32),
    remove_api: unsafe extern "C" fn(*mut ApiRegistryApi, *const c_char) -> *mut c_void,
    get_api: unsafe extern "C" fn(*mut ApiRegistryApi, *const c_char, u32) -> *mut c_void,
}

#[repr(C)]
pub struct CounterApi {
    magic: u64,
    reloaded: u64,
}

#[no_mangle]
pub unsafe extern "C" fn plugin_load(registry: *mut ApiRegistryApi, reload: bool) {
    let Some(table) = registry.as_ref() else {
        return;
    };
    let api = CounterApi {
        magic: 0xA55E_0B1E,
        reloaded: reload as u64,
    };
    (table.set_api)(
        registry,
        b"counter_api\0".as_ptr() as *const c_char,
        &api as *const CounterApi as *const c_void,
        std::mem::size_of::<CounterApi>() as u32,
    );
}

#[no_mangle]
pub unsafe extern "C" fn plugin_unload(registry: *mut ApiRegistryApi) {
    let Some(table) = registry.as_ref() else {
        return;
    };
    let slot = (table.get_api)(registry, b"counter_unloads\0".as_ptr() as *const c_char, 8) as *mut u64;
    if let Some(count) = slot.as_mut() {
        *count += 1;
    }
}
