//! Fixed-size opaque byte slots
//!
//! A [`Blob`] is allocated once with its final size and never moves or grows,
//! so a pointer handed out for a slot stays valid for as long as the slot is
//! kept in its map. Storage is word-backed, which gives every slot 8-byte
//! alignment for the `#[repr(C)]` tables stored in it.

use std::ptr::NonNull;

use crate::error::{ApiError, Result};
use crate::hash_map::StrHashMap;

/// Largest alignment a slot guarantees
pub const SLOT_ALIGN: usize = std::mem::align_of::<u64>();

/// A heap slot holding a fixed number of bytes
pub struct Blob {
    words: Box<[u64]>,
    len: usize,
}

impl Blob {
    /// Allocate a zero-filled slot of `len` bytes
    pub fn zeroed(len: usize) -> Self {
        let words = (len + SLOT_ALIGN - 1) / SLOT_ALIGN;
        Self {
            words: vec![0u64; words].into_boxed_slice(),
            len,
        }
    }

    /// Allocate a slot holding a copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut blob = Self::zeroed(bytes.len());
        blob.as_bytes_mut().copy_from_slice(bytes);
        blob
    }

    /// View the slot contents
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    /// Mutable view of the slot contents
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// Stable address of the first byte
    pub fn as_non_null(&mut self) -> NonNull<u8> {
        NonNull::from(bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)).cast()
    }

    /// Copy `bytes` over the start of the slot without reallocating
    pub fn overwrite(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.len {
            return Err(ApiError::slot_overflow(key, self.len, bytes.len()));
        }
        self.as_bytes_mut()[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reset every byte to zero
    pub fn zero(&mut self) {
        self.words.fill(0);
    }

    /// Size of the slot in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the slot has no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if every byte is zero
    pub fn is_zeroed(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob").field("len", &self.len).finish()
    }
}

/// String-keyed store of fixed-size blobs
#[derive(Debug, Default)]
pub struct BlobMap {
    slots: StrHashMap<Blob>,
}

impl BlobMap {
    /// Create a map with the default bucket count
    pub fn new() -> Self {
        Self {
            slots: StrHashMap::new(),
        }
    }

    /// Create a map with `capacity` buckets (rounded to a power of two)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: StrHashMap::with_capacity(capacity),
        }
    }

    /// Store a copy of `value` under `key`
    ///
    /// An existing slot is overwritten in place and keeps its address and
    /// size; a value larger than the slot is rejected.
    pub fn insert(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if let Some(slot) = self.slots.get_mut(key) {
            return slot.overwrite(key, value);
        }
        self.slots.insert(key, Blob::from_bytes(value));
        Ok(())
    }

    /// Get the slot for `key`, reserving a zero-filled one of `size` bytes on a miss
    pub fn get_or_reserve(&mut self, key: &str, size: usize) -> Result<&mut Blob> {
        let slot = self.slots.get_or_insert_with(key, || {
            log::debug!("Reserved {} byte slot for '{}'", size, key);
            Blob::zeroed(size)
        });

        if slot.len() < size {
            return Err(ApiError::slot_overflow(key, slot.len(), size));
        }
        Ok(slot)
    }

    /// Get a slot by key
    pub fn get(&self, key: &str) -> Option<&Blob> {
        self.slots.get(key)
    }

    /// Get a mutable slot by key
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Blob> {
        self.slots.get_mut(key)
    }

    /// Remove and free a slot
    pub fn remove(&mut self, key: &str) -> Option<Blob> {
        self.slots.remove(key)
    }

    /// Check if a key has a slot
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Iterate over all keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys()
    }

    /// Free every slot
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current number of buckets
    pub fn bucket_count(&self) -> usize {
        self.slots.bucket_count()
    }

    /// How many times the table has doubled
    pub fn resize_count(&self) -> usize {
        self.slots.resize_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_alignment_and_size() {
        let mut blob = Blob::zeroed(13);
        assert_eq!(blob.len(), 13);
        assert_eq!(blob.as_bytes().len(), 13);
        assert!(blob.is_zeroed());
        assert_eq!(blob.as_non_null().as_ptr() as usize % SLOT_ALIGN, 0);
    }

    #[test]
    fn test_insert_round_trip() {
        let mut map = BlobMap::new();
        map.insert("ae_window_api", &[1, 2, 3, 4]).unwrap();
        assert_eq!(map.get("ae_window_api").unwrap().as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_overwrite_keeps_slot_address() {
        let mut map = BlobMap::new();
        map.insert("api", &[0xAA; 16]).unwrap();
        let before = map.get_mut("api").unwrap().as_non_null();

        map.insert("api", &[0xBB; 8]).unwrap();
        let slot = map.get_mut("api").unwrap();
        assert_eq!(slot.as_non_null(), before);
        assert_eq!(slot.len(), 16);
        assert_eq!(&slot.as_bytes()[..8], &[0xBB; 8]);
        assert_eq!(&slot.as_bytes()[8..], &[0xAA; 8]);
    }

    #[test]
    fn test_oversized_overwrite_is_rejected() {
        let mut map = BlobMap::new();
        map.insert("api", &[1; 4]).unwrap();

        let err = map.insert("api", &[2; 8]).unwrap_err();
        assert_eq!(err, ApiError::slot_overflow("api", 4, 8));
        assert_eq!(map.get("api").unwrap().as_bytes(), &[1; 4]);
    }

    #[test]
    fn test_get_or_reserve_zero_fills() {
        let mut map = BlobMap::new();
        let slot = map.get_or_reserve("unregistered", 24).unwrap();
        assert_eq!(slot.len(), 24);
        assert!(slot.is_zeroed());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_get_or_reserve_then_fill() {
        let mut map = BlobMap::new();
        let reserved = map.get_or_reserve("late", 8).unwrap().as_non_null();

        map.insert("late", &7u64.to_ne_bytes()).unwrap();
        let slot = map.get_or_reserve("late", 8).unwrap();
        assert_eq!(slot.as_non_null(), reserved);
        assert_eq!(slot.as_bytes(), &7u64.to_ne_bytes());
    }

    #[test]
    fn test_slots_survive_resize() {
        let mut map = BlobMap::with_capacity(16);
        let first = map.get_or_reserve("key_0", 8).unwrap().as_non_null();

        for i in 1..49u32 {
            map.insert(&format!("key_{i}"), &i.to_le_bytes()).unwrap();
        }

        assert!(map.resize_count() >= 1);
        assert_eq!(map.get_or_reserve("key_0", 8).unwrap().as_non_null(), first);
        for i in 1..49u32 {
            assert_eq!(map.get(&format!("key_{i}")).unwrap().as_bytes(), &i.to_le_bytes());
        }
    }

    #[test]
    fn test_remove_frees_slot() {
        let mut map = BlobMap::new();
        map.insert("gone", &[9; 3]).unwrap();
        let removed = map.remove("gone").unwrap();
        assert_eq!(removed.as_bytes(), &[9; 3]);
        assert!(!map.contains_key("gone"));
        assert!(map.is_empty());
    }
}
