//! String hashing and stable interface identifiers

use std::fmt;

const FNV_OFFSET_32: u32 = 0x811c_9dc5;
const FNV_PRIME_32: u32 = 0x0100_0193;
const FNV_OFFSET_64: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME_64: u64 = 0x0000_0100_0000_01b3;

/// 32-bit FNV-1a over raw bytes
#[inline]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_32;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME_32);
    }
    hash
}

/// 64-bit FNV-1a over raw bytes
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    fnv1a_64_from(FNV_OFFSET_64, bytes)
}

#[inline]
fn fnv1a_64_from(mut hash: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME_64);
    }
    hash
}

/// Hash used for map buckets
#[inline]
pub fn hash_str(key: &str) -> u32 {
    fnv1a_32(key.as_bytes())
}

/// Stable identifier of an interface schema: name plus version
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiId(u64);

impl ApiId {
    /// Identifier for `name` at schema `version`
    pub fn new(name: &str, version: u32) -> Self {
        let hash = fnv1a_64(name.as_bytes());
        let hash = fnv1a_64_from(hash, b"@");
        Self(fnv1a_64_from(hash, &version.to_le_bytes()))
    }

    /// Get the raw bits
    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ApiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiId({:016x})", self.0)
    }
}

impl fmt::Display for ApiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
