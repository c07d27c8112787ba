//! Table name hashing.

use crate::types::TableId;
use std::fmt;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Maps a table name to its [`TableId`].
pub trait TableHasher: Send + Sync + fmt::Debug {
    /// Hashes a table name.
    fn table_id(&self, name: &str) -> TableId;
}

/// 64-bit FNV-1a over the UTF-8 bytes of the name.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fnv1aHasher;

impl Fnv1aHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes raw bytes.
    #[must_use]
    pub const fn hash_bytes(bytes: &[u8]) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
            i += 1;
        }
        hash
    }
}

impl TableHasher for Fnv1aHasher {
    fn table_id(&self, name: &str) -> TableId {
        TableId::new(Self::hash_bytes(name.as_bytes()))
    }
}
