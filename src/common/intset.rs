//! Compact set of machine integers
//!
//! Heap identities arrive in dense bursts (one allocation arena after
//! another) spread across a sparse 64-bit range. Keys are split into a
//! chunk number (the high 48 bits) and a 16-bit offset, so neighbouring
//! objects share one map entry even when they lie kilobytes apart.
//!
//! A chunk keeps its first few offsets inline in the map entry, spills
//! to a sorted vector of 16-bit offsets, and becomes a bitmap once it
//! fills past [`SPARSE_LIMIT`] entries, where the bitmap is the smaller
//! of the two. Keys further apart than a chunk each pay for one map
//! entry.

use std::collections::HashMap;
use std::iter::{once, FromIterator};
use std::mem::size_of;

use bitmaps::Bitmap;

const CHUNK_BITS: u32 = 16;
const CHUNK_SLOTS: usize = 1 << CHUNK_BITS;
const OFFSET_MASK: u64 = (CHUNK_SLOTS as u64) - 1;

const BITMAP_BITS: usize = 1024;
const BITMAPS_PER_CHUNK: usize = CHUNK_SLOTS / BITMAP_BITS;

type ChunkBits = [Bitmap<BITMAP_BITS>; BITMAPS_PER_CHUNK];

/// Offsets a chunk holds without a separate allocation
pub const INLINE_LIMIT: usize = 11;

/// Entries a sparse chunk holds before it becomes a bitmap
pub const SPARSE_LIMIT: usize = CHUNK_SLOTS / 16;

#[derive(Debug, Clone)]
enum Chunk {
    Inline {
        len: u8,
        offsets: [u16; INLINE_LIMIT],
    },
    Sparse(Vec<u16>),
    Dense(Box<ChunkBits>),
}

fn bit_position(offset: u16) -> (usize, usize) {
    let offset = offset as usize;
    (offset / BITMAP_BITS, offset % BITMAP_BITS)
}

fn to_dense<I: IntoIterator<Item = u16>>(offsets: I) -> Box<ChunkBits> {
    let mut bits = Box::new([Bitmap::<BITMAP_BITS>::new(); BITMAPS_PER_CHUNK]);
    for offset in offsets {
        let (word, bit) = bit_position(offset);
        bits[word].set(bit, true);
    }
    bits
}

impl Chunk {
    fn single(offset: u16) -> Self {
        let mut offsets = [0; INLINE_LIMIT];
        offsets[0] = offset;
        Chunk::Inline { len: 1, offsets }
    }

    fn contains(&self, offset: u16) -> bool {
        match self {
            Chunk::Inline { len, offsets } => {
                offsets[..*len as usize].binary_search(&offset).is_ok()
            }
            Chunk::Sparse(offsets) => offsets.binary_search(&offset).is_ok(),
            Chunk::Dense(bits) => {
                let (word, bit) = bit_position(offset);
                bits[word].get(bit)
            }
        }
    }

    /// Returns whether `offset` was newly added
    fn insert(&mut self, offset: u16) -> bool {
        match self {
            Chunk::Inline { len, offsets } => {
                let used = *len as usize;
                match offsets[..used].binary_search(&offset) {
                    Ok(_) => false,
                    Err(pos) if used < INLINE_LIMIT => {
                        offsets.copy_within(pos..used, pos + 1);
                        offsets[pos] = offset;
                        *len += 1;
                        true
                    }
                    Err(pos) => {
                        let mut spilled = Vec::with_capacity(2 * INLINE_LIMIT);
                        spilled.extend_from_slice(&offsets[..]);
                        spilled.insert(pos, offset);
                        *self = Chunk::Sparse(spilled);
                        true
                    }
                }
            }
            Chunk::Sparse(offsets) => match offsets.binary_search(&offset) {
                Ok(_) => false,
                Err(pos) if offsets.len() < SPARSE_LIMIT => {
                    offsets.insert(pos, offset);
                    true
                }
                Err(_) => {
                    let bits = to_dense(offsets.iter().copied().chain(once(offset)));
                    *self = Chunk::Dense(bits);
                    true
                }
            },
            Chunk::Dense(bits) => {
                let (word, bit) = bit_position(offset);
                !bits[word].set(bit, true)
            }
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            Chunk::Inline { .. } => 0,
            Chunk::Sparse(offsets) => offsets.capacity() * size_of::<u16>(),
            Chunk::Dense(_) => size_of::<ChunkBits>(),
        }
    }
}

fn split(key: u64) -> (u64, u16) {
    (key >> CHUNK_BITS, (key & OFFSET_MASK) as u16)
}

/// A set of `u64` keys, e.g. object identities
///
/// Signed keys are stored under their two's complement bit pattern,
/// so `-1` and `u64::MAX` are the same member.
#[derive(Debug, Clone, Default)]
pub struct CompactIntSet {
    chunks: HashMap<u64, Chunk>,
    len: usize,
}

impl CompactIntSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key`, returning whether it was newly added
    pub fn insert(&mut self, key: u64) -> bool {
        let (chunk, offset) = split(key);
        let added = match self.chunks.get_mut(&chunk) {
            Some(c) => c.insert(offset),
            None => {
                self.chunks.insert(chunk, Chunk::single(offset));
                true
            }
        };
        if added {
            self.len += 1;
        }
        added
    }

    pub fn contains(&self, key: u64) -> bool {
        let (chunk, offset) = split(key);
        self.chunks
            .get(&chunk)
            .map_or(false, |c| c.contains(offset))
    }

    pub fn insert_signed(&mut self, key: i64) -> bool {
        self.insert(key as u64)
    }

    pub fn contains_signed(&self, key: i64) -> bool {
        self.contains(key as u64)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// Number of chunks stored as bitmaps
    pub fn dense_chunks(&self) -> usize {
        self.chunks
            .values()
            .filter(|c| matches!(c, Chunk::Dense(_)))
            .count()
    }

    /// Number of chunks that have spilled out of their map entry
    pub fn spilled_chunks(&self) -> usize {
        self.chunks
            .values()
            .filter(|c| !matches!(c, Chunk::Inline { .. }))
            .count()
    }

    /// Approximate bytes held, including the chunk table and its
    /// control bytes
    pub fn memory_usage(&self) -> usize {
        let table = self.chunks.capacity() * (size_of::<u64>() + size_of::<Chunk>() + 1);
        table + self.chunks.values().map(Chunk::heap_bytes).sum::<usize>()
    }
}

impl Extend<u64> for CompactIntSet {
    fn extend<T: IntoIterator<Item = u64>>(&mut self, iter: T) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl FromIterator<u64> for CompactIntSet {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        let mut set = CompactIntSet::new();
        set.extend(iter);
        set
    }
}

#[cfg(test)]
pub mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    pub fn test_insert_and_contains() {
        let mut set = CompactIntSet::new();
        assert!(set.is_empty());
        assert!(set.insert(1));
        assert!(set.insert(1 << 40));
        assert!(!set.insert(1));
        assert!(set.contains(1));
        assert!(set.contains(1 << 40));
        assert!(!set.contains(2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    pub fn test_extremes() {
        let mut set = CompactIntSet::new();
        set.insert(0);
        set.insert(u64::MAX);
        assert!(set.contains(0));
        assert!(set.contains(u64::MAX));
        assert!(!set.contains(u64::MAX - 1));
    }

    #[test]
    pub fn test_signed_keys() {
        let mut set = CompactIntSet::new();
        assert!(set.insert_signed(-5));
        assert!(set.insert_signed(5));
        assert!(set.contains_signed(-5));
        assert!(!set.contains_signed(-6));
        assert!(set.contains(u64::MAX - 4));
        assert_eq!(set.len(), 2);
    }

    #[test]
    pub fn test_inline_chunk_spills() {
        let mut set = CompactIntSet::new();
        let base = 0x7f00_0000_0000;
        // out of order, so inline inserts have to shift
        let offsets: Vec<u64> = (0..=INLINE_LIMIT as u64).rev().map(|i| i * 48).collect();
        for o in &offsets[..INLINE_LIMIT] {
            assert!(set.insert(base + o));
        }
        assert_eq!(set.spilled_chunks(), 0);
        assert!(!set.insert(base + offsets[3]));
        assert!(set.insert(base + offsets[INLINE_LIMIT]));
        assert_eq!(set.spilled_chunks(), 1);
        for o in &offsets {
            assert!(set.contains(base + o));
            assert!(!set.contains(base + o + 1));
        }
        assert_eq!(set.len(), INLINE_LIMIT + 1);
    }

    #[test]
    pub fn test_chunk_becomes_dense() {
        let mut set = CompactIntSet::new();
        let base = 0x7f00_0000_0000;
        for i in 0..SPARSE_LIMIT as u64 {
            set.insert(base + i * 8);
        }
        assert_eq!(set.dense_chunks(), 0);
        set.insert(base + SPARSE_LIMIT as u64 * 8);
        assert_eq!(set.dense_chunks(), 1);
        for i in 0..=SPARSE_LIMIT as u64 {
            assert!(set.contains(base + i * 8));
            assert!(!set.contains(base + i * 8 + 1));
        }
        assert!(!set.insert(base));
        assert_eq!(set.len(), SPARSE_LIMIT + 1);
    }

    #[test]
    pub fn test_agrees_with_hash_set() {
        let mut set = CompactIntSet::new();
        let mut reference = HashSet::new();
        // arena-like bursts at widely separated bases
        let mut key: u64 = 0x5555_0000_1000;
        for i in 0..20_000u64 {
            key = key.wrapping_add(if i % 1000 == 0 { 1 << 33 } else { 16 + (i % 3) * 16 });
            assert_eq!(set.insert(key), reference.insert(key));
        }
        assert_eq!(set.len(), reference.len());
        for k in &reference {
            assert!(set.contains(*k));
            assert!(!set.contains(k ^ 8));
        }
    }

    #[test]
    pub fn test_clustered_keys_are_compact() {
        let set: CompactIntSet = (0..100_000u64).map(|i| 0x7f3a_0000_0000 + i * 16).collect();
        assert_eq!(set.len(), 100_000);
        assert!(set.memory_usage() < 100_000 * size_of::<u64>());
    }

    #[test]
    pub fn test_spread_keys_smaller_than_hash_set() {
        let n = 200_000u64;
        for spacing in [16u64, 64, 128, 512, 2048, 4096] {
            let keys: Vec<u64> = (0..n).map(|i| 0x7f3a_0000_0000 + i * spacing).collect();
            let set: CompactIntSet = keys.iter().copied().collect();
            let reference: HashSet<u64> = keys.iter().copied().collect();
            let hash_set_bytes = reference.capacity() * (size_of::<u64>() + 1);
            assert_eq!(set.len(), n as usize);
            assert!(
                set.memory_usage() < n as usize * size_of::<u64>(),
                "{} bytes for {} keys {} apart",
                set.memory_usage(),
                n,
                spacing
            );
            assert!(set.memory_usage() < hash_set_bytes);
        }
    }

    #[test]
    pub fn test_clear() {
        let mut set: CompactIntSet = [1, 2, 3].into_iter().collect();
        set.clear();
        assert!(set.is_empty());
        assert!(!set.contains(2));
    }
}
