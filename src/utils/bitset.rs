//! A compact set of small indices.
//!
//! Graph traversals over node and block arenas mark elements as visited by index. [`BitSet`]
//! stores those marks in 64-bit words, which keeps a visited set for a few thousand blocks in a
//! handful of cache lines.
//!
//! # Example
//!
//! ```rust,ignore
//! use flowscope::utils::BitSet;
//!
//! let mut visited = BitSet::new(100);
//! assert!(visited.insert(7));
//! assert!(!visited.insert(7));
//! assert!(visited.contains(7));
//! ```

/// A fixed capacity set of indices in `0..capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    words: Vec<u64>,
    capacity: usize,
}

impl BitSet {
    /// Creates an empty set able to hold indices below `capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            capacity,
        }
    }

    /// Adds `index` to the set. Returns `true` if it was not present before.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the capacity.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.capacity, "index {index} out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    /// Returns `true` if `index` is in the set. Indices beyond the capacity are never contained.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.capacity && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }
}
