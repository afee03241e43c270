//! Deterministic key → shard routing.
//!
//! A key is hashed with 32-bit FNV-1a and the hash is classified against a
//! fixed, ordered table of inclusive upper bounds. The table is part of the
//! cluster's immutable configuration; nothing here changes at runtime.

pub mod table;
pub mod topology;

pub use table::PartitionTable;
pub use topology::{ClusterTopology, NodeSpec, ShardSpec};

use skv_types::ShardId;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over raw bytes.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Pure key → shard function.
#[derive(Debug, Clone)]
pub struct HashRouter {
    table: PartitionTable,
}

impl HashRouter {
    pub fn new(table: PartitionTable) -> Self {
        HashRouter { table }
    }

    /// Callers are expected to have validated the key already; any string,
    /// including the empty one, routes somewhere.
    pub fn route(&self, key: &str) -> ShardId {
        self.table.route_hash(fnv1a_32(key.as_bytes()))
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
        assert_eq!(fnv1a_32(b"foo"), 2_851_307_223);
        assert_eq!(fnv1a_32(b"apple"), 280_767_167);
    }

    #[test]
    fn route_is_deterministic() {
        let router = HashRouter::new(PartitionTable::even(8).unwrap());
        for i in 0..500 {
            let key = format!("user:{i}");
            let first = router.route(&key);
            for _ in 0..3 {
                assert_eq!(router.route(&key), first);
            }
            // A second router built from the same table agrees (restart).
            let again = HashRouter::new(PartitionTable::even(8).unwrap());
            assert_eq!(again.route(&key), first);
        }
    }

    #[test]
    fn two_way_split_matches_boundary() {
        let router = HashRouter::new(PartitionTable::two_way(926_844_193).unwrap());
        // "apple" hashes below the split, "foo" above it.
        assert_eq!(router.route("apple"), 0);
        assert_eq!(router.route("foo"), 1);
        assert_eq!(router.route("key1"), 1); // 927623783, just above the split
    }
}
