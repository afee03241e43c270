use std::collections::HashSet;
use std::ops::RangeInclusive;

use skv_types::{ShardId, SkvError};

/// Ordered `(upper_bound_inclusive, shard)` pairs covering the whole `u32`
/// hash space.
///
/// Invariants (checked in [`PartitionTable::new`]):
/// * at least one partition;
/// * bounds strictly increasing, the last one is `u32::MAX`;
/// * every shard owns exactly one contiguous range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    bounds: Vec<(u32, ShardId)>,
}

impl PartitionTable {
    pub fn new(bounds: Vec<(u32, ShardId)>) -> Result<Self, SkvError> {
        if bounds.is_empty() {
            return Err(SkvError::InvalidArgument("partition table is empty".into()));
        }
        for pair in bounds.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(SkvError::InvalidArgument(format!(
                    "partition bounds must be strictly increasing: {} >= {}",
                    pair[0].0, pair[1].0
                )));
            }
        }
        if let Some(&(last, _)) = bounds.last() {
            if last != u32::MAX {
                return Err(SkvError::InvalidArgument(format!(
                    "last partition bound must be {}, got {last}",
                    u32::MAX
                )));
            }
        }
        let mut seen = HashSet::new();
        for (_, shard) in &bounds {
            if !seen.insert(*shard) {
                return Err(SkvError::InvalidArgument(format!(
                    "shard {shard} owns more than one range"
                )));
            }
        }
        Ok(PartitionTable { bounds })
    }

    /// `n` contiguous ranges of (almost) equal width, shards `0..n`.
    pub fn even(n: u32) -> Result<Self, SkvError> {
        if n == 0 {
            return Err(SkvError::InvalidArgument("shard count must be positive".into()));
        }
        let width = (u64::from(u32::MAX) + 1) / u64::from(n);
        let bounds = (0..n)
            .map(|i| {
                let upper = if i + 1 == n {
                    u32::MAX
                } else {
                    (width * u64::from(i + 1) - 1) as u32
                };
                (upper, ShardId::from(i))
            })
            .collect();
        Self::new(bounds)
    }

    /// Shard 0 owns `hash <= split`, shard 1 owns the rest.
    pub fn two_way(split: u32) -> Result<Self, SkvError> {
        Self::new(vec![(split, 0), (u32::MAX, 1)])
    }

    pub fn route_hash(&self, hash: u32) -> ShardId {
        let pos = self.bounds.partition_point(|&(upper, _)| upper < hash);
        // The last bound is u32::MAX, so `pos` is always in range.
        self.bounds[pos.min(self.bounds.len() - 1)].1
    }

    pub fn owned_range(&self, shard: ShardId) -> Option<RangeInclusive<u32>> {
        let pos = self.bounds.iter().position(|&(_, s)| s == shard)?;
        let start = if pos == 0 { 0 } else { self.bounds[pos - 1].0 + 1 };
        Some(start..=self.bounds[pos].0)
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.bounds.iter().map(|&(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_cover_hash_space_exactly_once() {
        for n in [1u32, 2, 3, 7, 16, 255] {
            let table = PartitionTable::even(n).unwrap();
            let mut next_start: u64 = 0;
            for shard in table.shard_ids() {
                let range = table.owned_range(shard).unwrap();
                assert_eq!(u64::from(*range.start()), next_start, "gap or overlap at shard {shard}");
                assert!(range.start() <= range.end());
                next_start = u64::from(*range.end()) + 1;
            }
            assert_eq!(next_start, u64::from(u32::MAX) + 1);
        }
    }

    #[test]
    fn route_hash_respects_inclusive_bounds() {
        let table = PartitionTable::two_way(926_844_193).unwrap();
        assert_eq!(table.route_hash(0), 0);
        assert_eq!(table.route_hash(926_844_193), 0);
        assert_eq!(table.route_hash(926_844_194), 1);
        assert_eq!(table.route_hash(u32::MAX), 1);
    }

    #[test]
    fn route_hash_lands_inside_owned_range() {
        let table = PartitionTable::even(5).unwrap();
        for hash in [0u32, 1, 858_993_459, 858_993_460, 2_000_000_000, u32::MAX - 1, u32::MAX] {
            let shard = table.route_hash(hash);
            assert!(table.owned_range(shard).unwrap().contains(&hash));
        }
    }

    #[test]
    fn rejects_malformed_tables() {
        assert!(PartitionTable::new(vec![]).is_err());
        assert!(PartitionTable::new(vec![(10, 0), (10, 1), (u32::MAX, 2)]).is_err());
        assert!(PartitionTable::new(vec![(10, 0), (20, 1)]).is_err());
        assert!(PartitionTable::new(vec![(10, 0), (u32::MAX, 0)]).is_err());
        assert!(PartitionTable::even(0).is_err());
    }

    #[test]
    fn unknown_shard_has_no_range() {
        let table = PartitionTable::even(2).unwrap();
        assert!(table.owned_range(9).is_none());
        assert_eq!(table.len(), 2);
    }
}
