use skv_types::ShardId;

/// Log entry key: shard id then index, both big-endian, so a shard's entries
/// are contiguous and iterate in index order.
pub fn raft_log_key(shard_id: ShardId, index: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&shard_id.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

pub fn raft_log_index(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(8..16)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Per-shard metadata key, e.g. `vote` or `committed`.
pub fn meta_key(shard_id: ShardId, label: &str) -> Vec<u8> {
    [shard_id.to_be_bytes().as_slice(), label.as_bytes()].concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_keys_order_numerically() {
        let keys: Vec<_> = [1u64, 2, 255, 256, 1000].iter().map(|&i| raft_log_key(4, i)).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn shards_occupy_disjoint_ranges() {
        assert!(raft_log_key(0, u64::MAX) < raft_log_key(1, 0));
        assert!(raft_log_key(1, u64::MAX) < raft_log_key(2, 1));
    }

    #[test]
    fn index_is_recoverable() {
        assert_eq!(raft_log_index(&raft_log_key(3, 77)), Some(77));
        assert_eq!(raft_log_index(&[0u8; 4]), None);
    }

    #[test]
    fn meta_labels_follow_the_shard_prefix() {
        let key = meta_key(9, "committed");
        assert_eq!(key.len(), 8 + "committed".len());
        assert!(key.starts_with(&9u64.to_be_bytes()));
        assert!(key.ends_with(b"committed"));
    }
}
