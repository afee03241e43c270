use std::future::Future;

use skv_types::{KvEntry, KvResponse, ShardId, SkvError};

use crate::types::{LogEntry, LogPosition, LogState, Snapshot, Vote};

/// Durable Raft state, keyed by shard: log entries, the vote, the commit
/// position and the latest snapshot. One store may hold many shards.
///
/// Every write must be durable when its future resolves.
pub trait LogStorage: Clone + Send + Sync + 'static {
    /// Extent of the stored log.
    fn log_state(&self, shard_id: ShardId)
        -> impl Future<Output = Result<LogState, SkvError>> + Send;

    /// `None` for indexes that were never written or are already purged.
    fn get_entry(&self, shard_id: ShardId, index: u64)
        -> impl Future<Output = Result<Option<LogEntry>, SkvError>> + Send;

    /// Entries in `from..=to_inclusive` that are still present, ascending.
    fn get_entries(&self, shard_id: ShardId, from: u64, to_inclusive: u64)
        -> impl Future<Output = Result<Vec<LogEntry>, SkvError>> + Send;

    /// Write `entries`; an entry already stored at the same index is replaced.
    fn append(&self, shard_id: ShardId, entries: Vec<LogEntry>)
        -> impl Future<Output = Result<(), SkvError>> + Send;

    /// Drop the suffix starting at `from_index`.
    fn truncate(&self, shard_id: ShardId, from_index: u64)
        -> impl Future<Output = Result<(), SkvError>> + Send;

    /// Drop the prefix ending at `upto` and remember it as purged.
    fn purge(&self, shard_id: ShardId, upto: LogPosition)
        -> impl Future<Output = Result<(), SkvError>> + Send;

    /// Must be durable before the vote is granted.
    fn save_vote(&self, shard_id: ShardId, vote: Vote)
        -> impl Future<Output = Result<(), SkvError>> + Send;

    fn read_vote(&self, shard_id: ShardId)
        -> impl Future<Output = Result<Option<Vote>, SkvError>> + Send;

    /// Persist the commit position so a restarted node knows how far to replay.
    fn save_committed(&self, shard_id: ShardId, committed: Option<LogPosition>)
        -> impl Future<Output = Result<(), SkvError>> + Send;

    fn read_committed(&self, shard_id: ShardId)
        -> impl Future<Output = Result<Option<LogPosition>, SkvError>> + Send;

    /// Persist the latest snapshot, replacing any older one.
    fn save_snapshot(&self, shard_id: ShardId, snapshot: Snapshot)
        -> impl Future<Output = Result<(), SkvError>> + Send;

    fn read_snapshot(&self, shard_id: ShardId)
        -> impl Future<Output = Result<Option<Snapshot>, SkvError>> + Send;
}

/// The key-value state machine of a single shard.
///
/// Applying is deterministic: replaying the same committed entries from the
/// same starting point yields the same mapping on every replica. Clones share
/// one state, so the replication engine and readers see the same data.
pub trait StateMachineStore: Clone + Send + Sync + 'static {
    /// Newest applied entry and the encoded membership applied last (empty
    /// before the first membership entry).
    fn applied_state(&self, shard_id: ShardId)
        -> impl Future<Output = Result<(Option<LogPosition>, Vec<u8>), SkvError>> + Send;

    /// Apply a committed entry.
    ///
    /// Entries at or below the last applied index change nothing and yield
    /// `Noop`, as do `Blank` and `Membership` payloads. A write whose request
    /// id was applied before yields the recorded response without touching
    /// the data.
    fn apply(&self, shard_id: ShardId, entry: LogEntry)
        -> impl Future<Output = Result<KvResponse, SkvError>> + Send;

    /// Read the current value of a key.
    fn get(&self, shard_id: ShardId, key: &str)
        -> impl Future<Output = Result<Option<KvEntry>, SkvError>> + Send;

    /// Serialize the whole state for the shard into a `Snapshot`.
    fn build_snapshot(&self, shard_id: ShardId)
        -> impl Future<Output = Result<Snapshot, SkvError>> + Send;

    /// Replace the state machine contents with a snapshot.
    fn install_snapshot(&self, shard_id: ShardId, snapshot: Snapshot)
        -> impl Future<Output = Result<(), SkvError>> + Send;
}
