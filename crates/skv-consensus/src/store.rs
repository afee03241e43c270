//! openraft storage over [`LogStorage`] and [`StateMachineStore`].

use std::fmt::Debug;
use std::io::Cursor;
use std::ops::{Bound, RangeBounds};

use openraft::storage::{
    LogFlushed, LogState, RaftLogReader, RaftLogStorage, RaftSnapshotBuilder, RaftStateMachine,
};
use openraft::{EmptyNode, Entry, LogId, OptionalSend, SnapshotMeta, StorageError, StorageIOError};

use skv_storage::{LogStorage, Snapshot, StateMachineStore};
use skv_types::{KvResponse, NodeId, ShardId, SkvError};

use crate::types::{
    decode_membership, encode_wire, from_log_entry, from_stored_vote, log_id, position,
    to_applied_entry, to_log_entry, to_stored_vote, Membership, TypeConfig,
};

fn read_logs(e: SkvError) -> StorageError<NodeId> {
    StorageIOError::read_logs(&e).into()
}

fn write_logs(e: SkvError) -> StorageError<NodeId> {
    StorageIOError::write_logs(&e).into()
}

fn read_vote(e: SkvError) -> StorageError<NodeId> {
    StorageIOError::read_vote(&e).into()
}

fn write_vote(e: SkvError) -> StorageError<NodeId> {
    StorageIOError::write_vote(&e).into()
}

fn read_sm(e: SkvError) -> StorageError<NodeId> {
    StorageIOError::read_state_machine(&e).into()
}

fn write_sm(e: SkvError) -> StorageError<NodeId> {
    StorageIOError::write_state_machine(&e).into()
}

fn read_snapshot(e: SkvError) -> StorageError<NodeId> {
    StorageIOError::read_snapshot(None, &e).into()
}

fn write_snapshot(e: SkvError) -> StorageError<NodeId> {
    StorageIOError::write_snapshot(None, &e).into()
}

/// Inclusive index bounds of `range`, `None` when it is empty.
fn inclusive_bounds<RB: RangeBounds<u64>>(range: &RB) -> Option<(u64, u64)> {
    let from = match range.start_bound() {
        Bound::Included(&i) => i,
        Bound::Excluded(&i) => i.checked_add(1)?,
        Bound::Unbounded => 0,
    };
    let to = match range.end_bound() {
        Bound::Included(&i) => i,
        Bound::Excluded(&i) => i.checked_sub(1)?,
        Bound::Unbounded => u64::MAX,
    };
    (from <= to).then_some((from, to))
}

/// The Raft log of one shard replica.
#[derive(Clone)]
pub struct LogStore<L> {
    shard_id: ShardId,
    log: L,
}

impl<L: LogStorage> LogStore<L> {
    pub fn new(shard_id: ShardId, log: L) -> Self {
        LogStore { shard_id, log }
    }
}

impl<L: LogStorage> RaftLogReader<TypeConfig> for LogStore<L> {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let Some((from, to)) = inclusive_bounds(&range) else {
            return Ok(Vec::new());
        };
        self.log
            .get_entries(self.shard_id, from, to)
            .await
            .map_err(read_logs)?
            .into_iter()
            .map(from_log_entry)
            .collect::<Result<_, _>>()
            .map_err(read_logs)
    }
}

impl<L: LogStorage> RaftLogStorage<TypeConfig> for LogStore<L> {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let state = self.log.log_state(self.shard_id).await.map_err(read_logs)?;
        Ok(LogState {
            last_purged_log_id: state.last_purged.map(log_id),
            last_log_id: state.last.map(log_id),
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &openraft::Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.log.save_vote(self.shard_id, to_stored_vote(vote)).await.map_err(write_vote)
    }

    async fn read_vote(&mut self) -> Result<Option<openraft::Vote<NodeId>>, StorageError<NodeId>> {
        let vote = self.log.read_vote(self.shard_id).await.map_err(read_vote)?;
        Ok(vote.map(from_stored_vote))
    }

    async fn save_committed(&mut self, committed: Option<LogId<NodeId>>) -> Result<(), StorageError<NodeId>> {
        let committed = committed.as_ref().map(position);
        self.log.save_committed(self.shard_id, committed).await.map_err(write_logs)
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        let committed = self.log.read_committed(self.shard_id).await.map_err(read_logs)?;
        Ok(committed.map(log_id))
    }

    async fn append<I>(&mut self, entries: I, callback: LogFlushed<TypeConfig>) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let entries = entries
            .into_iter()
            .map(|e| to_log_entry(&e))
            .collect::<Result<Vec<_>, _>>()
            .map_err(write_logs)?;
        // LogStorage writes are durable on return, so the flush is complete.
        self.log.append(self.shard_id, entries).await.map_err(write_logs)?;
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        tracing::debug!(shard_id = self.shard_id, from = log_id.index, "truncating log suffix");
        self.log.truncate(self.shard_id, log_id.index).await.map_err(write_logs)
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        tracing::debug!(shard_id = self.shard_id, upto = log_id.index, "purging log prefix");
        self.log.purge(self.shard_id, position(&log_id)).await.map_err(write_logs)
    }
}

/// The key-value state machine of one shard replica. Snapshots it builds or
/// receives are persisted through the replica's log storage.
#[derive(Clone)]
pub struct StateMachine<S, L> {
    shard_id: ShardId,
    sm: S,
    log: L,
}

impl<S: StateMachineStore, L: LogStorage> StateMachine<S, L> {
    pub fn new(shard_id: ShardId, sm: S, log: L) -> Self {
        StateMachine { shard_id, sm, log }
    }
}

fn to_snapshot_meta(meta: &SnapshotMeta<NodeId, EmptyNode>) -> Result<skv_storage::SnapshotMeta, SkvError> {
    Ok(skv_storage::SnapshotMeta {
        last_log: meta.last_log_id.as_ref().map(position),
        membership: encode_wire(&meta.last_membership)?,
        snapshot_id: meta.snapshot_id.clone(),
    })
}

fn to_raft_snapshot(snapshot: Snapshot) -> Result<openraft::Snapshot<TypeConfig>, SkvError> {
    let last_membership: Membership = decode_membership(&snapshot.meta.membership)?;
    Ok(openraft::Snapshot {
        meta: SnapshotMeta {
            last_log_id: snapshot.meta.last_log.map(log_id),
            last_membership,
            snapshot_id: snapshot.meta.snapshot_id,
        },
        snapshot: Box::new(Cursor::new(snapshot.data)),
    })
}

impl<S: StateMachineStore, L: LogStorage> RaftSnapshotBuilder<TypeConfig> for StateMachine<S, L> {
    async fn build_snapshot(&mut self) -> Result<openraft::Snapshot<TypeConfig>, StorageError<NodeId>> {
        let snapshot = self.sm.build_snapshot(self.shard_id).await.map_err(read_sm)?;
        tracing::info!(
            shard_id = self.shard_id,
            last_log_index = snapshot.meta.last_log_index(),
            bytes = snapshot.data.len(),
            "snapshot built"
        );
        self.log.save_snapshot(self.shard_id, snapshot.clone()).await.map_err(write_snapshot)?;
        to_raft_snapshot(snapshot).map_err(read_snapshot)
    }
}

impl<S: StateMachineStore, L: LogStorage> RaftStateMachine<TypeConfig> for StateMachine<S, L> {
    type SnapshotBuilder = Self;

    async fn applied_state(&mut self) -> Result<(Option<LogId<NodeId>>, Membership), StorageError<NodeId>> {
        let (applied, membership) = self.sm.applied_state(self.shard_id).await.map_err(read_sm)?;
        let membership = decode_membership(&membership).map_err(read_sm)?;
        Ok((applied.map(log_id), membership))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<KvResponse>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut responses = Vec::new();
        for entry in entries {
            let entry = to_applied_entry(entry).map_err(write_sm)?;
            responses.push(self.sm.apply(self.shard_id, entry).await.map_err(write_sm)?);
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(&mut self) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, EmptyNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let snapshot = Snapshot {
            meta: to_snapshot_meta(meta).map_err(write_snapshot)?,
            data: (*snapshot).into_inner(),
        };
        tracing::info!(
            shard_id = self.shard_id,
            last_log_index = snapshot.meta.last_log_index(),
            bytes = snapshot.data.len(),
            "installing snapshot from leader"
        );
        self.sm.install_snapshot(self.shard_id, snapshot.clone()).await.map_err(write_snapshot)?;
        self.log.save_snapshot(self.shard_id, snapshot).await.map_err(write_snapshot)
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<openraft::Snapshot<TypeConfig>>, StorageError<NodeId>> {
        match self.log.read_snapshot(self.shard_id).await.map_err(read_snapshot)? {
            Some(snapshot) => Ok(Some(to_raft_snapshot(snapshot).map_err(read_snapshot)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use skv_storage::{LogEntry, LogPosition, MemLogStorage, MemStateMachine};
    use skv_types::{ClientWrite, KvCommand};

    use super::*;

    fn put(index: u64, key: &str) -> Entry<TypeConfig> {
        Entry {
            log_id: log_id(LogPosition::new(index, 1, 1)),
            payload: openraft::EntryPayload::Normal(ClientWrite::new(KvCommand::Put {
                key: key.into(),
                value: "v".into(),
            })),
        }
    }

    #[test]
    fn range_bounds_become_inclusive() {
        assert_eq!(inclusive_bounds(&(3..7)), Some((3, 6)));
        assert_eq!(inclusive_bounds(&(3..=7)), Some((3, 7)));
        assert_eq!(inclusive_bounds(&(5..)), Some((5, u64::MAX)));
        assert_eq!(inclusive_bounds(&(4..4)), None);
        assert_eq!(inclusive_bounds(&(..0)), None);
    }

    #[tokio::test]
    async fn log_reads_honour_the_requested_range() {
        let mut store = LogStore::new(2, MemLogStorage::new());
        let log = store.log.clone();
        log.append(2, (1..=6).map(|i| LogEntry::blank(i, 1)).collect()).await.unwrap();

        let entries = store.try_get_log_entries(2..5).await.unwrap();
        let indexes: Vec<u64> = entries.iter().map(|e| e.log_id.index).collect();
        assert_eq!(indexes, vec![2, 3, 4]);

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id.map(|id| id.index), Some(6));
        assert_eq!(state.last_purged_log_id, None);
    }

    #[tokio::test]
    async fn built_snapshot_is_persisted_and_served() {
        let log = MemLogStorage::new();
        let mut sm = StateMachine::new(0, MemStateMachine::new(), log.clone());
        let responses = sm.apply(vec![put(1, "a"), put(2, "b")]).await.unwrap();
        assert_eq!(responses, vec![KvResponse::Written { index: 1 }, KvResponse::Written { index: 2 }]);

        let built = sm.build_snapshot().await.unwrap();
        assert_eq!(built.meta.last_log_id.map(|id| id.index), Some(2));
        assert!(log.read_snapshot(0).await.unwrap().is_some());

        let current = sm.get_current_snapshot().await.unwrap().unwrap();
        assert_eq!(current.meta, built.meta);

        // A second replica installs it.
        let other_log = MemLogStorage::new();
        let other_sm = MemStateMachine::new();
        let mut other = StateMachine::new(0, other_sm.clone(), other_log.clone());
        other.install_snapshot(&current.meta, current.snapshot).await.unwrap();
        assert_eq!(other_sm.len().await, 2);
        assert_eq!(other.applied_state().await.unwrap().0.map(|id| id.index), Some(2));
        assert!(other_log.read_snapshot(0).await.unwrap().is_some());
    }
}
