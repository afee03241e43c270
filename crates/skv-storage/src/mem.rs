use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use skv_types::codec::{decode, encode};
use skv_types::{KvCommand, KvEntry, KvResponse, ShardId, SkvError};

use crate::traits::{LogStorage, StateMachineStore};
use crate::types::{
    LogEntry, LogPayload, LogPosition, LogState, Snapshot, SnapshotContents, SnapshotMeta, Vote,
};

/// Request ids remembered for deduplication before the oldest are dropped.
pub const MAX_TRACKED_REQUESTS: usize = 10_000;

// ---------------------------------------------------------------------------
// MemLogStorage
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemLogInner {
    entries: BTreeMap<u64, LogEntry>,
    last_purged: Option<LogPosition>,
    vote: Option<Vote>,
    committed: Option<LogPosition>,
    snapshot: Option<Snapshot>,
}

/// In-memory `LogStorage` backed by a `BTreeMap`, one instance per shard.
///
/// Clones share the same log, which lets tests "restart" a replica on top of
/// the log it had before the crash.
#[derive(Clone, Default)]
pub struct MemLogStorage {
    inner: Arc<RwLock<MemLogInner>>,
}

impl MemLogStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStorage for MemLogStorage {
    async fn log_state(&self, _shard_id: ShardId) -> Result<LogState, SkvError> {
        let g = self.inner.read().await;
        Ok(LogState {
            first_index: g.entries.keys().next().copied(),
            last: g.entries.values().next_back().map(LogEntry::position).or(g.last_purged),
            last_purged: g.last_purged,
        })
    }

    async fn get_entry(&self, _shard_id: ShardId, index: u64) -> Result<Option<LogEntry>, SkvError> {
        Ok(self.inner.read().await.entries.get(&index).cloned())
    }

    async fn get_entries(
        &self,
        _shard_id: ShardId,
        from: u64,
        to_inclusive: u64,
    ) -> Result<Vec<LogEntry>, SkvError> {
        if from > to_inclusive {
            return Ok(Vec::new());
        }
        let g = self.inner.read().await;
        Ok(g.entries
            .range(from..=to_inclusive)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn append(&self, _shard_id: ShardId, entries: Vec<LogEntry>) -> Result<(), SkvError> {
        let mut g = self.inner.write().await;
        for entry in entries {
            g.entries.insert(entry.index, entry);
        }
        Ok(())
    }

    async fn truncate(&self, _shard_id: ShardId, from_index: u64) -> Result<(), SkvError> {
        let mut g = self.inner.write().await;
        g.entries.retain(|&idx, _| idx < from_index);
        Ok(())
    }

    async fn purge(&self, _shard_id: ShardId, upto: LogPosition) -> Result<(), SkvError> {
        let mut g = self.inner.write().await;
        g.entries.retain(|&idx, _| idx > upto.index);
        g.last_purged = Some(upto);
        Ok(())
    }

    async fn save_vote(&self, _shard_id: ShardId, vote: Vote) -> Result<(), SkvError> {
        self.inner.write().await.vote = Some(vote);
        Ok(())
    }

    async fn read_vote(&self, _shard_id: ShardId) -> Result<Option<Vote>, SkvError> {
        Ok(self.inner.read().await.vote.clone())
    }

    async fn save_committed(
        &self,
        _shard_id: ShardId,
        committed: Option<LogPosition>,
    ) -> Result<(), SkvError> {
        self.inner.write().await.committed = committed;
        Ok(())
    }

    async fn read_committed(&self, _shard_id: ShardId) -> Result<Option<LogPosition>, SkvError> {
        Ok(self.inner.read().await.committed)
    }

    async fn save_snapshot(&self, _shard_id: ShardId, snapshot: Snapshot) -> Result<(), SkvError> {
        self.inner.write().await.snapshot = Some(snapshot);
        Ok(())
    }

    async fn read_snapshot(&self, _shard_id: ShardId) -> Result<Option<Snapshot>, SkvError> {
        Ok(self.inner.read().await.snapshot.clone())
    }
}

// ---------------------------------------------------------------------------
// MemStateMachine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemSmInner {
    data: BTreeMap<String, KvEntry>,
    requests: HashMap<Uuid, KvResponse>,
    /// Insertion order of `requests`, oldest first.
    request_order: VecDeque<Uuid>,
    last_applied: Option<LogPosition>,
    membership: Vec<u8>,
}

impl MemSmInner {
    fn remember(&mut self, request_id: Uuid, response: KvResponse) {
        self.requests.insert(request_id, response);
        self.request_order.push_back(request_id);
        while self.request_order.len() > MAX_TRACKED_REQUESTS {
            if let Some(oldest) = self.request_order.pop_front() {
                self.requests.remove(&oldest);
            }
        }
    }

    fn write(&mut self, shard_id: ShardId, index: u64, command: KvCommand) -> KvResponse {
        match command {
            KvCommand::Put { key, value } => {
                tracing::trace!(shard_id, index, key = %key, "apply put");
                let entry = KvEntry { key: key.clone(), value, version: index };
                self.data.insert(key, entry);
                KvResponse::Written { index }
            }
            KvCommand::Delete { key } => {
                tracing::trace!(shard_id, index, key = %key, "apply delete");
                let found = self.data.remove(&key).is_some();
                KvResponse::Deleted { index, found }
            }
        }
    }
}

/// In-memory `StateMachineStore` backed by a `BTreeMap`.
///
/// Not persisted; a restarted replica rebuilds it from the latest snapshot
/// plus the committed log suffix.
#[derive(Clone, Default)]
pub struct MemStateMachine {
    inner: Arc<RwLock<MemSmInner>>,
}

impl MemStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        self.inner.read().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.data.is_empty()
    }

    /// Copy of the whole mapping, in key order.
    pub async fn dump(&self) -> Vec<KvEntry> {
        self.inner.read().await.data.values().cloned().collect()
    }

    /// Index of the newest applied entry.
    pub async fn last_applied_index(&self) -> Option<u64> {
        self.inner.read().await.last_applied.map(|p| p.index)
    }
}

impl StateMachineStore for MemStateMachine {
    async fn applied_state(
        &self,
        _shard_id: ShardId,
    ) -> Result<(Option<LogPosition>, Vec<u8>), SkvError> {
        let g = self.inner.read().await;
        Ok((g.last_applied, g.membership.clone()))
    }

    async fn apply(&self, shard_id: ShardId, entry: LogEntry) -> Result<KvResponse, SkvError> {
        let index = entry.index;
        let mut g = self.inner.write().await;
        if g.last_applied.is_some_and(|last| index <= last.index) {
            tracing::debug!(shard_id, index, "entry already applied, skipping");
            return Ok(KvResponse::Noop { index });
        }

        let position = entry.position();
        let response = match entry.payload {
            LogPayload::Blank => KvResponse::Noop { index },
            LogPayload::Membership(membership) => {
                g.membership = membership;
                KvResponse::Noop { index }
            }
            LogPayload::Normal(write) => {
                match write.request_id.and_then(|id| g.requests.get(&id).cloned()) {
                    Some(previous) => {
                        tracing::debug!(shard_id, index, "duplicate request id, returning recorded response");
                        previous
                    }
                    None => {
                        let response = g.write(shard_id, index, write.command);
                        if let Some(id) = write.request_id {
                            g.remember(id, response.clone());
                        }
                        response
                    }
                }
            }
        };

        g.last_applied = Some(position);
        Ok(response)
    }

    async fn get(&self, _shard_id: ShardId, key: &str) -> Result<Option<KvEntry>, SkvError> {
        Ok(self.inner.read().await.data.get(key).cloned())
    }

    async fn build_snapshot(&self, _shard_id: ShardId) -> Result<Snapshot, SkvError> {
        let g = self.inner.read().await;
        let contents = SnapshotContents {
            data: g.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            requests: g
                .request_order
                .iter()
                .filter_map(|id| g.requests.get(id).map(|r| (*id, r.clone())))
                .collect(),
        };
        Ok(Snapshot {
            meta: SnapshotMeta {
                last_log: g.last_applied,
                membership: g.membership.clone(),
                snapshot_id: Uuid::new_v4().to_string(),
            },
            data: encode(&contents)?,
        })
    }

    async fn install_snapshot(
        &self,
        shard_id: ShardId,
        snapshot: Snapshot,
    ) -> Result<(), SkvError> {
        let contents: SnapshotContents = decode(&snapshot.data)?;
        let mut g = self.inner.write().await;
        g.data = contents.data.into_iter().collect();
        g.requests.clear();
        g.request_order.clear();
        for (id, response) in contents.requests {
            g.remember(id, response);
        }
        g.last_applied = snapshot.meta.last_log;
        g.membership = snapshot.meta.membership;
        tracing::debug!(shard_id, keys = g.data.len(), "snapshot installed into state machine");
        Ok(())
    }
}
