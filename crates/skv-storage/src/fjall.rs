use std::path::Path;
use std::sync::Arc;

use skv_types::codec::{decode, encode};
use skv_types::{ShardId, SkvError};

use crate::keys::{meta_key, raft_log_index, raft_log_key};
use crate::traits::LogStorage;
use crate::types::{LogEntry, LogPosition, LogState, Snapshot, Vote};

fn fjall_err(e: fjall::Error) -> SkvError {
    SkvError::Storage(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> SkvError {
    SkvError::Storage(e.to_string())
}

/// One fjall database per node, shared by all of its shard replicas.
///
/// `raft_log` maps [`raft_log_key`] to an encoded [`LogEntry`]; `meta` maps
/// [`meta_key`] labels (`vote`, `committed`, `last_purged`, `snapshot`) to
/// encoded values. A purge and its `last_purged` marker go in one batch.
pub struct FjallStore {
    pub db: fjall::Database,
    pub raft_log: fjall::Keyspace,
    pub meta: fjall::Keyspace,
}

impl FjallStore {
    /// Creates the directory and keyspaces on first use.
    pub fn open(path: &Path) -> Result<Arc<Self>, SkvError> {
        let db = fjall::Database::builder(path).open().map_err(fjall_err)?;
        let raft_log =
            db.keyspace("raft_log", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        let meta =
            db.keyspace("meta", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        Ok(Arc::new(FjallStore { db, raft_log, meta }))
    }

    fn read_meta<T: for<'de> serde::Deserialize<'de>>(
        &self,
        shard_id: ShardId,
        label: &str,
    ) -> Result<Option<T>, SkvError> {
        match self.meta.get(meta_key(shard_id, label)).map_err(fjall_err)? {
            Some(b) => Ok(Some(decode::<T>(&b)?)),
            None => Ok(None),
        }
    }

    fn write_meta<T: serde::Serialize>(
        &self,
        shard_id: ShardId,
        label: &str,
        value: &T,
    ) -> Result<(), SkvError> {
        self.meta
            .insert(meta_key(shard_id, label), encode(value)?)
            .map_err(fjall_err)
    }

    /// Flush the journal to disk. Raft may only acknowledge a vote or an
    /// append once this returns.
    fn sync(&self) -> Result<(), SkvError> {
        self.db.persist(fjall::PersistMode::SyncAll).map_err(fjall_err)
    }

    fn log_keys(&self, start: Vec<u8>, end: Vec<u8>) -> Result<Vec<Vec<u8>>, SkvError> {
        self.raft_log
            .range(start..=end)
            .map(|g| g.into_inner().map(|(k, _)| k.to_vec()).map_err(fjall_err))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FjallLogStorage
// ---------------------------------------------------------------------------

/// Durable `LogStorage` backed by fjall. Several shards may share one
/// `FjallStore`; all keys are shard-prefixed.
///
/// All blocking I/O is wrapped in `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct FjallLogStorage(pub Arc<FjallStore>);

impl LogStorage for FjallLogStorage {
    async fn log_state(&self, shard_id: ShardId) -> Result<LogState, SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<LogState, SkvError> {
            let start = raft_log_key(shard_id, 0).to_vec();
            let end = raft_log_key(shard_id, u64::MAX).to_vec();

            let first_index = match store.raft_log.range(start.clone()..=end.clone()).next() {
                Some(guard) => {
                    let (k, _) = guard.into_inner().map_err(fjall_err)?;
                    Some(
                        raft_log_index(&k)
                            .ok_or_else(|| SkvError::Storage("short raft_log key".into()))?,
                    )
                }
                None => None,
            };
            let last_entry = match store.raft_log.range(start..=end).next_back() {
                Some(guard) => {
                    let (_, v) = guard.into_inner().map_err(fjall_err)?;
                    Some(decode::<LogEntry>(&v)?.position())
                }
                None => None,
            };

            let last_purged = store.read_meta::<LogPosition>(shard_id, "last_purged")?;
            Ok(LogState { first_index, last: last_entry.or(last_purged), last_purged })
        })
        .await
        .map_err(join_err)?
    }

    async fn get_entry(
        &self,
        shard_id: ShardId,
        index: u64,
    ) -> Result<Option<LogEntry>, SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<LogEntry>, SkvError> {
            let key = raft_log_key(shard_id, index);
            match store.raft_log.get(key).map_err(fjall_err)? {
                Some(b) => Ok(Some(decode::<LogEntry>(&b)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(join_err)?
    }

    async fn get_entries(
        &self,
        shard_id: ShardId,
        from: u64,
        to_inclusive: u64,
    ) -> Result<Vec<LogEntry>, SkvError> {
        if from > to_inclusive {
            return Ok(Vec::new());
        }
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<LogEntry>, SkvError> {
            let start = raft_log_key(shard_id, from).to_vec();
            let end = raft_log_key(shard_id, to_inclusive).to_vec();
            store
                .raft_log
                .range(start..=end)
                .map(|g| g.into_inner().map_err(fjall_err).and_then(|(_, v)| decode::<LogEntry>(&v)))
                .collect()
        })
        .await
        .map_err(join_err)?
    }

    async fn append(
        &self,
        shard_id: ShardId,
        entries: Vec<LogEntry>,
    ) -> Result<(), SkvError> {
        if entries.is_empty() {
            return Ok(());
        }
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SkvError> {
            let mut batch = store.db.batch();
            for entry in &entries {
                let key = raft_log_key(shard_id, entry.index).to_vec();
                batch.insert(&store.raft_log, key, encode(entry)?);
            }
            batch.commit().map_err(fjall_err)?;
            store.sync()
        })
        .await
        .map_err(join_err)?
    }

    async fn truncate(&self, shard_id: ShardId, from_index: u64) -> Result<(), SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SkvError> {
            let keys = store.log_keys(
                raft_log_key(shard_id, from_index).to_vec(),
                raft_log_key(shard_id, u64::MAX).to_vec(),
            )?;
            if keys.is_empty() {
                return Ok(());
            }
            let mut batch = store.db.batch();
            for k in keys {
                batch.remove(&store.raft_log, k);
            }
            batch.commit().map_err(fjall_err)?;
            store.sync()
        })
        .await
        .map_err(join_err)?
    }

    async fn purge(&self, shard_id: ShardId, upto: LogPosition) -> Result<(), SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SkvError> {
            let keys = store.log_keys(
                raft_log_key(shard_id, 0).to_vec(),
                raft_log_key(shard_id, upto.index).to_vec(),
            )?;
            let mut batch = store.db.batch();
            for k in keys {
                batch.remove(&store.raft_log, k);
            }
            batch.insert(&store.meta, meta_key(shard_id, "last_purged"), encode(&upto)?);
            // Losing a purge only means replaying entries the snapshot already covers.
            batch.commit().map_err(fjall_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn save_vote(&self, shard_id: ShardId, vote: Vote) -> Result<(), SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || {
            store.write_meta(shard_id, "vote", &vote)?;
            store.sync()
        })
        .await
        .map_err(join_err)?
    }

    async fn read_vote(&self, shard_id: ShardId) -> Result<Option<Vote>, SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || store.read_meta::<Vote>(shard_id, "vote"))
            .await
            .map_err(join_err)?
    }

    async fn save_committed(
        &self,
        shard_id: ShardId,
        committed: Option<LogPosition>,
    ) -> Result<(), SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || {
            store.write_meta(shard_id, "committed", &committed)?;
            store.sync()
        })
        .await
        .map_err(join_err)?
    }

    async fn read_committed(&self, shard_id: ShardId) -> Result<Option<LogPosition>, SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || {
            store
                .read_meta::<Option<LogPosition>>(shard_id, "committed")
                .map(Option::flatten)
        })
        .await
        .map_err(join_err)?
    }

    async fn save_snapshot(&self, shard_id: ShardId, snapshot: Snapshot) -> Result<(), SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || {
            store.write_meta(shard_id, "snapshot", &snapshot)?;
            store.sync()
        })
        .await
        .map_err(join_err)?
    }

    async fn read_snapshot(&self, shard_id: ShardId) -> Result<Option<Snapshot>, SkvError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || store.read_meta::<Snapshot>(shard_id, "snapshot"))
            .await
            .map_err(join_err)?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
