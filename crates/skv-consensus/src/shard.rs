use uuid::Uuid;

use skv_storage::{LogStorage, StateMachineStore};
use skv_types::{validate_key, ClientWrite, KvCommand, KvEntry, KvResponse, NodeId, ShardId, SkvError};

use crate::raft::ReplicatedLog;
use crate::transport::RaftTransport;
use crate::KvShard;

/// One replica of a shard as seen by clients: writes go through the
/// replicated log, reads come from the applied state machine.
pub struct ShardNode<L, S, T> {
    raft: ReplicatedLog<L, S, T>,
}

impl<L, S, T> Clone for ShardNode<L, S, T> {
    fn clone(&self) -> Self {
        ShardNode { raft: self.raft.clone() }
    }
}

impl<L, S, T> ShardNode<L, S, T>
where
    L: LogStorage,
    S: StateMachineStore,
    T: RaftTransport,
{
    pub fn new(raft: ReplicatedLog<L, S, T>) -> Self {
        ShardNode { raft }
    }

    pub fn raft(&self) -> &ReplicatedLog<L, S, T> {
        &self.raft
    }

    async fn write(&self, command: KvCommand, request_id: Option<Uuid>) -> Result<KvResponse, SkvError> {
        let (index, response) = self.raft.propose(ClientWrite { request_id, command }).await?;
        tracing::debug!(shard_id = self.raft.shard_id(), index, ?request_id, "write applied");
        Ok(response)
    }
}

impl<L, S, T> KvShard for ShardNode<L, S, T>
where
    L: LogStorage,
    S: StateMachineStore,
    T: RaftTransport,
{
    fn shard_id(&self) -> ShardId {
        self.raft.shard_id()
    }

    fn node_id(&self) -> NodeId {
        self.raft.node_id()
    }

    async fn put(&self, key: String, value: String, request_id: Option<Uuid>) -> Result<u64, SkvError> {
        let key = validate_key(&key)?;
        match self.write(KvCommand::Put { key, value }, request_id).await? {
            KvResponse::Written { index } => Ok(index),
            other => Err(SkvError::Consensus(format!("put answered with {other:?}"))),
        }
    }

    async fn delete(&self, key: String, request_id: Option<Uuid>) -> Result<(u64, bool), SkvError> {
        let key = validate_key(&key)?;
        match self.write(KvCommand::Delete { key }, request_id).await? {
            KvResponse::Deleted { index, found } => Ok((index, found)),
            other => Err(SkvError::Consensus(format!("delete answered with {other:?}"))),
        }
    }

    async fn get(&self, key: String) -> Result<KvEntry, SkvError> {
        let key = validate_key(&key)?;
        self.raft.read_barrier().await?;
        let entry = self.raft.state_machine().get(self.raft.shard_id(), &key).await?;
        entry.ok_or(SkvError::NotFound { key })
    }
}
