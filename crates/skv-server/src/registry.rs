use std::collections::BTreeMap;

use skv_consensus::{KvShard, RaftTransport, ShardNode};
use skv_storage::{LogStorage, StateMachineStore};
use skv_types::{ShardId, SkvError};

/// The shard replicas hosted by this node.
pub struct ShardRegistry<L, S, T> {
    shards: BTreeMap<ShardId, ShardNode<L, S, T>>,
}

impl<L, S, T> Default for ShardRegistry<L, S, T> {
    fn default() -> Self {
        ShardRegistry { shards: BTreeMap::new() }
    }
}

impl<L, S, T> ShardRegistry<L, S, T>
where
    L: LogStorage,
    S: StateMachineStore,
    T: RaftTransport,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: ShardNode<L, S, T>) {
        self.shards.insert(node.shard_id(), node);
    }

    pub fn get(&self, shard_id: ShardId) -> Result<&ShardNode<L, S, T>, SkvError> {
        self.shards.get(&shard_id).ok_or_else(|| SkvError::ShardUnavailable {
            shard_id,
            reason: "shard is not hosted on this node".into(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardNode<L, S, T>> {
        self.shards.values()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn start_all(&self) {
        for node in self.shards.values() {
            node.raft().start();
        }
    }

    pub async fn shutdown_all(&self) {
        for node in self.shards.values() {
            node.raft().shutdown().await;
        }
    }
}
