use std::collections::HashMap;
use std::future::Future;

use skv_consensus::{KvShard, LocalNetwork};
use skv_router::NodeSpec;
use skv_types::{NodeId, ShardId, ShardReply, ShardRequest, SkvError};

/// Delivers a shard request to one replica and returns its answer.
///
/// Failing to reach the replica is `SkvError::Transport`; errors raised by the
/// replica itself (`NotLeader`, `Stale`, ...) are passed back unchanged.
pub trait ShardClient: Send + Sync + 'static {
    fn forward(
        &self,
        node: &NodeSpec,
        req: ShardRequest,
    ) -> impl Future<Output = Result<ShardReply, SkvError>> + Send;
}

/// Calls replicas living in the same process. Nodes crashed on the
/// [`LocalNetwork`] are unreachable.
pub struct LocalShardClient<R> {
    net: LocalNetwork,
    replicas: HashMap<(ShardId, NodeId), R>,
}

impl<R: KvShard> LocalShardClient<R> {
    pub fn new(net: LocalNetwork) -> Self {
        LocalShardClient { net, replicas: HashMap::new() }
    }

    /// Register a replica, replacing any previous one for the same
    /// (shard, node).
    pub fn add(&mut self, replica: R) {
        self.replicas.insert((replica.shard_id(), replica.node_id()), replica);
    }
}

impl<R: KvShard> ShardClient for LocalShardClient<R> {
    async fn forward(&self, node: &NodeSpec, req: ShardRequest) -> Result<ShardReply, SkvError> {
        if self.net.is_down(node.id) {
            return Err(SkvError::Transport(format!("node {} is down", node.id)));
        }
        let replica = self.replicas.get(&(req.shard_id, node.id)).ok_or_else(|| {
            SkvError::Transport(format!("node {} does not host shard {}", node.id, req.shard_id))
        })?;
        replica.execute(req).await
    }
}
