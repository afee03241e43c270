//! In-process Raft transport with fault injection, used to run whole
//! clusters inside one test binary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use skv_storage::{LogStorage, StateMachineStore};
use skv_types::{NodeId, ShardId, SkvError};

use crate::raft::ReplicatedLog;
use crate::transport::{RaftTransport, Reply};
use crate::types::{
    AppendRequest, AppendResponse, Raft, SnapshotError, SnapshotRequest, SnapshotResponse,
    VoteRequest, VoteResponse,
};

#[derive(Default)]
struct NetState {
    engines: HashMap<(ShardId, NodeId), Raft>,
    down: HashSet<NodeId>,
    /// Severed links, stored in both directions.
    cut: HashSet<(NodeId, NodeId)>,
}

/// Shared switchboard between the replicas of every shard in a test.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<RwLock<NetState>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route RPCs addressed to `raft`'s (shard, node) into it. Registering the
    /// same pair again replaces the previous replica.
    pub fn register<L, S, T>(&self, raft: &ReplicatedLog<L, S, T>)
    where
        L: LogStorage,
        S: StateMachineStore,
        T: RaftTransport,
    {
        self.inner
            .write()
            .engines
            .insert((raft.shard_id(), raft.node_id()), raft.engine().clone());
    }

    pub fn transport(&self, shard_id: ShardId, node_id: NodeId) -> LocalTransport {
        LocalTransport { net: self.clone(), shard_id, node_id }
    }

    /// Make `node` unreachable by everyone, clients included.
    pub fn crash(&self, node: NodeId) {
        self.inner.write().down.insert(node);
    }

    pub fn revive(&self, node: NodeId) {
        self.inner.write().down.remove(&node);
    }

    pub fn is_down(&self, node: NodeId) -> bool {
        self.inner.read().down.contains(&node)
    }

    /// Sever every link between `node` and `others`.
    pub fn isolate(&self, node: NodeId, others: &[NodeId]) {
        self.partition(&[node], others);
    }

    /// Sever every link between the two groups.
    pub fn partition(&self, left: &[NodeId], right: &[NodeId]) {
        let mut g = self.inner.write();
        for &a in left {
            for &b in right {
                if a != b {
                    g.cut.insert((a, b));
                    g.cut.insert((b, a));
                }
            }
        }
    }

    /// Restore every severed link. Crashed nodes stay down.
    pub fn heal(&self) {
        self.inner.write().cut.clear();
    }

    pub fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        let g = self.inner.read();
        !g.down.contains(&from) && !g.down.contains(&to) && !g.cut.contains(&(from, to))
    }

    fn engine(&self, from: NodeId, shard_id: ShardId, to: NodeId) -> Result<Raft, SkvError> {
        if !self.can_reach(from, to) {
            return Err(SkvError::Transport(format!("node {to} unreachable from node {from}")));
        }
        self.inner
            .read()
            .engines
            .get(&(shard_id, to))
            .cloned()
            .ok_or_else(|| SkvError::Transport(format!("shard {shard_id} not hosted on node {to}")))
    }
}

/// [`RaftTransport`] for one replica on a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalTransport {
    net: LocalNetwork,
    shard_id: ShardId,
    node_id: NodeId,
}

impl LocalTransport {
    fn target(&self, target: NodeId) -> Result<Raft, SkvError> {
        self.net.engine(self.node_id, self.shard_id, target)
    }

    /// Replies are lost if the link was cut while the request was in flight.
    fn deliver<R>(&self, target: NodeId, reply: R) -> Result<R, SkvError> {
        if !self.net.can_reach(target, self.node_id) {
            return Err(SkvError::Transport(format!("reply from node {target} lost")));
        }
        Ok(reply)
    }
}

impl RaftTransport for LocalTransport {
    async fn append_entries(
        &self,
        target: NodeId,
        req: AppendRequest,
    ) -> Result<Reply<AppendResponse>, SkvError> {
        let reply = self.target(target)?.append_entries(req).await;
        self.deliver(target, reply)
    }

    async fn vote(&self, target: NodeId, req: VoteRequest) -> Result<Reply<VoteResponse>, SkvError> {
        let reply = self.target(target)?.vote(req).await;
        self.deliver(target, reply)
    }

    async fn install_snapshot(
        &self,
        target: NodeId,
        req: SnapshotRequest,
    ) -> Result<Reply<SnapshotResponse, SnapshotError>, SkvError> {
        let reply = self.target(target)?.install_snapshot(req).await;
        self.deliver(target, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_cuts_both_directions() {
        let net = LocalNetwork::new();
        net.partition(&[1], &[2, 3]);
        assert!(!net.can_reach(1, 2));
        assert!(!net.can_reach(3, 1));
        assert!(net.can_reach(2, 3));

        net.heal();
        assert!(net.can_reach(1, 3));
    }

    #[test]
    fn crashed_node_is_unreachable_until_revived() {
        let net = LocalNetwork::new();
        net.crash(2);
        assert!(net.is_down(2));
        assert!(!net.can_reach(1, 2));
        assert!(!net.can_reach(2, 1));
        net.heal();
        assert!(net.is_down(2));
        net.revive(2);
        assert!(net.can_reach(1, 2));
    }

    #[tokio::test]
    async fn unregistered_target_is_a_transport_error() {
        let net = LocalNetwork::new();
        let t = net.transport(0, 1);
        let err = t
            .vote(2, VoteRequest::new(openraft::Vote::new(1, 1), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SkvError::Transport(_)));
    }
}
