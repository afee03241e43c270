use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::transport::{Channel, Endpoint};

use skv_consensus::{
    decode_wire, encode_wire, AppendRequest, AppendResponse, RaftConfig, RaftTransport, Reply,
    SnapshotError, SnapshotRequest, SnapshotResponse, VoteRequest, VoteResponse,
};
use skv_proto::v1::raft_service_client::RaftServiceClient;
use skv_proto::v1::RaftMessage;
use skv_router::ClusterTopology;
use skv_types::{NodeId, ShardId, SkvError};

use crate::convert::status_to_skv;

/// Lazily connected gRPC channels, one per peer node.
///
/// `timeout` bounds every request on the channel; `max_message_size` is the
/// decode and encode limit clients built on the pool must apply.
#[derive(Clone)]
pub struct ChannelPool {
    channels: Arc<RwLock<HashMap<NodeId, Channel>>>,
    timeout: Duration,
    max_message_size: usize,
}

impl ChannelPool {
    pub fn new(timeout: Duration, max_message_size: usize) -> Self {
        ChannelPool { channels: Arc::new(RwLock::new(HashMap::new())), timeout, max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn channel(&self, node_id: NodeId, addr: &str) -> Result<Channel, SkvError> {
        if let Some(ch) = self.channels.read().get(&node_id) {
            return Ok(ch.clone());
        }
        let uri = if addr.contains("://") { addr.to_string() } else { format!("http://{addr}") };
        let channel = Endpoint::from_shared(uri)
            .map_err(|e| SkvError::Transport(format!("bad address for node {node_id}: {e}")))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect_lazy();
        self.channels.write().insert(node_id, channel.clone());
        Ok(channel)
    }
}

enum RaftCall {
    AppendEntries,
    Vote,
    InstallSnapshot,
}

/// [`RaftTransport`] over the cluster gRPC listener. Requests and replies
/// travel JSON-encoded inside a [`RaftMessage`]. Each call gets the RPC
/// deadline, or the snapshot deadline when its payload is large.
#[derive(Clone)]
pub struct GrpcTransport {
    addrs: Arc<HashMap<NodeId, String>>,
    pool: ChannelPool,
    shard_id: ShardId,
    config: Arc<RaftConfig>,
}

impl GrpcTransport {
    pub fn new(topology: &ClusterTopology, shard_id: ShardId, pool: ChannelPool, config: &RaftConfig) -> Self {
        let addrs = topology.nodes.iter().map(|n| (n.id, n.addr.clone())).collect();
        GrpcTransport { addrs: Arc::new(addrs), pool, shard_id, config: Arc::new(config.clone()) }
    }

    async fn call<Q, R>(&self, target: NodeId, call: RaftCall, req: &Q) -> Result<R, SkvError>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        let addr = self
            .addrs
            .get(&target)
            .ok_or_else(|| SkvError::Transport(format!("no address for node {target}")))?;
        let limit = self.pool.max_message_size();
        let mut client = RaftServiceClient::new(self.pool.channel(target, addr)?)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);
        let payload = encode_wire(req)?;
        let deadline = self.config.deadline_for(payload.len());
        let msg = RaftMessage { shard_id: self.shard_id, payload };

        let resp = tokio::time::timeout(deadline, async {
            match call {
                RaftCall::AppendEntries => client.append_entries(msg).await,
                RaftCall::Vote => client.vote(msg).await,
                RaftCall::InstallSnapshot => client.install_snapshot(msg).await,
            }
        })
        .await
        .map_err(|_| SkvError::Transport(format!("node {target} did not answer within {deadline:?}")))?
        .map_err(|s| status_to_skv(&s))?;
        decode_wire(&resp.into_inner().payload)
    }
}

impl RaftTransport for GrpcTransport {
    async fn append_entries(
        &self,
        target: NodeId,
        req: AppendRequest,
    ) -> Result<Reply<AppendResponse>, SkvError> {
        self.call(target, RaftCall::AppendEntries, &req).await
    }

    async fn vote(&self, target: NodeId, req: VoteRequest) -> Result<Reply<VoteResponse>, SkvError> {
        self.call(target, RaftCall::Vote, &req).await
    }

    async fn install_snapshot(
        &self,
        target: NodeId,
        req: SnapshotRequest,
    ) -> Result<Reply<SnapshotResponse, SnapshotError>, SkvError> {
        self.call(target, RaftCall::InstallSnapshot, &req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skv_router::{NodeSpec, ShardSpec};

    fn topology() -> ClusterTopology {
        ClusterTopology {
            nodes: vec![
                NodeSpec { id: 1, addr: "127.0.0.1:1".into() },
                NodeSpec { id: 2, addr: "127.0.0.1:2".into() },
            ],
            shards: vec![ShardSpec { id: 0, upper_bound: u32::MAX, members: vec![1, 2] }],
        }
    }

    fn vote() -> VoteRequest {
        VoteRequest::new(openraft::Vote::new(1, 1), None)
    }

    fn transport() -> GrpcTransport {
        let pool = ChannelPool::new(Duration::from_millis(200), 16 << 20);
        GrpcTransport::new(&topology(), 0, pool, &RaftConfig::default())
    }

    #[tokio::test]
    async fn unknown_peer_is_a_transport_error() {
        let t = transport();
        let err = t.vote(9, vote()).await.unwrap_err();
        assert!(matches!(err, SkvError::Transport(_)));
    }

    #[tokio::test]
    async fn unreachable_peer_is_a_transport_error() {
        let t = transport();
        let err = t.vote(2, vote()).await.unwrap_err();
        assert!(matches!(err, SkvError::Transport(_)), "unexpected error {err:?}");
    }

    #[tokio::test]
    async fn pool_reuses_channels() {
        let pool = ChannelPool::new(Duration::from_millis(200), 16 << 20);
        assert_eq!(pool.max_message_size(), 16 << 20);
        pool.channel(1, "127.0.0.1:1").unwrap();
        pool.channel(1, "127.0.0.1:1").unwrap();
        assert_eq!(pool.channels.read().len(), 1);
        assert!(pool.channel(2, "not a uri \u{0}").is_err());
    }
}
