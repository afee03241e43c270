//! Gateway in front of two real three-replica shards.

use std::time::Duration;

use tokio::time::{sleep, Instant};

use skv_consensus::{LocalNetwork, LocalTransport, RaftConfig, ReplicatedLog, Role, ShardNode};
use skv_router::{ClusterTopology, NodeSpec, ShardSpec};
use skv_storage::{MemLogStorage, MemStateMachine};
use skv_types::{NodeId, Operation, ShardId, SkvError};

use crate::{Gateway, GatewayConfig, LocalShardClient, StoreResponse};

type Node = ShardNode<MemLogStorage, MemStateMachine, LocalTransport>;

const SPLIT: u32 = 926_844_193;

fn topology() -> ClusterTopology {
    ClusterTopology {
        nodes: (1..=6).map(|id| NodeSpec { id, addr: format!("node-{id}:7001") }).collect(),
        shards: vec![
            ShardSpec { id: 0, upper_bound: SPLIT, members: vec![1, 2, 3] },
            ShardSpec { id: 1, upper_bound: u32::MAX, members: vec![4, 5, 6] },
        ],
    }
}

struct Harness {
    net: LocalNetwork,
    gateway: Gateway<LocalShardClient<Node>>,
    replicas: Vec<Node>,
}

impl Harness {
    async fn start() -> Self {
        let topo = topology();
        let net = LocalNetwork::new();
        let mut client = LocalShardClient::new(net.clone());
        let mut replicas = Vec::new();
        for shard in &topo.shards {
            for &node_id in &shard.members {
                let raft = ReplicatedLog::open(
                    shard.id,
                    node_id,
                    shard.members.clone(),
                    RaftConfig::fast(),
                    MemLogStorage::new(),
                    MemStateMachine::new(),
                    net.transport(shard.id, node_id),
                )
                .await
                .unwrap();
                net.register(&raft);
                raft.start();
                let node = ShardNode::new(raft);
                client.add(node.clone());
                replicas.push(node);
            }
        }
        let gateway = Gateway::new(topo, GatewayConfig::default(), client).unwrap();
        Harness { net, gateway, replicas }
    }

    /// Retry until the shard settles, the way an external client would.
    async fn call(&self, op: Operation) -> Result<StoreResponse, SkvError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match self.gateway.handle(op.clone()).await {
                Err(e) if e.is_retryable() && Instant::now() < deadline => {
                    sleep(Duration::from_millis(25)).await;
                }
                other => return other,
            }
        }
    }

    async fn leader_of(&self, shard_id: ShardId) -> Option<NodeId> {
        for node in &self.replicas {
            let status = node.raft().status().await;
            if status.shard_id == shard_id && status.role == Role::Leader && !self.net.is_down(status.node_id) {
                return Some(status.node_id);
            }
        }
        None
    }

    async fn shutdown(&self) {
        for node in &self.replicas {
            node.raft().shutdown().await;
        }
    }
}

fn put(key: &str, value: &str) -> Operation {
    Operation::Put { key: key.into(), value: value.into() }
}

fn get(key: &str) -> Operation {
    Operation::Get { key: key.into() }
}

#[tokio::test]
async fn keys_land_on_their_shards() {
    let h = Harness::start().await;
    assert_eq!(h.gateway.route("apple"), 0);
    assert_eq!(h.gateway.route("foo"), 1);

    h.call(put("apple", "red")).await.unwrap();
    h.call(put("foo", "bar")).await.unwrap();

    for node in &h.replicas {
        let raft = node.raft();
        let owns_apple = raft.shard_id() == 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let keys: Vec<String> = raft.state_machine().dump().await.into_iter().map(|e| e.key).collect();
            let expected = if owns_apple { vec!["apple".to_string()] } else { vec!["foo".to_string()] };
            if keys == expected {
                break;
            }
            assert!(Instant::now() < deadline, "replica {} holds {keys:?}", raft.node_id());
            sleep(Duration::from_millis(20)).await;
        }
    }
    h.shutdown().await;
}

#[tokio::test]
async fn put_get_delete_round() {
    let h = Harness::start().await;

    let resp = h.call(put("foo", "bar")).await.unwrap();
    assert_eq!(resp, StoreResponse::stored("foo".into(), "bar".into()));

    let resp = h.call(get("foo")).await.unwrap();
    assert_eq!(resp.message, "success fetching data");
    assert_eq!(resp.data.value.as_deref(), Some("bar"));

    let resp = h.call(Operation::Delete { key: "foo".into() }).await.unwrap();
    assert_eq!(resp, StoreResponse::removed("foo".into()));

    let err = h.call(get("foo")).await.unwrap_err();
    assert_eq!(err, SkvError::NotFound { key: "foo".into() });
    h.shutdown().await;
}

#[tokio::test]
async fn survives_leader_crash() {
    let h = Harness::start().await;
    h.call(put("apple", "red")).await.unwrap();

    let leader = h.leader_of(0).await.unwrap();
    h.net.crash(leader);

    assert_eq!(h.call(get("apple")).await.unwrap().data.value.as_deref(), Some("red"));
    h.call(put("apple", "green")).await.unwrap();
    assert_eq!(h.call(get("apple")).await.unwrap().data.value.as_deref(), Some("green"));
    assert_ne!(h.gateway.cached_leader(0), Some(leader));

    // The other shard is untouched.
    h.call(put("foo", "bar")).await.unwrap();
    h.shutdown().await;
}

#[tokio::test]
async fn majority_loss_is_reported_unavailable() {
    let h = Harness::start().await;
    h.call(put("apple", "red")).await.unwrap();

    for id in [1, 2, 3] {
        h.net.crash(id);
    }
    let err = h.gateway.handle(put("apple", "blue")).await.unwrap_err();
    assert!(matches!(err, SkvError::ShardUnavailable { shard_id: 0, .. }), "unexpected error {err:?}");
    assert_eq!(err.http_status(), 503);

    // Shard 1 keeps serving.
    h.call(put("foo", "bar")).await.unwrap();

    for id in [1, 2, 3] {
        h.net.revive(id);
    }
    assert_eq!(h.call(get("apple")).await.unwrap().data.value.as_deref(), Some("red"));
    h.shutdown().await;
}

#[tokio::test]
async fn leader_without_followers_is_reported_unavailable() {
    let h = Harness::start().await;
    h.call(put("apple", "red")).await.unwrap();

    let leader = h.leader_of(0).await.unwrap();
    assert_eq!(h.gateway.cached_leader(0), Some(leader));
    for id in [1, 2, 3].into_iter().filter(|&id| id != leader) {
        h.net.crash(id);
    }

    let err = h.gateway.handle(put("apple", "blue")).await.unwrap_err();
    assert!(matches!(err, SkvError::ShardUnavailable { shard_id: 0, .. }), "unexpected error {err:?}");
    let err = h.gateway.handle(get("apple")).await.unwrap_err();
    assert!(matches!(err, SkvError::ShardUnavailable { shard_id: 0, .. }), "unexpected error {err:?}");
    h.shutdown().await;
}
