use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skv_router::{ClusterTopology, HashRouter};
use skv_types::{validate_key, NodeId, Operation, ShardId, ShardReply, ShardRequest, SkvError};

use crate::client::ShardClient;
use crate::response::StoreResponse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub max_key_bytes: usize,
    pub max_value_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig { max_key_bytes: 1024, max_value_bytes: 1024 * 1024 }
    }
}

/// Routes key operations to the leader of the owning shard.
///
/// The only mutable state is a best-effort leader cache, so any number of
/// gateways can front the same cluster.
pub struct Gateway<C> {
    topology: ClusterTopology,
    router: HashRouter,
    client: C,
    config: GatewayConfig,
    leaders: RwLock<HashMap<ShardId, NodeId>>,
}

impl<C: ShardClient> Gateway<C> {
    pub fn new(topology: ClusterTopology, config: GatewayConfig, client: C) -> Result<Self, SkvError> {
        let router = topology.router()?;
        Ok(Gateway { topology, router, client, config, leaders: RwLock::new(HashMap::new()) })
    }

    pub fn route(&self, key: &str) -> ShardId {
        self.router.route(key)
    }

    pub fn cached_leader(&self, shard_id: ShardId) -> Option<NodeId> {
        self.leaders.read().get(&shard_id).copied()
    }

    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// Validate, route and forward one operation.
    ///
    /// Writes carry a fresh idempotency key that is reused if the request has
    /// to be retried at another replica.
    pub async fn handle(&self, op: Operation) -> Result<StoreResponse, SkvError> {
        let op = self.validate(op)?;
        let shard_id = self.router.route(op.key());
        let request_id = op.is_write().then(Uuid::new_v4);

        let (key, value) = match &op {
            Operation::Put { key, value } => (key.clone(), Some(value.clone())),
            Operation::Get { key } | Operation::Delete { key } => (key.clone(), None),
        };
        let reply = self.dispatch(ShardRequest { shard_id, request_id, op }).await?;

        Ok(match reply {
            ShardReply::Written { .. } => StoreResponse::stored(key, value.unwrap_or_default()),
            ShardReply::Found(entry) => StoreResponse::fetched(entry),
            ShardReply::Deleted { .. } => StoreResponse::removed(key),
        })
    }

    fn validate(&self, op: Operation) -> Result<Operation, SkvError> {
        Ok(match op {
            Operation::Put { key, value } => {
                if value.len() > self.config.max_value_bytes {
                    return Err(SkvError::InvalidArgument(format!(
                        "value of {} bytes exceeds the {} byte limit",
                        value.len(),
                        self.config.max_value_bytes
                    )));
                }
                Operation::Put { key: self.check_key(&key)?, value }
            }
            Operation::Get { key } => Operation::Get { key: self.check_key(&key)? },
            Operation::Delete { key } => Operation::Delete { key: self.check_key(&key)? },
        })
    }

    fn check_key(&self, raw: &str) -> Result<String, SkvError> {
        let key = validate_key(raw)?;
        if key.len() > self.config.max_key_bytes {
            return Err(SkvError::InvalidKey {
                reason: format!("key exceeds {} bytes", self.config.max_key_bytes),
            });
        }
        Ok(key)
    }

    /// Send to the cached leader, retrying once at a better guess when the
    /// replica is not the leader, is behind, or cannot be reached.
    async fn dispatch(&self, req: ShardRequest) -> Result<ShardReply, SkvError> {
        let shard_id = req.shard_id;
        let members = self
            .topology
            .members(shard_id)
            .ok_or_else(|| SkvError::ShardUnavailable { shard_id, reason: "shard has no members".into() })?;

        let first = self.cached_leader(shard_id).unwrap_or(members[0]);
        let err = match self.send(first, req.clone()).await {
            Ok(reply) => return Ok(reply),
            Err(e) if redirectable(&e) => e,
            Err(e) => return Err(e),
        };

        let second = self.redirect(shard_id, members, first, &err);
        tracing::debug!(shard_id, from = first, to = second, error = %err, "retrying at another replica");
        match self.send(second, req).await {
            Ok(reply) => Ok(reply),
            Err(e) if redirectable(&e) => {
                self.redirect(shard_id, members, second, &e);
                tracing::warn!(shard_id, error = %e, "shard unavailable after retry");
                Err(SkvError::ShardUnavailable { shard_id, reason: e.to_string() })
            }
            Err(e) => Err(e),
        }
    }

    /// Forward to one replica. Only an acknowledged write proves the replica
    /// leads the shard, so only writes refresh the leader cache.
    async fn send(&self, node_id: NodeId, req: ShardRequest) -> Result<ShardReply, SkvError> {
        let shard_id = req.shard_id;
        let is_write = req.op.is_write();
        let node = self
            .topology
            .node(node_id)
            .ok_or_else(|| SkvError::Transport(format!("node {node_id} has no address")))?;
        let reply = self.client.forward(node, req).await?;
        if is_write && self.cached_leader(shard_id) != Some(node_id) {
            self.leaders.write().insert(shard_id, node_id);
        }
        Ok(reply)
    }

    /// Pick the next replica to try after `failed` answered `err`. A leader
    /// hint naming another replica is remembered; a blind rotation is not.
    fn redirect(&self, shard_id: ShardId, members: &[NodeId], failed: NodeId, err: &SkvError) -> NodeId {
        let hint = match err {
            SkvError::NotLeader { leader: Some(l), .. } | SkvError::Stale { leader: Some(l), .. }
                if *l != failed =>
            {
                Some(*l)
            }
            _ => None,
        };
        match hint.filter(|l| members.contains(l)) {
            Some(leader) => {
                self.leaders.write().insert(shard_id, leader);
                leader
            }
            None => {
                let pos = members.iter().position(|&m| m == failed).unwrap_or(0);
                members[(pos + 1) % members.len()]
            }
        }
    }
}

fn redirectable(err: &SkvError) -> bool {
    matches!(err, SkvError::NotLeader { .. } | SkvError::Stale { .. } | SkvError::Transport(_))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use skv_router::{NodeSpec, ShardSpec};
    use skv_types::KvEntry;

    use super::*;
    use crate::response::{MSG_FETCHED, MSG_REMOVED, MSG_STORED};

    /// Answers from a script and records every call.
    #[derive(Default)]
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<ShardReply, SkvError>>>,
        calls: Mutex<Vec<(NodeId, ShardRequest)>>,
    }

    impl ScriptedClient {
        fn answering(script: Vec<Result<ShardReply, SkvError>>) -> Self {
            ScriptedClient { script: Mutex::new(script.into()), calls: Mutex::default() }
        }
    }

    impl ShardClient for ScriptedClient {
        async fn forward(&self, node: &NodeSpec, req: ShardRequest) -> Result<ShardReply, SkvError> {
            self.calls.lock().push((node.id, req));
            self.script.lock().pop_front().unwrap_or(Ok(ShardReply::Written { index: 1 }))
        }
    }

    fn topology() -> ClusterTopology {
        ClusterTopology {
            nodes: (1..=6).map(|id| NodeSpec { id, addr: format!("10.0.0.{id}:7001") }).collect(),
            shards: vec![
                ShardSpec { id: 0, upper_bound: 926_844_193, members: vec![1, 2, 3] },
                ShardSpec { id: 1, upper_bound: u32::MAX, members: vec![4, 5, 6] },
            ],
        }
    }

    fn gateway(script: Vec<Result<ShardReply, SkvError>>) -> Gateway<ScriptedClient> {
        Gateway::new(topology(), GatewayConfig::default(), ScriptedClient::answering(script)).unwrap()
    }

    fn put(key: &str) -> Operation {
        Operation::Put { key: key.into(), value: "v".into() }
    }

    fn called(gw: &Gateway<ScriptedClient>) -> Vec<NodeId> {
        gw.client.calls.lock().iter().map(|(n, _)| *n).collect()
    }

    #[tokio::test]
    async fn routes_to_first_member_of_owning_shard() {
        let gw = gateway(vec![]);
        let resp = gw.handle(put("apple")).await.unwrap();
        assert_eq!(resp.message, MSG_STORED);
        assert_eq!(resp.data.value.as_deref(), Some("v"));

        gw.handle(put("foo")).await.unwrap();
        assert_eq!(called(&gw), vec![1, 4]);
        assert_eq!(gw.cached_leader(0), Some(1));
    }

    #[tokio::test]
    async fn follows_leader_hint_and_caches_it() {
        let gw = gateway(vec![Err(SkvError::NotLeader { shard_id: 0, leader: Some(3) })]);
        gw.handle(put("apple")).await.unwrap();
        assert_eq!(called(&gw), vec![1, 3]);
        assert_eq!(gw.cached_leader(0), Some(3));

        gw.handle(put("apple")).await.unwrap();
        assert_eq!(called(&gw), vec![1, 3, 3]);
    }

    #[tokio::test]
    async fn retry_reuses_request_id() {
        let gw = gateway(vec![Err(SkvError::Transport("connection refused".into()))]);
        gw.handle(put("apple")).await.unwrap();

        let calls = gw.client.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1.request_id.is_some());
        assert_eq!(calls[0].1.request_id, calls[1].1.request_id);
        // No hint: rotate to the next member.
        assert_eq!(calls[1].0, 2);
    }

    #[tokio::test]
    async fn reads_carry_no_request_id() {
        let entry = KvEntry { key: "apple".into(), value: "red".into(), version: 3 };
        let gw = gateway(vec![Ok(ShardReply::Found(entry))]);
        let resp = gw.handle(Operation::Get { key: " apple ".into() }).await.unwrap();
        assert_eq!(resp.message, MSG_FETCHED);
        assert_eq!(resp.data.key, "apple");
        assert_eq!(resp.data.value.as_deref(), Some("red"));
        assert!(gw.client.calls.lock()[0].1.request_id.is_none());
    }

    #[tokio::test]
    async fn delete_answers_null_value() {
        let gw = gateway(vec![Ok(ShardReply::Deleted { index: 9, found: true })]);
        let resp = gw.handle(Operation::Delete { key: "apple".into() }).await.unwrap();
        assert_eq!(resp.message, MSG_REMOVED);
        assert_eq!(resp.data.value, None);
    }

    #[tokio::test]
    async fn second_failure_is_shard_unavailable() {
        let gw = gateway(vec![
            Err(SkvError::NotLeader { shard_id: 0, leader: None }),
            Err(SkvError::Stale { shard_id: 0, leader: Some(1) }),
        ]);
        let err = gw.handle(put("apple")).await.unwrap_err();
        assert!(matches!(err, SkvError::ShardUnavailable { shard_id: 0, .. }));
        assert_eq!(called(&gw), vec![1, 2]);
        assert_eq!(gw.cached_leader(0), Some(1));
    }

    #[tokio::test]
    async fn reads_leave_the_leader_cache_alone() {
        let entry = KvEntry { key: "apple".into(), value: "red".into(), version: 3 };
        let gw = gateway(vec![
            Err(SkvError::Transport("connection refused".into())),
            Ok(ShardReply::Found(entry)),
        ]);
        gw.handle(Operation::Get { key: "apple".into() }).await.unwrap();
        assert_eq!(called(&gw), vec![1, 2]);
        assert_eq!(gw.cached_leader(0), None);

        gw.handle(put("apple")).await.unwrap();
        assert_eq!(called(&gw), vec![1, 2, 1]);
        assert_eq!(gw.cached_leader(0), Some(1));
    }

    #[tokio::test]
    async fn hint_naming_the_failed_replica_is_ignored() {
        let gw = gateway(vec![Err(SkvError::Stale { shard_id: 0, leader: Some(1) })]);
        gw.handle(put("apple")).await.unwrap();
        assert_eq!(called(&gw), vec![1, 2]);
        assert_eq!(gw.cached_leader(0), Some(2));
    }

    #[tokio::test]
    async fn terminal_errors_pass_through_without_retry() {
        for err in [
            SkvError::Timeout { shard_id: 0, index: Some(5) },
            SkvError::NotFound { key: "apple".into() },
            SkvError::ShardUnavailable { shard_id: 0, reason: "no quorum".into() },
        ] {
            let gw = gateway(vec![Err(err.clone())]);
            assert_eq!(gw.handle(put("apple")).await.unwrap_err(), err);
            assert_eq!(called(&gw).len(), 1);
        }
    }

    #[tokio::test]
    async fn rejects_bad_input_before_forwarding() {
        let gw = gateway(vec![]);
        let err = gw.handle(put("   ")).await.unwrap_err();
        assert!(matches!(err, SkvError::InvalidKey { .. }));
        assert_eq!(err.http_status(), 422);

        let long_key = "k".repeat(1025);
        assert!(matches!(gw.handle(put(&long_key)).await, Err(SkvError::InvalidKey { .. })));

        let big = Operation::Put { key: "k".into(), value: "x".repeat(1024 * 1024 + 1) };
        assert!(matches!(gw.handle(big).await, Err(SkvError::InvalidArgument(_))));
        assert!(called(&gw).is_empty());
    }
}
