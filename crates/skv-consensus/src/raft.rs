use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use openraft::error::{CheckIsLeaderError, ClientWriteError, InitializeError};
use openraft::{EmptyNode, ServerState};
use serde::{Deserialize, Serialize};

use skv_storage::{LogStorage, StateMachineStore};
use skv_types::{ClientWrite, KvResponse, NodeId, ShardId, SkvError};

use crate::config::RaftConfig;
use crate::network::NetworkFactory;
use crate::store::{LogStore, StateMachine};
use crate::transport::{RaftTransport, Reply};
use crate::types::{
    AppendRequest, AppendResponse, Raft, RaftError, SnapshotError, SnapshotRequest,
    SnapshotResponse, VoteRequest, VoteResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Learner,
    Follower,
    Candidate,
    Leader,
    Shutdown,
}

impl From<ServerState> for Role {
    fn from(state: ServerState) -> Self {
        match state {
            ServerState::Learner => Role::Learner,
            ServerState::Follower => Role::Follower,
            ServerState::Candidate => Role::Candidate,
            ServerState::Leader => Role::Leader,
            ServerState::Shutdown => Role::Shutdown,
        }
    }
}

/// Point-in-time view of one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftStatus {
    pub shard_id: ShardId,
    pub node_id: NodeId,
    pub role: Role,
    pub term: u64,
    pub leader: Option<NodeId>,
    pub last_applied: u64,
    pub last_log_index: u64,
    pub snapshot_index: u64,
}

struct Inner<L, S, T> {
    shard_id: ShardId,
    node_id: NodeId,
    members: Vec<NodeId>,
    config: RaftConfig,
    raft: Raft,
    log: L,
    sm: S,
    transport: PhantomData<T>,
}

/// One replica of one shard's Raft log, driving its state machine.
///
/// Consensus runs in openraft; this wraps it with the shard's storage and
/// transport and turns its errors into [`SkvError`]s.
pub struct ReplicatedLog<L, S, T> {
    inner: Arc<Inner<L, S, T>>,
}

impl<L, S, T> Clone for ReplicatedLog<L, S, T> {
    fn clone(&self) -> Self {
        ReplicatedLog { inner: self.inner.clone() }
    }
}

impl<L, S, T> ReplicatedLog<L, S, T>
where
    L: LogStorage,
    S: StateMachineStore,
    T: RaftTransport,
{
    /// Restore a replica from its log storage. The persisted snapshot is
    /// installed into `sm` first; committed entries past it are replayed by
    /// the engine. The group is not bootstrapped until [`start`](Self::start).
    pub async fn open(
        shard_id: ShardId,
        node_id: NodeId,
        members: Vec<NodeId>,
        config: RaftConfig,
        log: L,
        sm: S,
        transport: T,
    ) -> Result<Self, SkvError> {
        config.validate()?;
        let engine_config = Arc::new(config.to_openraft(shard_id)?);

        if let Some(snapshot) = log.read_snapshot(shard_id).await? {
            let (applied, _) = sm.applied_state(shard_id).await?;
            if applied.map(|p| p.index) < snapshot.meta.last_log.map(|p| p.index) {
                tracing::info!(
                    shard_id,
                    node_id,
                    last_log_index = snapshot.meta.last_log_index(),
                    "restoring state machine from snapshot"
                );
                sm.install_snapshot(shard_id, snapshot).await?;
            }
        }

        let raft = Raft::new(
            node_id,
            engine_config,
            NetworkFactory::new(transport, config.max_append_size()),
            LogStore::new(shard_id, log.clone()),
            StateMachine::new(shard_id, sm.clone(), log.clone()),
        )
        .await
        .map_err(|e| SkvError::Consensus(format!("shard {shard_id}: {e}")))?;

        let mut members = members;
        members.sort_unstable();
        members.dedup();
        tracing::info!(shard_id, node_id, ?members, "replica opened");
        Ok(ReplicatedLog {
            inner: Arc::new(Inner {
                shard_id,
                node_id,
                members,
                config,
                raft,
                log,
                sm,
                transport: PhantomData,
            }),
        })
    }

    /// Bootstrap the group with its configured members. Every member does
    /// this; replicas that already hold a log keep it and skip the step.
    pub fn start(&self) {
        let raft = self.inner.raft.clone();
        let (shard_id, node_id) = (self.inner.shard_id, self.inner.node_id);
        let members: BTreeMap<NodeId, EmptyNode> =
            self.inner.members.iter().map(|&id| (id, EmptyNode::default())).collect();
        tokio::spawn(async move {
            match raft.initialize(members).await {
                Ok(()) => tracing::info!(shard_id, node_id, "group initialized"),
                Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                    tracing::debug!(shard_id, node_id, "group already initialized");
                }
                Err(e) => tracing::warn!(shard_id, node_id, error = %e, "group initialization failed"),
            }
        });
    }

    /// Stop the engine. Later calls fail with `ShardUnavailable`.
    pub async fn shutdown(&self) {
        if let Err(e) = self.inner.raft.shutdown().await {
            tracing::warn!(shard_id = self.inner.shard_id, error = %e, "replica shutdown failed");
        }
        tracing::info!(shard_id = self.inner.shard_id, node_id = self.inner.node_id, "replica stopped");
    }

    pub fn shard_id(&self) -> ShardId {
        self.inner.shard_id
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    /// Every voter of the group, this replica included.
    pub fn members(&self) -> &[NodeId] {
        &self.inner.members
    }

    pub fn config(&self) -> &RaftConfig {
        &self.inner.config
    }

    pub fn state_machine(&self) -> &S {
        &self.inner.sm
    }

    pub fn log_storage(&self) -> &L {
        &self.inner.log
    }

    pub fn engine(&self) -> &Raft {
        &self.inner.raft
    }

    pub async fn status(&self) -> RaftStatus {
        let metrics = self.inner.raft.metrics().borrow().clone();
        RaftStatus {
            shard_id: self.inner.shard_id,
            node_id: self.inner.node_id,
            role: metrics.state.into(),
            term: metrics.current_term,
            leader: metrics.current_leader,
            last_applied: metrics.last_applied.map(|id| id.index).unwrap_or(0),
            last_log_index: metrics.last_log_index.unwrap_or(0),
            snapshot_index: metrics.snapshot.map(|id| id.index).unwrap_or(0),
        }
    }

    // -----------------------------------------------------------------------
    // Client-facing operations
    // -----------------------------------------------------------------------

    /// Replicate `write` and wait until it is committed and applied.
    ///
    /// Returns the entry's log index and the state machine's response. A
    /// leader that cannot reach a quorum answers `ShardUnavailable` instead of
    /// queueing the write.
    pub async fn propose(&self, write: ClientWrite) -> Result<(u64, KvResponse), SkvError> {
        let shard_id = self.inner.shard_id;
        let status = self.status().await;
        if status.role != Role::Leader {
            return Err(SkvError::NotLeader { shard_id, leader: status.leader });
        }
        self.confirm_leadership().await?;

        match tokio::time::timeout(self.inner.config.propose_timeout(), self.inner.raft.client_write(write)).await {
            Ok(Ok(resp)) => {
                tracing::debug!(shard_id, index = resp.log_id.index, "proposal applied");
                Ok((resp.log_id.index, resp.data))
            }
            Ok(Err(RaftError::APIError(ClientWriteError::ForwardToLeader(f)))) => {
                Err(SkvError::NotLeader { shard_id, leader: f.leader_id })
            }
            Ok(Err(RaftError::Fatal(f))) => {
                Err(SkvError::ShardUnavailable { shard_id, reason: f.to_string() })
            }
            Ok(Err(other)) => Err(SkvError::Consensus(other.to_string())),
            Err(_) => match self.confirm_leadership().await {
                Ok(()) => Err(SkvError::Timeout { shard_id, index: None }),
                Err(e) => Err(e),
            },
        }
    }

    /// Return once this replica may serve a linearizable read from its state
    /// machine. Only a leader that still holds a quorum qualifies; every
    /// other replica answers `Stale` with its best guess of the leader.
    pub async fn read_barrier(&self) -> Result<(), SkvError> {
        let shard_id = self.inner.shard_id;
        let status = self.status().await;
        if status.role != Role::Leader {
            let leader = status.leader.filter(|&l| l != self.inner.node_id);
            return Err(SkvError::Stale { shard_id, leader });
        }
        match self.confirm_leadership().await {
            Err(SkvError::NotLeader { leader, .. }) => Err(SkvError::Stale { shard_id, leader }),
            other => other,
        }
    }

    /// One heartbeat round: succeeds while a quorum still follows this
    /// leader, and waits for the state machine to reach the read point.
    async fn confirm_leadership(&self) -> Result<(), SkvError> {
        let shard_id = self.inner.shard_id;
        let wait = self.inner.config.election_timeout_max();
        match tokio::time::timeout(wait, self.inner.raft.ensure_linearizable()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(RaftError::APIError(CheckIsLeaderError::ForwardToLeader(f)))) => {
                Err(SkvError::NotLeader { shard_id, leader: f.leader_id })
            }
            Ok(Err(RaftError::APIError(CheckIsLeaderError::QuorumNotEnough(q)))) => {
                tracing::warn!(shard_id, error = %q, "leader lost its quorum");
                Err(SkvError::ShardUnavailable { shard_id, reason: q.to_string() })
            }
            Ok(Err(other)) => Err(SkvError::ShardUnavailable { shard_id, reason: other.to_string() }),
            Err(_) => Err(SkvError::ShardUnavailable {
                shard_id,
                reason: format!("no quorum acknowledged the leader within {wait:?}"),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound RPC handlers
    // -----------------------------------------------------------------------

    pub async fn handle_append_entries(&self, req: AppendRequest) -> Reply<AppendResponse> {
        self.inner.raft.append_entries(req).await
    }

    pub async fn handle_vote(&self, req: VoteRequest) -> Reply<VoteResponse> {
        self.inner.raft.vote(req).await
    }

    pub async fn handle_install_snapshot(
        &self,
        req: SnapshotRequest,
    ) -> Reply<SnapshotResponse, SnapshotError> {
        self.inner.raft.install_snapshot(req).await
    }
}
