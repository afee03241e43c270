use std::future::Future;

use skv_types::{NodeId, SkvError};

use crate::types::{
    AppendRequest, AppendResponse, RaftError, SnapshotError, SnapshotRequest, SnapshotResponse,
    VoteRequest, VoteResponse,
};

/// What a peer's Raft answered: its response, or the error it raised.
pub type Reply<R, E = RaftError> = Result<R, E>;

/// Outbound Raft RPCs from one replica of a shard to its peers.
///
/// The transport is bound to a shard when it is built; `target` names the
/// peer. Failing to reach the peer is `SkvError::Transport`. An error raised
/// by the peer's Raft comes back as the inner `Err` of the [`Reply`].
pub trait RaftTransport: Clone + Send + Sync + 'static {
    fn append_entries(
        &self,
        target: NodeId,
        req: AppendRequest,
    ) -> impl Future<Output = Result<Reply<AppendResponse>, SkvError>> + Send;

    fn vote(
        &self,
        target: NodeId,
        req: VoteRequest,
    ) -> impl Future<Output = Result<Reply<VoteResponse>, SkvError>> + Send;

    /// One chunk of a snapshot.
    fn install_snapshot(
        &self,
        target: NodeId,
        req: SnapshotRequest,
    ) -> impl Future<Output = Result<Reply<SnapshotResponse, SnapshotError>, SkvError>> + Send;
}
