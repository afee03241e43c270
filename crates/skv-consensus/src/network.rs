//! openraft's network seam, carried over a [`RaftTransport`].

use std::error::Error;

use openraft::error::{NetworkError, RPCError, RemoteError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::AppendEntriesResponse;
use openraft::EmptyNode;

use skv_types::{NodeId, SkvError};

use crate::transport::RaftTransport;
use crate::types::{
    encode_wire, AppendRequest, AppendResponse, RaftError, SnapshotError, SnapshotRequest,
    SnapshotResponse, TypeConfig, VoteRequest, VoteResponse,
};

type RpcError<E = RaftError> = RPCError<NodeId, EmptyNode, E>;

fn transport_error<E: Error>(e: SkvError) -> RpcError<E> {
    match e {
        SkvError::Transport(_) => RPCError::Unreachable(Unreachable::new(&e)),
        _ => RPCError::Network(NetworkError::new(&e)),
    }
}

/// Split `req` into consecutive requests whose entries encode to at most
/// `max_bytes` each. An entry larger than the cap travels alone. Every
/// follow-up request continues from the last entry of the one before and
/// never advertises a commit beyond what it carries.
pub fn split_append(req: AppendRequest, max_bytes: usize) -> Result<Vec<AppendRequest>, SkvError> {
    let AppendRequest { vote, mut prev_log_id, entries, leader_commit } = req;
    let mut requests = Vec::new();
    let mut batch = Vec::new();
    let mut batch_bytes = 0;

    for entry in entries {
        let size = encode_wire(&entry)?.len();
        if !batch.is_empty() && batch_bytes + size > max_bytes {
            let full = std::mem::take(&mut batch);
            let last = full.last().map(|e: &openraft::Entry<TypeConfig>| e.log_id);
            requests.push(AppendRequest {
                vote: vote.clone(),
                prev_log_id,
                entries: full,
                leader_commit: leader_commit.min(last),
            });
            prev_log_id = last;
            batch_bytes = 0;
        }
        batch_bytes += size;
        batch.push(entry);
    }
    requests.push(AppendRequest { vote, prev_log_id, entries: batch, leader_commit });
    Ok(requests)
}

/// Hands openraft one [`Network`] per peer.
#[derive(Clone)]
pub struct NetworkFactory<T> {
    transport: T,
    max_append_bytes: usize,
}

impl<T: RaftTransport> NetworkFactory<T> {
    pub fn new(transport: T, max_append_bytes: usize) -> Self {
        NetworkFactory { transport, max_append_bytes }
    }
}

impl<T: RaftTransport> RaftNetworkFactory<TypeConfig> for NetworkFactory<T> {
    type Network = Network<T>;

    async fn new_client(&mut self, target: NodeId, _node: &EmptyNode) -> Self::Network {
        Network { target, transport: self.transport.clone(), max_append_bytes: self.max_append_bytes }
    }
}

pub struct Network<T> {
    target: NodeId,
    transport: T,
    max_append_bytes: usize,
}

impl<T: RaftTransport> RaftNetwork<TypeConfig> for Network<T> {
    async fn append_entries(
        &mut self,
        rpc: AppendRequest,
        _option: RPCOption,
    ) -> Result<AppendResponse, RpcError> {
        let requests = split_append(rpc, self.max_append_bytes).map_err(transport_error)?;
        if requests.len() > 1 {
            tracing::debug!(target = self.target, parts = requests.len(), "append split by size");
        }
        let mut requests = requests.into_iter().peekable();
        while let Some(req) = requests.next() {
            let resp = self
                .transport
                .append_entries(self.target, req)
                .await
                .map_err(transport_error)?
                .map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))?;
            if requests.peek().is_none() || !matches!(resp, AppendEntriesResponse::Success) {
                return Ok(resp);
            }
        }
        Ok(AppendEntriesResponse::Success)
    }

    async fn install_snapshot(
        &mut self,
        rpc: SnapshotRequest,
        _option: RPCOption,
    ) -> Result<SnapshotResponse, RpcError<SnapshotError>> {
        self.transport
            .install_snapshot(self.target, rpc)
            .await
            .map_err(transport_error)?
            .map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }

    async fn vote(&mut self, rpc: VoteRequest, _option: RPCOption) -> Result<VoteResponse, RpcError> {
        self.transport
            .vote(self.target, rpc)
            .await
            .map_err(transport_error)?
            .map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}
