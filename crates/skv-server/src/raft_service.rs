use std::sync::Arc;

use skv_consensus::{decode_wire, encode_wire, AppendRequest, RaftTransport, SnapshotRequest, VoteRequest};
use skv_proto::v1::{raft_service_server::RaftService, RaftMessage};
use skv_storage::{LogStorage, StateMachineStore};
use tonic::{Request, Response, Status};

use crate::convert::skv_to_status;
use crate::registry::ShardRegistry;

/// Inbound Raft RPCs. The payload is the JSON-encoded engine request; the
/// answer carries the engine's whole reply, errors included.
pub struct RaftServiceImpl<L, S, T> {
    shards: Arc<ShardRegistry<L, S, T>>,
}

impl<L, S, T> RaftServiceImpl<L, S, T> {
    pub fn new(shards: Arc<ShardRegistry<L, S, T>>) -> Self {
        RaftServiceImpl { shards }
    }
}

fn reply<R: serde::Serialize>(shard_id: u64, resp: &R) -> Result<Response<RaftMessage>, Status> {
    let payload = encode_wire(resp).map_err(skv_to_status)?;
    Ok(Response::new(RaftMessage { shard_id, payload }))
}

#[tonic::async_trait]
impl<L, S, T> RaftService for RaftServiceImpl<L, S, T>
where
    L: LogStorage,
    S: StateMachineStore,
    T: RaftTransport,
{
    async fn append_entries(
        &self,
        request: Request<RaftMessage>,
    ) -> Result<Response<RaftMessage>, Status> {
        let msg = request.into_inner();
        let shard = self.shards.get(msg.shard_id).map_err(skv_to_status)?;
        let req: AppendRequest = decode_wire(&msg.payload).map_err(skv_to_status)?;
        let resp = shard.raft().handle_append_entries(req).await;
        reply(msg.shard_id, &resp)
    }

    async fn vote(&self, request: Request<RaftMessage>) -> Result<Response<RaftMessage>, Status> {
        let msg = request.into_inner();
        let shard = self.shards.get(msg.shard_id).map_err(skv_to_status)?;
        let req: VoteRequest = decode_wire(&msg.payload).map_err(skv_to_status)?;
        let resp = shard.raft().handle_vote(req).await;
        reply(msg.shard_id, &resp)
    }

    async fn install_snapshot(
        &self,
        request: Request<RaftMessage>,
    ) -> Result<Response<RaftMessage>, Status> {
        let msg = request.into_inner();
        let shard = self.shards.get(msg.shard_id).map_err(skv_to_status)?;
        let req: SnapshotRequest = decode_wire(&msg.payload).map_err(skv_to_status)?;
        tracing::debug!(shard_id = msg.shard_id, offset = req.offset, done = req.done, "snapshot chunk received");
        let resp = shard.raft().handle_install_snapshot(req).await;
        reply(msg.shard_id, &resp)
    }
}
