use std::sync::Arc;

use skv_consensus::{KvShard, RaftTransport};
use skv_proto::v1::{
    shard_service_server::ShardService, ShardDeleteRequest, ShardDeleteResponse, ShardGetRequest,
    ShardGetResponse, ShardPutRequest, ShardPutResponse,
};
use skv_storage::{LogStorage, StateMachineStore};
use tonic::{Request, Response, Status};

use crate::convert::{header, kv_entry_to_proto, parse_request_id, skv_to_status};
use crate::registry::ShardRegistry;

/// Serves operations a gateway forwards to this node's replicas.
pub struct ShardServiceImpl<L, S, T> {
    shards: Arc<ShardRegistry<L, S, T>>,
}

impl<L, S, T> ShardServiceImpl<L, S, T> {
    pub fn new(shards: Arc<ShardRegistry<L, S, T>>) -> Self {
        ShardServiceImpl { shards }
    }
}

#[tonic::async_trait]
impl<L, S, T> ShardService for ShardServiceImpl<L, S, T>
where
    L: LogStorage,
    S: StateMachineStore,
    T: RaftTransport,
{
    async fn put(
        &self,
        request: Request<ShardPutRequest>,
    ) -> Result<Response<ShardPutResponse>, Status> {
        let req = request.into_inner();
        let request_id = parse_request_id(&req.request_id)?;
        let shard = self.shards.get(req.shard_id).map_err(skv_to_status)?;
        let index = shard.put(req.key, req.value, request_id).await.map_err(skv_to_status)?;
        Ok(Response::new(ShardPutResponse {
            header: Some(header(req.shard_id, shard.node_id(), index)),
        }))
    }

    async fn get(
        &self,
        request: Request<ShardGetRequest>,
    ) -> Result<Response<ShardGetResponse>, Status> {
        let req = request.into_inner();
        let shard = self.shards.get(req.shard_id).map_err(skv_to_status)?;
        let entry = shard.get(req.key).await.map_err(skv_to_status)?;
        Ok(Response::new(ShardGetResponse {
            header: Some(header(req.shard_id, shard.node_id(), entry.version)),
            kv: Some(kv_entry_to_proto(entry)),
        }))
    }

    async fn delete(
        &self,
        request: Request<ShardDeleteRequest>,
    ) -> Result<Response<ShardDeleteResponse>, Status> {
        let req = request.into_inner();
        let request_id = parse_request_id(&req.request_id)?;
        let shard = self.shards.get(req.shard_id).map_err(skv_to_status)?;
        let (index, found) = shard.delete(req.key, request_id).await.map_err(skv_to_status)?;
        Ok(Response::new(ShardDeleteResponse {
            header: Some(header(req.shard_id, shard.node_id(), index)),
            found,
        }))
    }
}
