use std::sync::Arc;

use skv_gateway::{Gateway, ShardClient, StoreResponse};
use skv_proto::v1::{kv_service_server::KvService, DeleteRequest, GetRequest, PutRequest, StoreReply};
use skv_types::Operation;
use tonic::{Request, Response, Status};

use crate::convert::skv_to_status;

/// Client-facing key operations, answered through the gateway.
pub struct KvServiceImpl<C> {
    gateway: Arc<Gateway<C>>,
}

impl<C: ShardClient> KvServiceImpl<C> {
    pub fn new(gateway: Arc<Gateway<C>>) -> Self {
        KvServiceImpl { gateway }
    }

    async fn run(&self, op: Operation) -> Result<Response<StoreReply>, Status> {
        let resp = self.gateway.handle(op).await.map_err(|e| {
            tracing::debug!(error = %e, "client operation failed");
            skv_to_status(e)
        })?;
        Ok(Response::new(store_reply(resp)))
    }
}

fn store_reply(resp: StoreResponse) -> StoreReply {
    StoreReply { message: resp.message, key: resp.data.key, value: resp.data.value }
}

#[tonic::async_trait]
impl<C: ShardClient> KvService for KvServiceImpl<C> {
    async fn put(&self, request: Request<PutRequest>) -> Result<Response<StoreReply>, Status> {
        let req = request.into_inner();
        self.run(Operation::Put { key: req.key, value: req.value }).await
    }

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<StoreReply>, Status> {
        let req = request.into_inner();
        self.run(Operation::Get { key: req.key }).await
    }

    async fn delete(&self, request: Request<DeleteRequest>) -> Result<Response<StoreReply>, Status> {
        let req = request.into_inner();
        self.run(Operation::Delete { key: req.key }).await
    }
}
