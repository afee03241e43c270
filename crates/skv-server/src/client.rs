use skv_gateway::ShardClient;
use skv_proto::v1::shard_service_client::ShardServiceClient;
use skv_proto::v1::{ShardDeleteRequest, ShardGetRequest, ShardPutRequest};
use skv_router::NodeSpec;
use skv_types::{Operation, ShardReply, ShardRequest, SkvError};

use crate::convert::{kv_entry_from_proto, status_to_skv};
use crate::transport::ChannelPool;

/// Forwards gateway requests to a replica's `ShardService`.
#[derive(Clone)]
pub struct GrpcShardClient {
    pool: ChannelPool,
}

impl GrpcShardClient {
    pub fn new(pool: ChannelPool) -> Self {
        GrpcShardClient { pool }
    }
}

impl ShardClient for GrpcShardClient {
    async fn forward(&self, node: &NodeSpec, req: ShardRequest) -> Result<ShardReply, SkvError> {
        let limit = self.pool.max_message_size();
        let mut client = ShardServiceClient::new(self.pool.channel(node.id, &node.addr)?)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);
        let shard_id = req.shard_id;
        let request_id = req.request_id.map(|id| id.to_string()).unwrap_or_default();

        match req.op {
            Operation::Put { key, value } => {
                let resp = client
                    .put(ShardPutRequest { shard_id, key, value, request_id })
                    .await
                    .map_err(|s| status_to_skv(&s))?
                    .into_inner();
                let index = resp.header.map(|h| h.raft_index).unwrap_or_default();
                Ok(ShardReply::Written { index })
            }
            Operation::Get { key } => {
                let resp = client
                    .get(ShardGetRequest { shard_id, key })
                    .await
                    .map_err(|s| status_to_skv(&s))?
                    .into_inner();
                let kv = resp
                    .kv
                    .ok_or_else(|| SkvError::Transport("get response without a value".into()))?;
                Ok(ShardReply::Found(kv_entry_from_proto(kv)))
            }
            Operation::Delete { key } => {
                let resp = client
                    .delete(ShardDeleteRequest { shard_id, key, request_id })
                    .await
                    .map_err(|s| status_to_skv(&s))?
                    .into_inner();
                let index = resp.header.map(|h| h.raft_index).unwrap_or_default();
                Ok(ShardReply::Deleted { index, found: resp.found })
            }
        }
    }
}
