pub mod config;
pub mod local;
pub mod network;
pub mod raft;
pub mod shard;
pub mod store;
pub mod transport;
pub mod types;


use std::future::Future;

use uuid::Uuid;

use skv_types::{KvEntry, NodeId, Operation, ShardId, ShardReply, ShardRequest, SkvError};

pub use config::RaftConfig;
pub use local::{LocalNetwork, LocalTransport};
pub use network::{split_append, NetworkFactory};
pub use raft::{RaftStatus, ReplicatedLog, Role};
pub use shard::ShardNode;
pub use store::{LogStore, StateMachine};
pub use transport::{RaftTransport, Reply};
pub use types::{
    decode_wire, encode_wire, AppendRequest, AppendResponse, Raft, RaftError, SnapshotError,
    SnapshotRequest, SnapshotResponse, TypeConfig, VoteRequest, VoteResponse,
};

// ---------------------------------------------------------------------------
// KvShard trait
// Uses RPITIT (Return Position Impl Trait In Trait, stable since Rust 1.75).
// The explicit `+ Send` bound on each future lets generic callers `.await`
// across thread boundaries.
// ---------------------------------------------------------------------------

/// Key operations served by one replica of one shard.
pub trait KvShard: Send + Sync + 'static {
    fn shard_id(&self) -> ShardId;

    fn node_id(&self) -> NodeId;

    /// Returns the log index of the write. A retried `request_id` yields the
    /// index of the original write.
    fn put(
        &self,
        key: String,
        value: String,
        request_id: Option<Uuid>,
    ) -> impl Future<Output = Result<u64, SkvError>> + Send;

    /// Returns the log index and whether the key existed.
    fn delete(
        &self,
        key: String,
        request_id: Option<Uuid>,
    ) -> impl Future<Output = Result<(u64, bool), SkvError>> + Send;

    /// Absent keys yield `SkvError::NotFound`.
    fn get(&self, key: String) -> impl Future<Output = Result<KvEntry, SkvError>> + Send;

    fn execute(
        &self,
        req: ShardRequest,
    ) -> impl Future<Output = Result<ShardReply, SkvError>> + Send {
        async move {
            if req.shard_id != self.shard_id() {
                return Err(SkvError::InvalidArgument(format!(
                    "request for shard {} sent to a replica of shard {}",
                    req.shard_id,
                    self.shard_id()
                )));
            }
            match req.op {
                Operation::Put { key, value } => {
                    let index = self.put(key, value, req.request_id).await?;
                    Ok(ShardReply::Written { index })
                }
                Operation::Get { key } => Ok(ShardReply::Found(self.get(key).await?)),
                Operation::Delete { key } => {
                    let (index, found) = self.delete(key, req.request_id).await?;
                    Ok(ShardReply::Deleted { index, found })
                }
            }
        }
    }
}
