//! gRPC surface of a storage node: the client `KvService`, the
//! cluster-internal `RaftService` and `ShardService`, and the transports
//! that call them on peers.

mod client;
mod convert;
mod kv_service;
mod raft_service;
mod registry;
mod shard_service;
mod transport;


use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use skv_consensus::RaftTransport;
use skv_gateway::{Gateway, ShardClient};
use skv_proto::v1::{
    kv_service_server::KvServiceServer, raft_service_server::RaftServiceServer,
    shard_service_server::ShardServiceServer,
};
use skv_storage::{LogStorage, StateMachineStore};
use tonic_reflection::server::Builder as ReflectionBuilder;

pub use client::GrpcShardClient;
pub use convert::{skv_to_status, status_to_skv};
pub use kv_service::KvServiceImpl;
pub use raft_service::RaftServiceImpl;
pub use registry::ShardRegistry;
pub use shard_service::ShardServiceImpl;
pub use transport::{ChannelPool, GrpcTransport};

/// Serve `KvService` on `addr`. Messages up to `max_message_size` bytes are
/// accepted and sent.
pub async fn serve_client<C: ShardClient>(
    addr: SocketAddr,
    gateway: Arc<Gateway<C>>,
    max_message_size: usize,
) -> anyhow::Result<()> {
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(skv_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("failed to build reflection service")?;
    tracing::info!(%addr, "client gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(
            KvServiceServer::new(KvServiceImpl::new(gateway))
                .max_decoding_message_size(max_message_size)
                .max_encoding_message_size(max_message_size),
        )
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}

/// Serve the peer-facing `RaftService` and `ShardService` on `addr`. The
/// message limit must cover the largest encoded append or snapshot chunk.
pub async fn serve_cluster<L, S, T>(
    addr: SocketAddr,
    shards: Arc<ShardRegistry<L, S, T>>,
    max_message_size: usize,
) -> anyhow::Result<()>
where
    L: LogStorage,
    S: StateMachineStore,
    T: RaftTransport,
{
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(skv_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("failed to build reflection service")?;
    tracing::info!(%addr, shards = shards.len(), "cluster gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(
            RaftServiceServer::new(RaftServiceImpl::new(shards.clone()))
                .max_decoding_message_size(max_message_size)
                .max_encoding_message_size(max_message_size),
        )
        .add_service(
            ShardServiceServer::new(ShardServiceImpl::new(shards))
                .max_decoding_message_size(max_message_size)
                .max_encoding_message_size(max_message_size),
        )
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}
