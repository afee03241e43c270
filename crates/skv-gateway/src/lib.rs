//! Stateless front door: validates a key operation, routes it to the owning
//! shard and forwards it to that shard's leader.

pub mod client;
pub mod gateway;
pub mod response;

#[cfg(test)]
mod tests;

pub use client::{LocalShardClient, ShardClient};
pub use gateway::{Gateway, GatewayConfig};
pub use response::{ErrorBody, StoreData, StoreResponse};
