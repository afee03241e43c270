pub mod codec;

use uuid::Uuid;

pub type NodeId = u64;
pub type ShardId = u64;

/// Current value of a key as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    /// Log index of the write that produced this value.
    pub version: u64,
}

/// Commands replicated through the shard log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KvCommand {
    Put { key: String, value: String },
    Delete { key: String },
}

impl KvCommand {
    pub fn key(&self) -> &str {
        match self {
            KvCommand::Put { key, .. } | KvCommand::Delete { key } => key,
        }
    }
}

/// A write as proposed by a client. `request_id` is the idempotency key: a
/// retried write carrying the same id is applied at most once.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClientWrite {
    pub request_id: Option<Uuid>,
    pub command: KvCommand,
}

impl ClientWrite {
    pub fn new(command: KvCommand) -> Self {
        ClientWrite { request_id: None, command }
    }

    pub fn with_request_id(command: KvCommand, request_id: Uuid) -> Self {
        ClientWrite { request_id: Some(request_id), command }
    }
}

/// Responses returned from state machine apply.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KvResponse {
    Written { index: u64 },
    Deleted { index: u64, found: bool },
    /// A blank or membership entry; nothing visible to clients changed.
    Noop { index: u64 },
}

impl KvResponse {
    pub fn index(&self) -> u64 {
        match self {
            KvResponse::Written { index }
            | KvResponse::Deleted { index, .. }
            | KvResponse::Noop { index } => *index,
        }
    }
}

/// A key operation as received by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

impl Operation {
    pub fn key(&self) -> &str {
        match self {
            Operation::Put { key, .. } | Operation::Get { key } | Operation::Delete { key } => key,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Get { .. })
    }
}

/// An operation forwarded by the gateway to one replica of a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRequest {
    pub shard_id: ShardId,
    pub request_id: Option<Uuid>,
    pub op: Operation,
}

/// Result of a forwarded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardReply {
    Written { index: u64 },
    Found(KvEntry),
    Deleted { index: u64, found: bool },
}

/// Trim a raw key and reject it if nothing is left.
pub fn validate_key(raw: &str) -> Result<String, SkvError> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(SkvError::InvalidKey { reason: "key is empty".into() });
    }
    Ok(key.to_string())
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SkvError {
    #[error("invalid key: {reason}")]
    InvalidKey { reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("key '{key}' not found")]
    NotFound { key: String },
    #[error("shard {shard_id}: not the leader; hint: {leader:?}")]
    NotLeader { shard_id: ShardId, leader: Option<NodeId> },
    #[error("shard {shard_id}: replica is behind the leader; hint: {leader:?}")]
    Stale { shard_id: ShardId, leader: Option<NodeId> },
    #[error("shard {shard_id}: operation at index {index:?} timed out, outcome unknown")]
    Timeout { shard_id: ShardId, index: Option<u64> },
    #[error("shard {shard_id} unavailable: {reason}")]
    ShardUnavailable { shard_id: ShardId, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("consensus error: {0}")]
    Consensus(String),
}

impl SkvError {
    /// Status code an HTTP adapter should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            SkvError::InvalidKey { .. } | SkvError::InvalidArgument(_) | SkvError::NotFound { .. } => 422,
            SkvError::NotLeader { .. } => 421,
            SkvError::Stale { .. } | SkvError::ShardUnavailable { .. } => 503,
            SkvError::Timeout { .. } => 504,
            SkvError::Transport(_) => 502,
            SkvError::Storage(_) | SkvError::Codec(_) | SkvError::Consensus(_) => 500,
        }
    }

    /// Whether a client may retry the same request (with the same request id).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SkvError::NotLeader { .. }
                | SkvError::Stale { .. }
                | SkvError::Timeout { .. }
                | SkvError::ShardUnavailable { .. }
                | SkvError::Transport(_)
        )
    }
}
