use skv_proto::v1::{KeyValue, ResponseHeader};
use skv_types::{KvEntry, NodeId, ShardId, SkvError};
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::{Code, Status};
use uuid::Uuid;

pub const KIND_KEY: &str = "skv-error-kind";
pub const SHARD_KEY: &str = "skv-shard-id";
pub const LEADER_KEY: &str = "skv-leader-id";
pub const INDEX_KEY: &str = "skv-index";
pub const DETAIL_KEY: &str = "skv-detail";

pub fn kv_entry_to_proto(entry: KvEntry) -> KeyValue {
    KeyValue { key: entry.key, value: entry.value, version: entry.version }
}

pub fn kv_entry_from_proto(kv: KeyValue) -> KvEntry {
    KvEntry { key: kv.key, value: kv.value, version: kv.version }
}

pub fn header(shard_id: ShardId, node_id: NodeId, raft_index: u64) -> ResponseHeader {
    ResponseHeader { shard_id, node_id, raft_index }
}

/// Empty string means "no idempotency key".
pub fn parse_request_id(raw: &str) -> Result<Option<Uuid>, Status> {
    if raw.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(raw)
        .map(Some)
        .map_err(|e| Status::invalid_argument(format!("request_id: {e}")))
}

fn insert(meta: &mut MetadataMap, key: &'static str, value: &str) {
    if let Ok(val) = MetadataValue::try_from(value) {
        meta.insert(key, val);
    }
}

pub fn skv_to_status(err: SkvError) -> Status {
    let message = err.to_string();
    let (mut status, kind) = match &err {
        SkvError::InvalidKey { .. } => (Status::invalid_argument(message), "invalid_key"),
        SkvError::InvalidArgument(_) => (Status::invalid_argument(message), "invalid_argument"),
        SkvError::NotFound { .. } => (Status::not_found(message), "not_found"),
        SkvError::NotLeader { .. } => (Status::failed_precondition(message), "not_leader"),
        SkvError::Stale { .. } => (Status::aborted(message), "stale"),
        SkvError::Timeout { .. } => (Status::deadline_exceeded(message), "timeout"),
        SkvError::ShardUnavailable { .. } => (Status::unavailable(message), "shard_unavailable"),
        SkvError::Transport(_) => (Status::unavailable(message), "transport"),
        SkvError::Storage(_) => (Status::internal(message), "storage"),
        SkvError::Codec(_) => (Status::internal(message), "codec"),
        SkvError::Consensus(_) => (Status::internal(message), "consensus"),
    };

    let meta = status.metadata_mut();
    insert(meta, KIND_KEY, kind);
    match &err {
        SkvError::InvalidKey { reason } => insert(meta, DETAIL_KEY, reason),
        SkvError::NotFound { key } => insert(meta, DETAIL_KEY, key),
        SkvError::InvalidArgument(s)
        | SkvError::Transport(s)
        | SkvError::Storage(s)
        | SkvError::Codec(s)
        | SkvError::Consensus(s) => insert(meta, DETAIL_KEY, s),
        SkvError::NotLeader { shard_id, leader } | SkvError::Stale { shard_id, leader } => {
            insert(meta, SHARD_KEY, &shard_id.to_string());
            if let Some(l) = leader {
                insert(meta, LEADER_KEY, &l.to_string());
            }
        }
        SkvError::Timeout { shard_id, index } => {
            insert(meta, SHARD_KEY, &shard_id.to_string());
            if let Some(i) = index {
                insert(meta, INDEX_KEY, &i.to_string());
            }
        }
        SkvError::ShardUnavailable { shard_id, reason } => {
            insert(meta, SHARD_KEY, &shard_id.to_string());
            insert(meta, DETAIL_KEY, reason);
        }
    }
    status
}

fn read<'a>(meta: &'a MetadataMap, key: &str) -> Option<&'a str> {
    meta.get(key).and_then(|v| v.to_str().ok())
}

fn read_u64(meta: &MetadataMap, key: &str) -> Option<u64> {
    read(meta, key).and_then(|v| v.parse().ok())
}

/// Rebuild the error a remote replica raised. A status without skv metadata
/// did not come from a replica and is reported as a transport failure.
pub fn status_to_skv(status: &Status) -> SkvError {
    let meta = status.metadata();
    let detail = read(meta, DETAIL_KEY).unwrap_or(status.message()).to_string();
    let shard_id = read_u64(meta, SHARD_KEY).unwrap_or_default();
    let leader = read_u64(meta, LEADER_KEY);

    match read(meta, KIND_KEY) {
        Some("invalid_key") => SkvError::InvalidKey { reason: detail },
        Some("invalid_argument") => SkvError::InvalidArgument(detail),
        Some("not_found") => SkvError::NotFound { key: detail },
        Some("not_leader") => SkvError::NotLeader { shard_id, leader },
        Some("stale") => SkvError::Stale { shard_id, leader },
        Some("timeout") => SkvError::Timeout { shard_id, index: read_u64(meta, INDEX_KEY) },
        Some("shard_unavailable") => SkvError::ShardUnavailable { shard_id, reason: detail },
        Some("storage") => SkvError::Storage(detail),
        Some("codec") => SkvError::Codec(detail),
        Some("consensus") => SkvError::Consensus(detail),
        Some("transport") => SkvError::Transport(detail),
        _ => match status.code() {
            Code::InvalidArgument => SkvError::InvalidArgument(status.message().to_string()),
            _ => SkvError::Transport(format!("{:?}: {}", status.code(), status.message())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn through_status(err: SkvError) -> (Code, SkvError) {
        let status = skv_to_status(err);
        (status.code(), status_to_skv(&status))
    }

    #[test]
    fn routing_errors_keep_their_hints() {
        let err = SkvError::NotLeader { shard_id: 3, leader: Some(9) };
        assert_eq!(through_status(err.clone()), (Code::FailedPrecondition, err));

        let err = SkvError::Stale { shard_id: 1, leader: None };
        assert_eq!(through_status(err.clone()), (Code::Aborted, err));

        let err = SkvError::Timeout { shard_id: 2, index: Some(41) };
        assert_eq!(through_status(err.clone()), (Code::DeadlineExceeded, err));
    }

    #[test]
    fn detail_errors_keep_their_payload() {
        for (err, code) in [
            (SkvError::NotFound { key: "foo".into() }, Code::NotFound),
            (SkvError::InvalidKey { reason: "key is empty".into() }, Code::InvalidArgument),
            (
                SkvError::ShardUnavailable { shard_id: 0, reason: "no quorum".into() },
                Code::Unavailable,
            ),
            (SkvError::Storage("disk full".into()), Code::Internal),
        ] {
            assert_eq!(through_status(err.clone()), (code, err));
        }
    }

    #[test]
    fn foreign_status_is_a_transport_error() {
        let status = Status::unavailable("tcp connect error");
        assert!(matches!(status_to_skv(&status), SkvError::Transport(_)));
    }

    #[test]
    fn request_id_parsing() {
        assert_eq!(parse_request_id("").unwrap(), None);
        let id = Uuid::new_v4();
        assert_eq!(parse_request_id(&id.to_string()).unwrap(), Some(id));
        assert_eq!(parse_request_id("nope").unwrap_err().code(), Code::InvalidArgument);
    }
}
