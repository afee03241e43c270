//! openraft type configuration and the mapping between its types and the
//! storage crate's.

use std::io::Cursor;

use openraft::{CommittedLeaderId, EmptyNode, Entry, EntryPayload, LogId, StoredMembership};
use serde::{de::DeserializeOwned, Serialize};

use skv_storage::{LogEntry, LogPayload, LogPosition, Vote};
use skv_types::{ClientWrite, KvResponse, NodeId, SkvError};

openraft::declare_raft_types!(
    /// Raft types of one shard group: client writes in, apply results out.
    /// Nodes carry no payload; transports resolve addresses from the
    /// cluster topology.
    pub TypeConfig:
        D = ClientWrite,
        R = KvResponse,
        NodeId = NodeId,
        Node = EmptyNode,
        Entry = Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime,
);

pub type Raft = openraft::Raft<TypeConfig>;
pub type RaftError<E = openraft::error::Infallible> = openraft::error::RaftError<NodeId, E>;
pub type AppendRequest = openraft::raft::AppendEntriesRequest<TypeConfig>;
pub type AppendResponse = openraft::raft::AppendEntriesResponse<NodeId>;
pub type VoteRequest = openraft::raft::VoteRequest<NodeId>;
pub type VoteResponse = openraft::raft::VoteResponse<NodeId>;
pub type SnapshotRequest = openraft::raft::InstallSnapshotRequest<TypeConfig>;
pub type SnapshotResponse = openraft::raft::InstallSnapshotResponse<NodeId>;
pub type SnapshotError = RaftError<openraft::error::InstallSnapshotError>;
pub type Membership = StoredMembership<NodeId, EmptyNode>;

/// Encoding of Raft RPC bodies and membership blobs. JSON, because some
/// openraft types only round-trip through a self-describing format.
pub fn encode_wire<T: Serialize>(value: &T) -> Result<Vec<u8>, SkvError> {
    serde_json::to_vec(value).map_err(|e| SkvError::Codec(e.to_string()))
}

pub fn decode_wire<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SkvError> {
    serde_json::from_slice(bytes).map_err(|e| SkvError::Codec(e.to_string()))
}

pub fn log_id(p: LogPosition) -> LogId<NodeId> {
    LogId::new(CommittedLeaderId::new(p.term, p.leader), p.index)
}

pub fn position(id: &LogId<NodeId>) -> LogPosition {
    LogPosition::new(id.index, id.leader_id.term, id.leader_id.node_id)
}

pub(crate) fn to_stored_vote(vote: &openraft::Vote<NodeId>) -> Vote {
    Vote {
        term: vote.leader_id.term,
        voted_for: Some(vote.leader_id.node_id),
        committed: vote.committed,
    }
}

pub(crate) fn from_stored_vote(vote: Vote) -> openraft::Vote<NodeId> {
    let node = vote.voted_for.unwrap_or_default();
    if vote.committed {
        openraft::Vote::new_committed(vote.term, node)
    } else {
        openraft::Vote::new(vote.term, node)
    }
}

/// Log representation of an entry. Membership entries keep the bare
/// membership; the log position already says where it took effect.
pub(crate) fn to_log_entry(entry: &Entry<TypeConfig>) -> Result<LogEntry, SkvError> {
    let payload = match &entry.payload {
        EntryPayload::Blank => LogPayload::Blank,
        EntryPayload::Normal(write) => LogPayload::Normal(write.clone()),
        EntryPayload::Membership(m) => LogPayload::Membership(encode_wire(m)?),
    };
    Ok(with_position(position(&entry.log_id), payload))
}

pub(crate) fn from_log_entry(entry: LogEntry) -> Result<Entry<TypeConfig>, SkvError> {
    let log_id = log_id(entry.position());
    let payload = match entry.payload {
        LogPayload::Blank => EntryPayload::Blank,
        LogPayload::Normal(write) => EntryPayload::Normal(write),
        LogPayload::Membership(bytes) => EntryPayload::Membership(decode_wire(&bytes)?),
    };
    Ok(Entry { log_id, payload })
}

/// State machine representation of an entry. The membership is stored with
/// its log id so `applied_state` can hand back a [`Membership`].
pub(crate) fn to_applied_entry(entry: Entry<TypeConfig>) -> Result<LogEntry, SkvError> {
    let payload = match entry.payload {
        EntryPayload::Blank => LogPayload::Blank,
        EntryPayload::Normal(write) => LogPayload::Normal(write),
        EntryPayload::Membership(m) => {
            LogPayload::Membership(encode_wire(&Membership::new(Some(entry.log_id), m))?)
        }
    };
    Ok(with_position(position(&entry.log_id), payload))
}

pub(crate) fn decode_membership(bytes: &[u8]) -> Result<Membership, SkvError> {
    if bytes.is_empty() {
        return Ok(Membership::default());
    }
    decode_wire(bytes)
}

fn with_position(p: LogPosition, payload: LogPayload) -> LogEntry {
    LogEntry { index: p.index, term: p.term, leader: p.leader, payload }
}
