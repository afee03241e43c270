use skv_types::{ClientWrite, KvEntry, KvResponse, NodeId};
use uuid::Uuid;

/// Where an entry sits in the log: its index plus the leader (term and node)
/// that proposed it. Two entries with the same position are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogPosition {
    pub index: u64,
    pub term: u64,
    pub leader: NodeId,
}

impl LogPosition {
    pub fn new(index: u64, term: u64, leader: NodeId) -> Self {
        LogPosition { index, term, leader }
    }
}

/// One slot of a shard's replicated log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    /// Node that led `term` when the entry was proposed.
    pub leader: NodeId,
    pub payload: LogPayload,
}

impl LogEntry {
    pub fn blank(index: u64, term: u64) -> Self {
        LogEntry { index, term, leader: 0, payload: LogPayload::Blank }
    }

    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.index, self.term, self.leader)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LogPayload {
    /// No-op appended by a new leader to commit entries of earlier terms.
    Blank,
    /// A client write to apply to the state machine.
    Normal(ClientWrite),
    /// Encoded group membership. Only the consensus layer reads it.
    Membership(Vec<u8>),
}

/// The term a replica has seen and whom it voted for in it. `committed`
/// is set once a quorum granted the vote, i.e. `voted_for` leads the term.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Vote {
    pub term: u64,
    pub voted_for: Option<NodeId>,
    #[serde(default)]
    pub committed: bool,
}

/// Which entries a shard's log currently holds.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogState {
    pub first_index: Option<u64>,
    /// Newest stored entry. When the stored log is empty this falls back to
    /// `last_purged`, so it never moves backwards across a purge.
    pub last: Option<LogPosition>,
    /// Everything up to here lives only in the snapshot.
    pub last_purged: Option<LogPosition>,
}

impl LogState {
    pub fn last_index(&self) -> Option<u64> {
        self.last.map(|p| p.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotMeta {
    /// Last entry folded into the image, `None` for an empty state machine.
    pub last_log: Option<LogPosition>,
    /// Encoded membership in force at `last_log`.
    pub membership: Vec<u8>,
    pub snapshot_id: String,
}

impl SnapshotMeta {
    pub fn last_log_index(&self) -> u64 {
        self.last_log.map(|p| p.index).unwrap_or(0)
    }
}

/// Body of [`Snapshot::data`]. The idempotency table travels with the key/value map so a follower that
/// installs the snapshot still recognises retried writes.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct SnapshotContents {
    pub data: Vec<(String, KvEntry)>,
    /// Applied request ids, oldest first.
    pub requests: Vec<(Uuid, KvResponse)>,
}

/// State machine image up to `meta.last_log`, bincode-encoded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}
