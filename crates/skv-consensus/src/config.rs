use std::time::Duration;

use openraft::SnapshotPolicy;
use serde::{Deserialize, Serialize};
use skv_types::{ShardId, SkvError};

const MIB: u64 = 1024 * 1024;

/// Timing, batching and size knobs for one Raft group. Durations are in
/// milliseconds and sizes in bytes so the struct maps directly onto the
/// `[raft]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Deadline for a single peer RPC.
    pub rpc_timeout_ms: u64,
    /// How long a write waits for commit + apply before answering `Timeout`.
    pub propose_timeout_ms: u64,
    /// Deadline for one snapshot chunk.
    pub install_snapshot_timeout_ms: u64,
    pub max_append_entries: u64,
    /// Encoded size cap of the entries in one AppendEntries RPC.
    pub max_append_bytes: u64,
    pub snapshot_chunk_bytes: u64,
    /// Largest gRPC message a node sends or accepts.
    pub max_message_bytes: u64,
    /// Applied entries between snapshots. `0` disables compaction.
    pub snapshot_threshold: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            heartbeat_interval_ms: 100,
            election_timeout_min_ms: 500,
            election_timeout_max_ms: 1000,
            rpc_timeout_ms: 250,
            propose_timeout_ms: 5000,
            install_snapshot_timeout_ms: 2000,
            max_append_entries: 64,
            max_append_bytes: 2 * MIB,
            snapshot_chunk_bytes: 2 * MIB,
            max_message_bytes: 16 * MIB,
            snapshot_threshold: 1000,
        }
    }
}

impl RaftConfig {
    /// Short timeouts for in-process clusters.
    pub fn fast() -> Self {
        RaftConfig {
            heartbeat_interval_ms: 20,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            rpc_timeout_ms: 100,
            propose_timeout_ms: 2000,
            install_snapshot_timeout_ms: 500,
            max_append_entries: 16,
            snapshot_threshold: 0,
            ..RaftConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), SkvError> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(SkvError::InvalidArgument(format!(
                "election_timeout_min_ms ({}) must be below election_timeout_max_ms ({})",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(SkvError::InvalidArgument(format!(
                "heartbeat_interval_ms ({}) must be positive and below election_timeout_min_ms ({})",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.rpc_timeout_ms == 0 || self.propose_timeout_ms == 0 || self.install_snapshot_timeout_ms == 0 {
            return Err(SkvError::InvalidArgument("rpc, propose and snapshot timeouts must be positive".into()));
        }
        if self.max_append_entries == 0 {
            return Err(SkvError::InvalidArgument("max_append_entries must be positive".into()));
        }
        if self.max_append_bytes == 0 || self.snapshot_chunk_bytes == 0 {
            return Err(SkvError::InvalidArgument("append and snapshot chunk sizes must be positive".into()));
        }
        // Snapshot chunks travel JSON-encoded, up to four bytes per byte.
        let largest = self.max_append_bytes.max(self.snapshot_chunk_bytes.saturating_mul(4));
        if self.max_message_bytes <= largest {
            return Err(SkvError::InvalidArgument(format!(
                "max_message_bytes ({}) must exceed the largest encoded append or snapshot chunk ({largest})",
                self.max_message_bytes
            )));
        }
        Ok(())
    }

    /// The engine configuration for one shard group.
    pub fn to_openraft(&self, shard_id: ShardId) -> Result<openraft::Config, SkvError> {
        let snapshot_policy = match self.snapshot_threshold {
            0 => SnapshotPolicy::Never,
            n => SnapshotPolicy::LogsSinceLast(n),
        };
        openraft::Config {
            cluster_name: format!("skv-shard-{shard_id}"),
            heartbeat_interval: self.heartbeat_interval_ms,
            election_timeout_min: self.election_timeout_min_ms,
            election_timeout_max: self.election_timeout_max_ms,
            install_snapshot_timeout: self.install_snapshot_timeout_ms,
            max_payload_entries: self.max_append_entries,
            snapshot_policy,
            snapshot_max_chunk_size: self.snapshot_chunk_bytes,
            max_in_snapshot_log_to_keep: 0,
            ..Default::default()
        }
        .validate()
        .map_err(|e| SkvError::InvalidArgument(format!("raft config: {e}")))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn propose_timeout(&self) -> Duration {
        Duration::from_millis(self.propose_timeout_ms)
    }

    pub fn install_snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.install_snapshot_timeout_ms)
    }

    /// Deadline for a peer call carrying `bytes` of payload. Large appends
    /// and snapshot chunks get the snapshot deadline.
    pub fn deadline_for(&self, bytes: usize) -> Duration {
        if bytes as u64 > MIB {
            self.install_snapshot_timeout().max(self.rpc_timeout())
        } else {
            self.rpc_timeout()
        }
    }

    pub fn max_message_size(&self) -> usize {
        usize::try_from(self.max_message_bytes).unwrap_or(usize::MAX)
    }

    pub fn max_append_size(&self) -> usize {
        usize::try_from(self.max_append_bytes).unwrap_or(usize::MAX)
    }
}
