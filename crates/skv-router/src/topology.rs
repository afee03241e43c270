use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use skv_types::{NodeId, ShardId, SkvError};

use crate::{HashRouter, PartitionTable};

/// A storage node and the address its cluster RPC listener binds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub addr: String,
}

/// A shard, the top of its hash range and its replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSpec {
    pub id: ShardId,
    pub upper_bound: u32,
    pub members: Vec<NodeId>,
}

/// Static cluster membership supplied at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub nodes: Vec<NodeSpec>,
    pub shards: Vec<ShardSpec>,
}

impl ClusterTopology {
    /// Check membership references and build the partition table.
    pub fn validate(&self) -> Result<PartitionTable, SkvError> {
        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(node.id) {
                return Err(SkvError::InvalidArgument(format!("duplicate node id {}", node.id)));
            }
        }
        for shard in &self.shards {
            if shard.members.is_empty() {
                return Err(SkvError::InvalidArgument(format!("shard {} has no members", shard.id)));
            }
            let mut members = HashSet::new();
            for member in &shard.members {
                if !node_ids.contains(member) {
                    return Err(SkvError::InvalidArgument(format!(
                        "shard {} lists unknown node {member}",
                        shard.id
                    )));
                }
                if !members.insert(*member) {
                    return Err(SkvError::InvalidArgument(format!(
                        "shard {} lists node {member} twice",
                        shard.id
                    )));
                }
            }
        }
        let mut bounds: Vec<(u32, ShardId)> =
            self.shards.iter().map(|s| (s.upper_bound, s.id)).collect();
        bounds.sort_unstable();
        PartitionTable::new(bounds)
    }

    pub fn router(&self) -> Result<HashRouter, SkvError> {
        Ok(HashRouter::new(self.validate()?))
    }

    pub fn members(&self, shard: ShardId) -> Option<&[NodeId]> {
        self.shards.iter().find(|s| s.id == shard).map(|s| s.members.as_slice())
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Shards that list `node` as a replica.
    pub fn shards_hosted_by(&self, node: NodeId) -> Vec<ShardId> {
        self.shards
            .iter()
            .filter(|s| s.members.contains(&node))
            .map(|s| s.id)
            .collect()
    }

    /// The other replicas of `shard`, from `node`'s point of view.
    pub fn peers_of(&self, shard: ShardId, node: NodeId) -> Vec<NodeId> {
        self.members(shard)
            .map(|m| m.iter().copied().filter(|&id| id != node).collect())
            .unwrap_or_default()
    }
}
