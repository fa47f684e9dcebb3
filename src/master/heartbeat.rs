//! Heartbeat monitor: per-node health state machine
//!
//! Storage nodes push periodic heartbeats carrying capacity figures and
//! their chunk inventory. The monitor owns node health exclusively:
//! `Alive -> Suspect` after one missed interval, `Suspect -> Alive` on
//! any heartbeat, `Suspect -> Dead` after the configured number of
//! consecutive missed intervals. `Dead -> Alive` happens only through a
//! fresh registration handshake: a silently resuming node may have
//! lost its chunks and must not be trusted as if nothing happened.
//!
//! The periodic sweep never blocks heartbeat ingestion: both operate on
//! the same concurrent node table with entry-level locking.

use crate::common::{Error, NodeState, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One chunk as reported in a heartbeat inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    pub chunk_id: String,
    pub version: u64,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Heartbeat message (node -> master)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    #[serde(default)]
    pub chunks: Vec<ChunkReport>,
    pub timestamp_ms: u64,
}

/// Command piggybacked on a heartbeat response (master -> node)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCommand {
    pub op: String,
    pub chunk_id: String,
    pub reason: String,
}

impl NodeCommand {
    pub fn delete(chunk_id: &str, reason: &str) -> Self {
        Self {
            op: "delete".to_string(),
            chunk_id: chunk_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Per-node record. Health is mutated only by this module; the record
/// survives death so history and addresses remain queryable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub address: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub state: NodeState,
    pub last_heartbeat_ms: u64,
    pub registered_at_ms: u64,
}

/// Health transition surfaced to the server loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    Suspected(String),
    Died(String),
}

pub struct HeartbeatMonitor {
    nodes: DashMap<String, NodeInfo>,
    interval_ms: u64,
    miss_threshold: u32,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, miss_threshold: u32) -> Self {
        Self {
            nodes: DashMap::new(),
            interval_ms: interval.as_millis() as u64,
            miss_threshold,
        }
    }

    /// Registration handshake. Creates the node, or revives a dead one.
    /// Re-registering a live node updates its address and capacity (a
    /// restarted node re-runs the handshake before heartbeating).
    pub fn register(&self, node_id: &str, address: &str, capacity_bytes: u64) -> NodeInfo {
        self.register_at(node_id, address, capacity_bytes, crate::common::timestamp_now_millis())
    }

    pub fn register_at(
        &self,
        node_id: &str,
        address: &str,
        capacity_bytes: u64,
        now_ms: u64,
    ) -> NodeInfo {
        let mut entry = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeInfo {
                node_id: node_id.to_string(),
                address: address.to_string(),
                capacity_bytes,
                used_bytes: 0,
                state: NodeState::Alive,
                last_heartbeat_ms: now_ms,
                registered_at_ms: now_ms,
            });

        let was = entry.state;
        entry.address = address.to_string();
        entry.capacity_bytes = capacity_bytes;
        entry.state = NodeState::Alive;
        entry.last_heartbeat_ms = now_ms;
        entry.registered_at_ms = now_ms;

        if was == NodeState::Dead {
            tracing::info!(node = node_id, "dead node re-registered");
        } else {
            tracing::info!(
                node = node_id,
                address,
                capacity = %crate::common::format_bytes(capacity_bytes),
                "node registered"
            );
        }

        entry.clone()
    }

    /// Ingest one heartbeat. Unknown and dead nodes are refused so they
    /// run the registration handshake first.
    pub fn heartbeat(&self, node_id: &str, capacity_bytes: u64, used_bytes: u64) -> Result<NodeState> {
        self.heartbeat_at(node_id, capacity_bytes, used_bytes, crate::common::timestamp_now_millis())
    }

    pub fn heartbeat_at(
        &self,
        node_id: &str,
        capacity_bytes: u64,
        used_bytes: u64,
        now_ms: u64,
    ) -> Result<NodeState> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::NodeNotRegistered(node_id.to_string()))?;

        if node.state == NodeState::Dead {
            return Err(Error::NodeDead(node_id.to_string()));
        }

        if node.state == NodeState::Suspect {
            tracing::info!(node = node_id, "suspect node resumed heartbeating");
        }

        node.state = NodeState::Alive;
        node.last_heartbeat_ms = now_ms;
        node.capacity_bytes = capacity_bytes;
        node.used_bytes = used_bytes;

        Ok(node.state)
    }

    /// Periodic health sweep. Applies at most one transition per node
    /// per sweep, so a node always passes through `Suspect` before it
    /// can be declared dead.
    pub fn sweep(&self) -> Vec<HealthEvent> {
        self.sweep_at(crate::common::timestamp_now_millis())
    }

    pub fn sweep_at(&self, now_ms: u64) -> Vec<HealthEvent> {
        let mut events = Vec::new();

        for mut node in self.nodes.iter_mut() {
            if node.state == NodeState::Dead {
                continue;
            }

            let elapsed = now_ms.saturating_sub(node.last_heartbeat_ms);
            let missed = (elapsed / self.interval_ms) as u32;

            match node.state {
                NodeState::Alive if missed >= 1 => {
                    tracing::warn!(node = %node.node_id, missed, "heartbeat missed, suspecting");
                    node.state = NodeState::Suspect;
                    events.push(HealthEvent::Suspected(node.node_id.clone()));
                }
                NodeState::Suspect if missed >= self.miss_threshold => {
                    tracing::warn!(node = %node.node_id, missed, "heartbeat timeout, declaring dead");
                    node.state = NodeState::Dead;
                    events.push(HealthEvent::Died(node.node_id.clone()));
                }
                _ => {}
            }
        }

        events
    }

    pub fn get(&self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.get(node_id).map(|n| n.clone())
    }

    pub fn is_alive(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .map(|n| n.state == NodeState::Alive)
            .unwrap_or(false)
    }

    pub fn state_of(&self, node_id: &str) -> Option<NodeState> {
        self.nodes.get(node_id).map(|n| n.state)
    }

    pub fn address_of(&self, node_id: &str) -> Option<String> {
        self.nodes.get(node_id).map(|n| n.address.clone())
    }

    pub fn alive_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Alive)
            .map(|n| n.node_id.clone())
            .collect()
    }

    pub fn nodes_snapshot(&self) -> Vec<NodeInfo> {
        self.nodes.iter().map(|n| n.clone()).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        // 10s interval, dead after 3 consecutive missed intervals
        HeartbeatMonitor::new(Duration::from_secs(10), 3)
    }

    #[test]
    fn test_register_and_heartbeat() {
        let mon = monitor();
        mon.register_at("node-1", "http://n1:6000", 1_000, 0);

        let state = mon.heartbeat_at("node-1", 1_000, 100, 5_000).unwrap();
        assert_eq!(state, NodeState::Alive);

        let info = mon.get("node-1").unwrap();
        assert_eq!(info.used_bytes, 100);
        assert_eq!(info.last_heartbeat_ms, 5_000);
    }

    #[test]
    fn test_heartbeat_unknown_refused() {
        let mon = monitor();
        assert!(matches!(
            mon.heartbeat_at("ghost", 0, 0, 0),
            Err(Error::NodeNotRegistered(_))
        ));
    }

    #[test]
    fn test_suspect_then_dead() {
        let mon = monitor();
        mon.register_at("node-1", "http://n1:6000", 0, 0);

        // One missed interval: alive -> suspect
        let events = mon.sweep_at(15_000);
        assert_eq!(events, vec![HealthEvent::Suspected("node-1".into())]);
        assert_eq!(mon.state_of("node-1"), Some(NodeState::Suspect));

        // Below the threshold the suspect lingers
        assert!(mon.sweep_at(25_000).is_empty());
        assert_eq!(mon.state_of("node-1"), Some(NodeState::Suspect));

        // Threshold reached: suspect -> dead
        let events = mon.sweep_at(35_000);
        assert_eq!(events, vec![HealthEvent::Died("node-1".into())]);
        assert_eq!(mon.state_of("node-1"), Some(NodeState::Dead));
    }

    #[test]
    fn test_one_transition_per_sweep() {
        let mon = monitor();
        mon.register_at("node-1", "http://n1:6000", 0, 0);

        // Way past the death threshold, but the first sweep only suspects
        let events = mon.sweep_at(500_000);
        assert_eq!(events, vec![HealthEvent::Suspected("node-1".into())]);

        let events = mon.sweep_at(500_001);
        assert_eq!(events, vec![HealthEvent::Died("node-1".into())]);
    }

    #[test]
    fn test_suspect_revived_by_heartbeat() {
        let mon = monitor();
        mon.register_at("node-1", "http://n1:6000", 0, 0);

        mon.sweep_at(15_000);
        assert_eq!(mon.state_of("node-1"), Some(NodeState::Suspect));

        mon.heartbeat_at("node-1", 0, 0, 16_000).unwrap();
        assert_eq!(mon.state_of("node-1"), Some(NodeState::Alive));
    }

    #[test]
    fn test_dead_requires_registration() {
        let mon = monitor();
        mon.register_at("node-1", "http://n1:6000", 0, 0);
        mon.sweep_at(15_000);
        mon.sweep_at(45_000);
        assert_eq!(mon.state_of("node-1"), Some(NodeState::Dead));

        // Silent resume is refused
        assert!(matches!(
            mon.heartbeat_at("node-1", 0, 0, 46_000),
            Err(Error::NodeDead(_))
        ));

        // The handshake revives it
        mon.register_at("node-1", "http://n1:6001", 0, 50_000);
        assert_eq!(mon.state_of("node-1"), Some(NodeState::Alive));
        assert_eq!(mon.address_of("node-1").unwrap(), "http://n1:6001");
        assert!(mon.heartbeat_at("node-1", 0, 0, 51_000).is_ok());
    }

    #[test]
    fn test_dead_node_kept_in_table() {
        let mon = monitor();
        mon.register_at("node-1", "http://n1:6000", 0, 0);
        mon.sweep_at(15_000);
        mon.sweep_at(45_000);

        // Removed from placement, not from history
        assert!(mon.get("node-1").is_some());
        assert!(mon.alive_nodes().is_empty());
    }

    #[test]
    fn test_alive_nodes_listing() {
        let mon = monitor();
        mon.register_at("node-1", "a", 0, 0);
        mon.register_at("node-2", "b", 0, 0);
        mon.heartbeat_at("node-2", 0, 0, 1_000).unwrap();

        let mut alive = mon.alive_nodes();
        alive.sort();
        assert_eq!(alive, vec!["node-1".to_string(), "node-2".to_string()]);
    }
}
