//! Consistent-hash ring for chunk placement
//!
//! Each storage node occupies several virtual positions derived from
//! `BLAKE3(node_id # virtual_index)`. A chunk is owned by the first `n`
//! distinct nodes found walking clockwise from the chunk's own position.
//! Adding or removing one node only remaps chunks whose position falls
//! between that node's virtual positions and their predecessors; the
//! rest of the chunk population keeps its owners.

use crate::common::hash::ring_position;
use std::collections::{BTreeMap, BTreeSet};

/// Ring point key: position first, then virtual index and node id so
/// hash collisions order deterministically.
type RingPoint = (u64, u32, String);

#[derive(Debug, Clone)]
pub struct HashRing {
    virtual_nodes: u32,
    points: BTreeMap<RingPoint, String>,
    members: BTreeSet<String>,
}

impl HashRing {
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes,
            points: BTreeMap::new(),
            members: BTreeSet::new(),
        }
    }

    fn vnode_position(node_id: &str, index: u32) -> u64 {
        ring_position(&format!("{}#{}", node_id, index))
    }

    /// Insert a node's virtual positions. Idempotent.
    pub fn join(&mut self, node_id: &str) {
        if !self.members.insert(node_id.to_string()) {
            return;
        }
        for index in 0..self.virtual_nodes {
            let position = Self::vnode_position(node_id, index);
            self.points
                .insert((position, index, node_id.to_string()), node_id.to_string());
        }
        tracing::debug!(node = node_id, "node joined hash ring");
    }

    /// Remove a node's virtual positions. Idempotent.
    pub fn leave(&mut self, node_id: &str) {
        if !self.members.remove(node_id) {
            return;
        }
        for index in 0..self.virtual_nodes {
            let position = Self::vnode_position(node_id, index);
            self.points.remove(&(position, index, node_id.to_string()));
        }
        tracing::debug!(node = node_id, "node left hash ring");
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.members.contains(node_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.members.iter()
    }

    /// First `n` distinct nodes clockwise from the chunk's position.
    pub fn locate(&self, chunk_id: &str, n: usize) -> Vec<String> {
        self.locate_where(chunk_id, n, |_| true)
    }

    /// Like [`locate`](Self::locate) but only nodes passing `pred` count.
    ///
    /// Used by the replication manager to exclude current holders and
    /// unhealthy nodes when choosing repair destinations.
    pub fn locate_where<F>(&self, chunk_id: &str, n: usize, pred: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        if n == 0 || self.points.is_empty() {
            return Vec::new();
        }

        let start: RingPoint = (ring_position(chunk_id), 0, String::new());
        let mut selected = Vec::with_capacity(n);

        let clockwise = self
            .points
            .range(start.clone()..)
            .chain(self.points.range(..start));

        for (_, node_id) in clockwise {
            if selected.iter().any(|s| s == node_id) {
                continue;
            }
            if !pred(node_id) {
                continue;
            }
            selected.push(node_id.clone());
            if selected.len() == n {
                break;
            }
        }

        selected
    }

    /// Every member in ring-preference order for this chunk.
    ///
    /// The tail of this ordering is what over-replication trimming
    /// removes first.
    pub fn preference_order(&self, chunk_id: &str) -> Vec<String> {
        self.locate(chunk_id, self.members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(nodes: &[&str]) -> HashRing {
        let mut ring = HashRing::new(20);
        for node in nodes {
            ring.join(node);
        }
        ring
    }

    #[test]
    fn test_join_leave() {
        let mut ring = ring_with(&["node-1", "node-2"]);
        assert_eq!(ring.len(), 2);
        assert!(ring.contains("node-1"));

        ring.leave("node-1");
        assert_eq!(ring.len(), 1);
        assert!(!ring.contains("node-1"));

        // Leaving twice is a no-op
        ring.leave("node-1");
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_locate_deterministic() {
        let ring = ring_with(&["node-1", "node-2", "node-3"]);
        let owners1 = ring.locate("chunk-a", 2);
        let owners2 = ring.locate("chunk-a", 2);
        assert_eq!(owners1, owners2);
        assert_eq!(owners1.len(), 2);
    }

    #[test]
    fn test_locate_distinct() {
        let ring = ring_with(&["node-1", "node-2", "node-3"]);
        let owners = ring.locate("chunk-a", 3);
        assert_eq!(owners.len(), 3);
        let set: std::collections::HashSet<_> = owners.iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_locate_caps_at_membership() {
        let ring = ring_with(&["node-1", "node-2"]);
        let owners = ring.locate("chunk-a", 5);
        assert_eq!(owners.len(), 2);
    }

    #[test]
    fn test_locate_where_filters() {
        let ring = ring_with(&["node-1", "node-2", "node-3"]);
        let owners = ring.locate_where("chunk-a", 3, |n| n != "node-2");
        assert_eq!(owners.len(), 2);
        assert!(!owners.contains(&"node-2".to_string()));
    }

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::new(20);
        assert!(ring.locate("chunk-a", 3).is_empty());
    }

    #[test]
    fn test_minimal_remapping_on_leave() {
        // Removing one node must only remap chunks it owned; every other
        // chunk keeps its primary owner.
        let mut ring = ring_with(&["node-1", "node-2", "node-3", "node-4", "node-5"]);

        let chunk_ids: Vec<String> = (0..300).map(|i| format!("chunk-{}", i)).collect();
        let before: Vec<String> = chunk_ids
            .iter()
            .map(|c| ring.locate(c, 1)[0].clone())
            .collect();

        ring.leave("node-3");

        for (chunk, old_owner) in chunk_ids.iter().zip(&before) {
            let new_owner = &ring.locate(chunk, 1)[0];
            if old_owner != "node-3" {
                assert_eq!(new_owner, old_owner, "chunk {} moved needlessly", chunk);
            } else {
                assert_ne!(new_owner, "node-3");
            }
        }
    }

    #[test]
    fn test_minimal_remapping_on_join() {
        let mut ring = ring_with(&["node-1", "node-2", "node-3", "node-4"]);

        let chunk_ids: Vec<String> = (0..300).map(|i| format!("chunk-{}", i)).collect();
        let before: Vec<String> = chunk_ids
            .iter()
            .map(|c| ring.locate(c, 1)[0].clone())
            .collect();

        ring.join("node-5");

        for (chunk, old_owner) in chunk_ids.iter().zip(&before) {
            let new_owner = &ring.locate(chunk, 1)[0];
            // A chunk either kept its owner or moved to the new node
            assert!(
                new_owner == old_owner || new_owner == "node-5",
                "chunk {} moved from {} to {}",
                chunk,
                old_owner,
                new_owner
            );
        }
    }

    #[test]
    fn test_preference_order_covers_all_members() {
        let ring = ring_with(&["node-1", "node-2", "node-3"]);
        let order = ring.preference_order("chunk-a");
        assert_eq!(order.len(), 3);
    }
}
