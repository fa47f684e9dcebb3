//! Node failure and re-replication scenario
//!
//! Three live nodes, target replication 2. A chunk lands on two of
//! them; one holder stops heartbeating, is declared dead, and within
//! one reconciliation cycle the chunk is re-replicated onto the third
//! node.

use async_trait::async_trait;
use minigfs::common::{LogSyncPolicy, Result};
use minigfs::master::chunk_client::{ChunkServerClient, ReplicateCommand};
use minigfs::master::heartbeat::{HealthEvent, HeartbeatMonitor};
use minigfs::master::namespace::{new_chunk_id, NamespaceStore};
use minigfs::master::replication::ReplicationManager;
use minigfs::master::ring::HashRing;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tempfile::TempDir;

/// Records commands instead of talking to real storage nodes
struct RecordingClient {
    replicated: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<(String, String)>>,
}

impl RecordingClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            replicated: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChunkServerClient for RecordingClient {
    async fn replicate(&self, dest_address: &str, command: &ReplicateCommand) -> Result<()> {
        self.replicated
            .lock()
            .unwrap()
            .push((dest_address.to_string(), command.chunk_id.clone()));
        Ok(())
    }

    async fn delete_chunk(&self, address: &str, chunk_id: &str) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((address.to_string(), chunk_id.to_string()));
        Ok(())
    }
}

struct Cluster {
    _dir: TempDir,
    namespace: Arc<NamespaceStore>,
    monitor: Arc<HeartbeatMonitor>,
    ring: Arc<RwLock<HashRing>>,
}

fn cluster(target_replicas: usize, nodes: &[&str]) -> Cluster {
    let dir = TempDir::new().unwrap();
    let namespace = Arc::new(
        NamespaceStore::open(
            dir.path().join("oplog"),
            LogSyncPolicy::Always,
            target_replicas,
        )
        .unwrap(),
    );

    let monitor = Arc::new(HeartbeatMonitor::new(Duration::from_secs(10), 3));
    let mut ring = HashRing::new(20);
    for node in nodes {
        monitor.register_at(node, &format!("http://{}", node), 0, 0);
        ring.join(node);
    }

    Cluster {
        _dir: dir,
        namespace,
        monitor,
        ring: Arc::new(RwLock::new(ring)),
    }
}

/// Drive the health sweep the way the server loop does: apply ring
/// membership changes for every death.
fn sweep(cluster: &Cluster, now_ms: u64) {
    for event in cluster.monitor.sweep_at(now_ms) {
        if let HealthEvent::Died(node) = event {
            cluster.ring.write().unwrap().leave(&node);
        }
    }
}

#[tokio::test]
async fn test_death_then_re_replication() {
    let c = cluster(2, &["node-1", "node-2", "node-3"]);
    let client = RecordingClient::new();
    let replication = Arc::new(ReplicationManager::new(
        client.clone(),
        3,
        4,
        Duration::from_secs(5),
    ));

    // Create a chunk placed on two live nodes
    c.namespace.create_file("f").unwrap();
    let chunk_id = new_chunk_id();
    let replicas = c
        .ring
        .read()
        .unwrap()
        .locate_where(&chunk_id, 2, |n| c.monitor.is_alive(n));
    assert_eq!(replicas.len(), 2);
    let chunk = c.namespace.append_chunk("f", chunk_id, replicas).unwrap();

    let victim = chunk.replicas.iter().next().unwrap().clone();
    let survivors: Vec<String> = ["node-1", "node-2", "node-3"]
        .iter()
        .map(|s| s.to_string())
        .filter(|n| *n != victim)
        .collect();

    // Survivors keep heartbeating; the victim goes silent
    for now in [10_000u64, 20_000, 30_000, 40_000, 50_000] {
        for node in &survivors {
            c.monitor.heartbeat_at(node, 0, 0, now).unwrap();
        }
        sweep(&c, now + 1);
    }
    assert!(!c.monitor.is_alive(&victim));
    assert!(!c.ring.read().unwrap().contains(&victim));

    // One reconciliation cycle restores the replica count
    let report = replication
        .reconcile(&c.namespace, &c.ring, &c.monitor)
        .await;
    assert_eq!(report.repairs_completed, 1);

    let meta = c.namespace.get_chunk(&chunk.id).unwrap();
    let live = meta.live_replicas(|n| c.monitor.is_alive(n));
    assert_eq!(live.len(), 2);
    assert!(!live.contains(&victim));

    // The copy went to the one node that held nothing
    let issued = client.replicated.lock().unwrap();
    assert_eq!(issued.len(), 1);
}

#[tokio::test]
async fn test_convergence_within_bounded_cycles() {
    // Five nodes, two die; every chunk converges back to target within
    // a bounded number of cycles (one replica added per chunk per cycle)
    let nodes = ["node-1", "node-2", "node-3", "node-4", "node-5"];
    let c = cluster(3, &nodes);
    let client = RecordingClient::new();
    let replication = Arc::new(ReplicationManager::new(
        client.clone(),
        3,
        8,
        Duration::from_secs(5),
    ));

    c.namespace.create_file("f").unwrap();
    let mut chunk_ids = Vec::new();
    for _ in 0..8 {
        let chunk_id = new_chunk_id();
        let replicas = c
            .ring
            .read()
            .unwrap()
            .locate_where(&chunk_id, 3, |n| c.monitor.is_alive(n));
        let chunk = c.namespace.append_chunk("f", chunk_id, replicas).unwrap();
        chunk_ids.push(chunk.id);
    }

    // node-4 and node-5 fall silent
    for now in [10_000u64, 20_000, 30_000, 40_000, 50_000] {
        for node in &nodes[..3] {
            c.monitor.heartbeat_at(node, 0, 0, now).unwrap();
        }
        sweep(&c, now + 1);
    }
    assert_eq!(c.monitor.alive_nodes().len(), 3);

    // Deficits of up to two replicas repair within two cycles
    for _ in 0..2 {
        replication
            .reconcile(&c.namespace, &c.ring, &c.monitor)
            .await;
    }

    for chunk_id in &chunk_ids {
        let meta = c.namespace.get_chunk(chunk_id).unwrap();
        let live = meta.live_replicas(|n| c.monitor.is_alive(n));
        assert_eq!(live.len(), 3, "chunk {} did not converge", chunk_id);
    }
}
