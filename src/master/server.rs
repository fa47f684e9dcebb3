//! Master server
//!
//! Wires the components together: replays the operation log into the
//! namespace, spawns the always-on loops (heartbeat sweep, replication
//! reconciliation, garbage collection) and serves the HTTP API. The
//! loops are independent scheduled tasks that communicate only through
//! the shared metadata stores.

use crate::common::{MasterConfig, Result};
use crate::master::chunk_client::{ChunkServerClient, HttpChunkClient};
use crate::master::heartbeat::{HealthEvent, HeartbeatMonitor};
use crate::master::http::{create_router, MasterState};
use crate::master::lease::LeaseManager;
use crate::master::namespace::NamespaceStore;
use crate::master::replication::ReplicationManager;
use crate::master::ring::HashRing;
use std::sync::{Arc, RwLock};

pub struct Master {
    config: MasterConfig,
}

impl Master {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        tracing::info!("Starting master");
        tracing::info!("  HTTP API: {}", config.bind_addr);
        tracing::info!("  Op log: {}", config.log_path.display());
        tracing::info!("  Replicas: {}", config.replicas);
        tracing::info!(
            "  Heartbeat: every {}s, dead after {} missed",
            config.heartbeat_interval_secs,
            config.miss_threshold
        );

        let namespace = Arc::new(NamespaceStore::open(
            &config.log_path,
            config.log_sync,
            config.replicas,
        )?);
        if namespace.is_read_only() {
            tracing::error!(
                "operation log did not replay cleanly; serving reads only until reconciled"
            );
        } else {
            tracing::info!(
                files = namespace.file_count(),
                chunks = namespace.chunk_count(),
                "namespace recovered from operation log"
            );
        }

        let ring = Arc::new(RwLock::new(HashRing::new(config.virtual_nodes)));
        let monitor = Arc::new(HeartbeatMonitor::new(
            config.heartbeat_interval(),
            config.miss_threshold,
        ));
        let leases = Arc::new(LeaseManager::new(config.lease_duration()));
        let client: Arc<dyn ChunkServerClient> =
            Arc::new(HttpChunkClient::new(config.task_timeout()));
        let replication = Arc::new(ReplicationManager::new(
            client.clone(),
            config.max_task_retries,
            config.max_concurrent_tasks,
            config.task_timeout(),
        ));

        // Health sweep: drives the node state machine and ring membership
        let _sweep_handle = tokio::spawn(health_sweep_loop(
            monitor.clone(),
            ring.clone(),
            leases.clone(),
            config.clone(),
        ));

        // Replication reconciliation
        let _reconcile_handle = tokio::spawn(replication.clone().run(
            namespace.clone(),
            ring.clone(),
            monitor.clone(),
            config.reconcile_interval(),
        ));

        // Lazy garbage collection of orphaned chunks
        let _gc_handle = tokio::spawn(gc_loop(
            namespace.clone(),
            monitor.clone(),
            replication.clone(),
            client.clone(),
            config.clone(),
        ));

        let state = MasterState {
            namespace,
            ring,
            monitor,
            leases,
            replication,
            config: config.clone(),
        };
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        tracing::info!("Master ready");
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Periodic node health sweep. Death removes the node from the ring;
/// the under-replication it causes is picked up by the next
/// reconciliation cycle.
async fn health_sweep_loop(
    monitor: Arc<HeartbeatMonitor>,
    ring: Arc<RwLock<HashRing>>,
    leases: Arc<LeaseManager>,
    config: Arc<MasterConfig>,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval());
    loop {
        ticker.tick().await;

        for event in monitor.sweep() {
            match event {
                HealthEvent::Died(node) => {
                    ring.write().unwrap().leave(&node);
                    tracing::warn!(node = %node, "node dead, removed from ring");
                }
                HealthEvent::Suspected(node) => {
                    tracing::warn!(node = %node, "node suspected");
                }
            }
        }

        // Housekeeping only; expiry itself is passive
        leases.purge_expired_at(crate::common::timestamp_now_millis());
    }
}

/// Background sweep collecting chunks no live file references. The
/// grace period tolerates in-flight reads; delete commands go out only
/// after it elapses.
async fn gc_loop(
    namespace: Arc<NamespaceStore>,
    monitor: Arc<HeartbeatMonitor>,
    replication: Arc<ReplicationManager>,
    client: Arc<dyn ChunkServerClient>,
    config: Arc<MasterConfig>,
) {
    let grace_ms = config.gc_grace_secs * 1_000;
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.gc_interval_secs));
    loop {
        ticker.tick().await;

        let now = crate::common::timestamp_now_millis();
        namespace.mark_orphans(now);

        let collected = namespace.collect_orphans(now, grace_ms);
        for chunk in &collected {
            // A copy still in flight for a collected chunk is moot
            replication.supersede(&chunk.id);

            for node in &chunk.replicas {
                let Some(address) = monitor.address_of(node) else {
                    continue;
                };
                if let Err(e) = client.delete_chunk(&address, &chunk.id).await {
                    // The node will be told again via its next heartbeat
                    // response when it reports the unknown chunk
                    tracing::warn!(chunk = %chunk.id, node = %node, error = %e, "gc delete failed");
                }
            }
        }

        let purged = namespace.purge_tombstones();
        if !collected.is_empty() || !purged.is_empty() {
            tracing::info!(
                chunks = collected.len(),
                files = purged.len(),
                "garbage collection sweep"
            );
        }
    }
}
