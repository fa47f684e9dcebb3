//! Replication manager: reconcile desired vs actual replica placement
//!
//! A continuous loop compares each chunk's live replica count (replicas
//! on `Alive` nodes) against its target. Deficits are repaired by
//! instructing a fresh destination to pull the chunk from a live
//! holder; surpluses are trimmed by deleting the replicas the hash ring
//! prefers least. Copies run on a bounded task pool with per-command
//! timeouts; no chunk lock is held while bytes move, only the brief
//! metadata update on completion is serialized.
//!
//! At most one copy task exists per chunk. Retries walk the ring's next
//! candidate destinations up to a bound; exhaustion parks the chunk as
//! "under-replicated, unresolved" for external visibility instead of
//! retrying forever.

use crate::common::Error;
use crate::master::chunk_client::{ChunkServerClient, ReplicateCommand};
use crate::master::heartbeat::HeartbeatMonitor;
use crate::master::namespace::{ChunkMeta, NamespaceStore};
use crate::master::ring::HashRing;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    InFlight,
    Failed,
    Superseded,
}

/// One outstanding copy, keyed by chunk id in the task table
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationTask {
    pub chunk_id: String,
    pub source: String,
    pub dest: String,
    pub issued_at_ms: u64,
    pub attempts: u32,
    pub status: TaskStatus,
}

/// Summary of one reconciliation cycle
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub chunks_checked: usize,
    pub repairs_started: usize,
    pub repairs_completed: usize,
    pub trims_completed: usize,
    /// Chunks parked after exhausting retry destinations
    pub unresolved: Vec<String>,
    /// Chunks with zero live replicas, so nothing is left to copy from
    pub lost: Vec<String>,
}

/// Chunk surfaced as degraded through the admin status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct DegradedChunk {
    pub chunk_id: String,
    pub live_replicas: usize,
    pub target_replicas: usize,
    pub reason: String,
}

pub struct ReplicationManager {
    tasks: Arc<DashMap<String, ReplicationTask>>,
    /// chunk id -> attempts burned before the chunk was parked
    unresolved: Arc<DashMap<String, u32>>,
    client: Arc<dyn ChunkServerClient>,
    pool: Arc<Semaphore>,
    max_retries: u32,
    task_timeout: Duration,
}

impl ReplicationManager {
    pub fn new(
        client: Arc<dyn ChunkServerClient>,
        max_retries: u32,
        max_concurrent: usize,
        task_timeout: Duration,
    ) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            unresolved: Arc::new(DashMap::new()),
            client,
            pool: Arc::new(Semaphore::new(max_concurrent)),
            max_retries,
            task_timeout,
        }
    }

    /// One reconciliation pass over the whole chunk table. Copies and
    /// trims issued by this pass are awaited before returning, bounded
    /// by the pool and per-command timeouts.
    pub async fn reconcile(
        &self,
        namespace: &Arc<NamespaceStore>,
        ring: &RwLock<HashRing>,
        monitor: &Arc<HeartbeatMonitor>,
    ) -> ReconcileReport {
        // Membership changes mid-cycle are picked up next cycle
        let ring = ring.read().unwrap().clone();
        let mut report = ReconcileReport::default();
        let mut repair_handles = Vec::new();
        let mut trim_handles = Vec::new();

        for chunk in namespace.chunks_snapshot() {
            report.chunks_checked += 1;

            let live = chunk.live_replicas(|n| monitor.is_alive(n));

            if live.len() < chunk.target_replicas {
                if live.is_empty() {
                    tracing::error!(chunk = %chunk.id, "all replicas lost");
                    report.lost.push(chunk.id.clone());
                    continue;
                }
                if self.unresolved.contains_key(&chunk.id) {
                    continue;
                }
                match self.start_repair(namespace, &ring, monitor, &chunk, &live) {
                    Some(handle) => {
                        report.repairs_started += 1;
                        repair_handles.push(handle);
                    }
                    None => {
                        if self.unresolved.contains_key(&chunk.id) {
                            report.unresolved.push(chunk.id.clone());
                        }
                    }
                }
            } else {
                // Healthy again: clear any stale bookkeeping
                if self.unresolved.remove(&chunk.id).is_some() {
                    tracing::info!(chunk = %chunk.id, "degraded chunk recovered");
                }
                if let Some(mut task) = self.tasks.get_mut(&chunk.id) {
                    if task.status == TaskStatus::InFlight {
                        task.status = TaskStatus::Superseded;
                    }
                }

                if live.len() > chunk.target_replicas {
                    trim_handles.extend(self.start_trim(namespace, &ring, monitor, &chunk, &live));
                }
            }
        }

        for handle in repair_handles {
            if let Ok(completed) = handle.await {
                if completed {
                    report.repairs_completed += 1;
                }
            }
        }
        for handle in trim_handles {
            if let Ok(trimmed) = handle.await {
                if trimmed {
                    report.trims_completed += 1;
                }
            }
        }

        // Everything parked as of this cycle, including repairs that
        // burned their last retry just now
        for entry in self.unresolved.iter() {
            if !report.unresolved.contains(entry.key()) {
                report.unresolved.push(entry.key().clone());
            }
        }

        report
    }

    /// Always-on reconciliation loop, spawned by the master server.
    /// A small startup jitter keeps the cycle from aligning with the
    /// heartbeat sweep.
    pub async fn run(
        self: Arc<Self>,
        namespace: Arc<NamespaceStore>,
        ring: Arc<RwLock<HashRing>>,
        monitor: Arc<HeartbeatMonitor>,
        interval: Duration,
    ) {
        let jitter = rand::thread_rng().gen_range(0..=interval.as_millis() as u64 / 10);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let report = self.reconcile(&namespace, &ring, &monitor).await;
            if report.repairs_started > 0
                || report.trims_completed > 0
                || !report.unresolved.is_empty()
                || !report.lost.is_empty()
            {
                tracing::info!(
                    checked = report.chunks_checked,
                    repaired = report.repairs_completed,
                    trimmed = report.trims_completed,
                    unresolved = report.unresolved.len(),
                    lost = report.lost.len(),
                    "reconciliation cycle"
                );
            }
        }
    }

    /// Issue one copy toward the chunk's target. Returns `None` when no
    /// destination candidate exists or the chunk just got parked.
    fn start_repair(
        &self,
        namespace: &Arc<NamespaceStore>,
        ring: &HashRing,
        monitor: &Arc<HeartbeatMonitor>,
        chunk: &ChunkMeta,
        live: &[String],
    ) -> Option<tokio::task::JoinHandle<bool>> {
        if let Some(task) = self.tasks.get(&chunk.id) {
            if task.status == TaskStatus::InFlight {
                // A deficit seen while a task is in flight must not
                // spawn a duplicate
                return None;
            }
        }

        let attempts = self
            .tasks
            .get(&chunk.id)
            .map(|t| t.attempts)
            .unwrap_or(0);

        // Destinations: ring candidates that are alive and not already
        // holding the chunk. Suspect nodes are skipped; they may be on
        // their way out.
        let candidates = ring.locate_where(&chunk.id, ring.len(), |n| {
            monitor.is_alive(n) && !chunk.replicas.contains(n)
        });

        if candidates.is_empty() {
            tracing::warn!(chunk = %chunk.id, "no repair destination available");
            return None;
        }

        if attempts >= self.max_retries {
            tracing::error!(
                chunk = %chunk.id,
                attempts,
                "repair retries exhausted; parking chunk as unresolved"
            );
            self.tasks.remove(&chunk.id);
            self.unresolved.insert(chunk.id.clone(), attempts);
            return None;
        }

        let dest = candidates[attempts as usize % candidates.len()].clone();

        // Source: the live holder the ring prefers most
        let source = ring
            .preference_order(&chunk.id)
            .into_iter()
            .find(|n| live.contains(n))
            .unwrap_or_else(|| live[0].clone());

        let task = ReplicationTask {
            chunk_id: chunk.id.clone(),
            source: source.clone(),
            dest: dest.clone(),
            issued_at_ms: crate::common::timestamp_now_millis(),
            attempts,
            status: TaskStatus::InFlight,
        };
        self.tasks.insert(chunk.id.clone(), task);

        tracing::info!(
            chunk = %chunk.id,
            source = %source,
            dest = %dest,
            attempt = attempts + 1,
            "replication task issued"
        );

        let client = self.client.clone();
        let pool = self.pool.clone();
        let tasks = self.tasks.clone();
        let unresolved = self.unresolved.clone();
        let namespace = namespace.clone();
        let monitor = monitor.clone();
        let timeout = self.task_timeout;
        let max_retries = self.max_retries;
        let chunk_id = chunk.id.clone();
        let command = ReplicateCommand {
            chunk_id: chunk.id.clone(),
            version: chunk.version,
            source_address: monitor.address_of(&source).unwrap_or_default(),
            expected_checksum: chunk.checksum.clone(),
        };

        Some(tokio::spawn(async move {
            let _permit = pool.acquire().await.expect("replication pool closed");

            let outcome = match monitor.address_of(&dest) {
                Some(address) => {
                    match tokio::time::timeout(timeout, client.replicate(&address, &command)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(format!(
                            "replicate {} to {}",
                            chunk_id, dest
                        ))),
                    }
                }
                None => Err(Error::NodeNotRegistered(dest.clone())),
            };

            let superseded = tasks
                .get(&chunk_id)
                .map(|t| t.status == TaskStatus::Superseded)
                .unwrap_or(true);

            match outcome {
                Ok(()) if superseded => {
                    // Copy landed after the deficit resolved elsewhere;
                    // leave the metadata alone and let the next cycle
                    // trim any surplus
                    tasks.remove(&chunk_id);
                    false
                }
                Ok(()) => {
                    if let Err(e) = namespace.add_replica(&chunk_id, &dest) {
                        tracing::warn!(chunk = %chunk_id, error = %e, "replica commit failed");
                    } else {
                        tracing::info!(chunk = %chunk_id, dest = %dest, "replication completed");
                    }
                    tasks.remove(&chunk_id);
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        chunk = %chunk_id,
                        dest = %dest,
                        error = %e,
                        "replication task failed"
                    );
                    let attempts = attempts + 1;
                    if attempts >= max_retries {
                        tracing::error!(
                            chunk = %chunk_id,
                            attempts,
                            "repair retries exhausted; parking chunk as unresolved"
                        );
                        tasks.remove(&chunk_id);
                        unresolved.insert(chunk_id.clone(), attempts);
                    } else if let Some(mut task) = tasks.get_mut(&chunk_id) {
                        task.status = TaskStatus::Failed;
                        task.attempts = attempts;
                    }
                    false
                }
            }
        }))
    }

    /// Delete the surplus replicas the ring prefers least
    fn start_trim(
        &self,
        namespace: &Arc<NamespaceStore>,
        ring: &HashRing,
        monitor: &Arc<HeartbeatMonitor>,
        chunk: &ChunkMeta,
        live: &[String],
    ) -> Vec<tokio::task::JoinHandle<bool>> {
        let preference = ring.preference_order(&chunk.id);
        let rank = |node: &String| {
            preference
                .iter()
                .position(|p| p == node)
                .unwrap_or(usize::MAX)
        };

        let mut ordered: Vec<String> = live.to_vec();
        ordered.sort_by_key(rank);

        let mut handles = Vec::new();
        for node in ordered.into_iter().skip(chunk.target_replicas) {
            tracing::info!(chunk = %chunk.id, node = %node, "trimming excess replica");

            let client = self.client.clone();
            let pool = self.pool.clone();
            let namespace = namespace.clone();
            let monitor = monitor.clone();
            let timeout = self.task_timeout;
            let chunk_id = chunk.id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = pool.acquire().await.expect("replication pool closed");

                let Some(address) = monitor.address_of(&node) else {
                    return false;
                };

                match tokio::time::timeout(timeout, client.delete_chunk(&address, &chunk_id)).await
                {
                    Ok(Ok(())) => {
                        let _ = namespace.remove_replica(&chunk_id, &node);
                        true
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(chunk = %chunk_id, node = %node, error = %e, "trim failed");
                        false
                    }
                    Err(_) => {
                        tracing::warn!(chunk = %chunk_id, node = %node, "trim timed out");
                        false
                    }
                }
            }));
        }

        handles
    }

    /// Mark an in-flight task superseded (GC collected the chunk, or a
    /// newer decision made the copy irrelevant). The copy completes or
    /// fails harmlessly without touching metadata.
    pub fn supersede(&self, chunk_id: &str) {
        if let Some(mut task) = self.tasks.get_mut(chunk_id) {
            task.status = TaskStatus::Superseded;
        }
    }

    /// Re-arm parked chunks, e.g. after fresh capacity registered
    pub fn reset_unresolved(&self) {
        if !self.unresolved.is_empty() {
            tracing::info!(
                parked = self.unresolved.len(),
                "re-arming unresolved chunks after membership change"
            );
            self.unresolved.clear();
            self.tasks.clear();
        }
    }

    /// Degraded view for the admin status endpoint
    pub fn degraded_chunks(
        &self,
        namespace: &NamespaceStore,
        monitor: &HeartbeatMonitor,
    ) -> Vec<DegradedChunk> {
        let mut degraded = Vec::new();

        for chunk in namespace.chunks_snapshot() {
            let live = chunk.live_replicas(|n| monitor.is_alive(n));
            if live.is_empty() && !chunk.replicas.is_empty() {
                degraded.push(DegradedChunk {
                    chunk_id: chunk.id.clone(),
                    live_replicas: 0,
                    target_replicas: chunk.target_replicas,
                    reason: "all replicas lost".to_string(),
                });
            } else if self.unresolved.contains_key(&chunk.id) {
                degraded.push(DegradedChunk {
                    chunk_id: chunk.id.clone(),
                    live_replicas: live.len(),
                    target_replicas: chunk.target_replicas,
                    reason: "under-replicated, unresolved".to_string(),
                });
            }
        }

        degraded
    }

    pub fn tasks_snapshot(&self) -> Vec<ReplicationTask> {
        self.tasks.iter().map(|t| t.clone()).collect()
    }
}
