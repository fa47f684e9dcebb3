//! Namespace store: file -> chunk-list and chunk -> replica-set metadata
//!
//! Single source of truth for what exists and where it should live.
//! Entities live in arenas keyed by stable identifiers (path, chunk id,
//! node id); there are no cross-entity pointers, only id lookups.
//!
//! Every mutation appends to the operation log before the in-memory
//! commit. Per-chunk mutations are serialized by the chunk arena's
//! entry-level exclusive access (single-writer-per-chunk); operations on
//! different chunks proceed concurrently and there is no global
//! namespace lock.

use crate::common::{timestamp_now_millis, Error, LogSyncPolicy, Result};
use crate::master::heartbeat::{ChunkReport, NodeCommand};
use crate::master::oplog::{LogOp, OpLog};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// File metadata: ordered chunk list plus tombstone state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub chunks: Vec<String>,
    pub created_at_ms: u64,
    pub deleted: bool,
    pub deleted_at_ms: Option<u64>,
}

impl FileEntry {
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Chunk metadata record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub id: String,
    /// Monotonically increasing; bumped on each new lease grant
    pub version: u64,
    pub target_replicas: usize,
    /// Node ids currently holding a replica (ordered for determinism)
    pub replicas: BTreeSet<String>,
    /// Primary holder while a lease is active
    pub primary: Option<String>,
    pub lease_expires_at_ms: Option<u64>,
    /// Content checksum recorded at the last committed write
    pub checksum: Option<String>,
    /// Set by the GC sweep when the chunk becomes unreachable
    #[serde(skip)]
    pub orphaned_since_ms: Option<u64>,
}

/// Fresh chunk identifier
pub fn new_chunk_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ChunkMeta {
    pub fn lease_active(&self, now_ms: u64) -> bool {
        matches!(self.lease_expires_at_ms, Some(expiry) if expiry > now_ms)
    }

    /// Primary holder, only while the lease is unexpired
    pub fn primary_if_leased(&self, now_ms: u64) -> Option<&str> {
        if self.lease_active(now_ms) {
            self.primary.as_deref()
        } else {
            None
        }
    }

    /// Replicas currently on nodes passing the liveness predicate
    pub fn live_replicas<F>(&self, is_live: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        self.replicas
            .iter()
            .filter(|n| is_live(n))
            .cloned()
            .collect()
    }
}

/// Outcome of reconciling one node's reported chunk inventory
#[derive(Debug, Default)]
pub struct InventoryOutcome {
    /// Replicas re-adopted from a rejoined node
    pub adopted: Vec<String>,
    /// Replicas the node silently lost
    pub lost: Vec<String>,
    /// Deletion commands piggybacked on the heartbeat response
    pub commands: Vec<NodeCommand>,
}

pub struct NamespaceStore {
    files: DashMap<String, FileEntry>,
    chunks: DashMap<String, ChunkMeta>,
    /// `None` after a failed replay: the master serves reads only
    log: Mutex<Option<OpLog>>,
    read_only: AtomicBool,
    target_replicas: usize,
}

impl NamespaceStore {
    /// Open the store, replaying the operation log at `path`.
    ///
    /// A corrupted or truncated log leaves the store populated with the
    /// valid prefix but read-only; every mutator then fails with
    /// [`Error::ReadOnly`] until the log is manually reconciled.
    pub fn open(
        path: impl AsRef<Path>,
        sync_policy: LogSyncPolicy,
        target_replicas: usize,
    ) -> Result<Self> {
        let store = Self {
            files: DashMap::new(),
            chunks: DashMap::new(),
            log: Mutex::new(None),
            read_only: AtomicBool::new(false),
            target_replicas,
        };

        let replayed = OpLog::replay(&path, |entry| {
            store.apply(&entry.op);
            Ok(())
        });

        match replayed {
            Ok(next) => {
                let log = OpLog::open(&path, sync_policy)?;
                debug_assert_eq!(log.next_sequence(), next);
                *store.log.lock().unwrap() = Some(log);
            }
            Err(Error::LogCorrupted(reason)) => {
                tracing::error!(
                    reason = %reason,
                    "operation log corrupted; master starts read-only"
                );
                store.read_only.store(true, Ordering::SeqCst);
            }
            Err(e) => return Err(e),
        }

        Ok(store)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn target_replicas(&self) -> usize {
        self.target_replicas
    }

    fn append_log(&self, op: &LogOp) -> Result<u64> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let mut guard = self.log.lock().unwrap();
        match guard.as_mut() {
            Some(log) => log.append(op),
            None => Err(Error::ReadOnly),
        }
    }

    // === File operations ===

    pub fn create_file(&self, path: &str) -> Result<()> {
        crate::common::validate_path(path)?;
        let now = timestamp_now_millis();

        let entry = self.files.entry(path.to_string());
        match &entry {
            Entry::Occupied(existing) if existing.get().is_live() => {
                return Err(Error::FileExists(path.to_string()));
            }
            _ => {}
        }

        self.append_log(&LogOp::CreateFile {
            path: path.to_string(),
            at_ms: now,
        })?;

        // Re-creating a tombstoned path starts a fresh entry; the old
        // chunks become unreachable and are swept by GC
        entry.insert(FileEntry {
            path: path.to_string(),
            chunks: Vec::new(),
            created_at_ms: now,
            deleted: false,
            deleted_at_ms: None,
        });

        tracing::info!(path, "file created");
        Ok(())
    }

    /// Allocate a new chunk at the end of `path` with the given initial
    /// replica placement. The caller generates the chunk id first (see
    /// [`new_chunk_id`]) so placement can be derived from it on the
    /// hash ring before the record exists.
    pub fn append_chunk(
        &self,
        path: &str,
        chunk_id: String,
        replicas: Vec<String>,
    ) -> Result<ChunkMeta> {
        let now = timestamp_now_millis();

        let mut file = match self.files.get_mut(path) {
            Some(f) if f.is_live() => f,
            _ => return Err(Error::FileNotFound(path.to_string())),
        };

        self.append_log(&LogOp::AppendChunk {
            path: path.to_string(),
            chunk_id: chunk_id.clone(),
            target_replicas: self.target_replicas,
            replicas: replicas.clone(),
            at_ms: now,
        })?;

        let meta = ChunkMeta {
            id: chunk_id.clone(),
            version: 1,
            target_replicas: self.target_replicas,
            replicas: replicas.into_iter().collect(),
            primary: None,
            lease_expires_at_ms: None,
            checksum: None,
            orphaned_since_ms: None,
        };
        self.chunks.insert(chunk_id.clone(), meta.clone());
        file.chunks.push(chunk_id.clone());

        tracing::info!(path, chunk = %chunk_id, replicas = meta.replicas.len(), "chunk appended");
        Ok(meta)
    }

    /// Tombstone a file; its chunks become eligible for lazy collection
    /// once no live file references them.
    pub fn delete_file(&self, path: &str) -> Result<()> {
        let now = timestamp_now_millis();

        let mut file = match self.files.get_mut(path) {
            Some(f) if f.is_live() => f,
            _ => return Err(Error::FileNotFound(path.to_string())),
        };

        self.append_log(&LogOp::DeleteFile {
            path: path.to_string(),
            at_ms: now,
        })?;

        file.deleted = true;
        file.deleted_at_ms = Some(now);

        tracing::info!(path, "file tombstoned");
        Ok(())
    }

    /// Ordered chunk list for a live file
    pub fn lookup(&self, path: &str) -> Result<Vec<ChunkMeta>> {
        let file = match self.files.get(path) {
            Some(f) if f.is_live() => f,
            _ => return Err(Error::FileNotFound(path.to_string())),
        };

        Ok(file
            .chunks
            .iter()
            .filter_map(|id| self.chunks.get(id).map(|c| c.clone()))
            .collect())
    }

    pub fn get_file(&self, path: &str) -> Option<FileEntry> {
        self.files.get(path).map(|f| f.clone())
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<ChunkMeta> {
        self.chunks.get(chunk_id).map(|c| c.clone())
    }

    // === Chunk replica operations ===

    pub fn set_replicas(&self, chunk_id: &str, replicas: BTreeSet<String>) -> Result<()> {
        let mut chunk = self
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| Error::ChunkNotFound(chunk_id.to_string()))?;

        self.append_log(&LogOp::SetReplicas {
            chunk_id: chunk_id.to_string(),
            replicas: replicas.iter().cloned().collect(),
        })?;

        chunk.replicas = replicas;
        Ok(())
    }

    /// Add one replica holder; returns false if it was already present
    pub fn add_replica(&self, chunk_id: &str, node_id: &str) -> Result<bool> {
        let mut chunk = self
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| Error::ChunkNotFound(chunk_id.to_string()))?;

        if chunk.replicas.contains(node_id) {
            return Ok(false);
        }

        let mut next = chunk.replicas.clone();
        next.insert(node_id.to_string());
        self.append_log(&LogOp::SetReplicas {
            chunk_id: chunk_id.to_string(),
            replicas: next.iter().cloned().collect(),
        })?;

        chunk.replicas = next;
        Ok(true)
    }

    /// Drop one replica holder; returns false if it was not present
    pub fn remove_replica(&self, chunk_id: &str, node_id: &str) -> Result<bool> {
        let mut chunk = self
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| Error::ChunkNotFound(chunk_id.to_string()))?;

        if !chunk.replicas.contains(node_id) {
            return Ok(false);
        }

        let mut next = chunk.replicas.clone();
        next.remove(node_id);
        self.append_log(&LogOp::SetReplicas {
            chunk_id: chunk_id.to_string(),
            replicas: next.iter().cloned().collect(),
        })?;

        chunk.replicas = next;
        Ok(true)
    }

    /// Record a granted lease: version bump plus primary and expiry.
    /// Called by the lease manager under its own grant discipline.
    pub fn apply_lease(
        &self,
        chunk_id: &str,
        holder: &str,
        version: u64,
        expires_at_ms: u64,
    ) -> Result<()> {
        let mut chunk = self
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| Error::ChunkNotFound(chunk_id.to_string()))?;

        self.append_log(&LogOp::GrantLease {
            chunk_id: chunk_id.to_string(),
            holder: holder.to_string(),
            version,
            expires_at_ms,
        })?;

        chunk.version = chunk.version.max(version);
        chunk.primary = Some(holder.to_string());
        chunk.lease_expires_at_ms = Some(expires_at_ms);
        Ok(())
    }

    /// Record the checksum of a committed write. The caller has already
    /// verified the writer holds the chunk's lease.
    pub fn commit_write(&self, chunk_id: &str, checksum: &str) -> Result<()> {
        let mut chunk = self
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| Error::ChunkNotFound(chunk_id.to_string()))?;

        self.append_log(&LogOp::CommitWrite {
            chunk_id: chunk_id.to_string(),
            checksum: checksum.to_string(),
        })?;

        chunk.checksum = Some(checksum.to_string());
        Ok(())
    }

    // === Inventory reconciliation ===

    /// Reconcile one node's reported chunk inventory against the
    /// namespace. Three cases matter:
    ///
    /// - a chunk recorded as held by the node but missing from the
    ///   report is a silent loss: the replica is dropped and repair
    ///   follows through the usual under-replication path;
    /// - a reported replica with a stale version or a mismatched
    ///   checksum is scheduled for deletion on the node;
    /// - a reported replica the namespace does not associate with the
    ///   node (rejoin after death) is re-adopted when current.
    ///
    /// Unknown chunk ids are orphans from the node's past life and are
    /// deleted.
    pub fn reconcile_inventory(
        &self,
        node_id: &str,
        inventory: &[ChunkReport],
        _now_ms: u64,
    ) -> InventoryOutcome {
        let mut outcome = InventoryOutcome::default();
        let reported: std::collections::HashMap<&str, &ChunkReport> =
            inventory.iter().map(|r| (r.chunk_id.as_str(), r)).collect();

        // Silent losses: recorded holder, absent from the report
        let held: Vec<String> = self
            .chunks
            .iter()
            .filter(|c| c.replicas.contains(node_id))
            .map(|c| c.id.clone())
            .collect();

        for chunk_id in held {
            if !reported.contains_key(chunk_id.as_str()) {
                tracing::warn!(node = node_id, chunk = %chunk_id, "silent replica loss");
                if self.remove_replica(&chunk_id, node_id).unwrap_or(false) {
                    outcome.lost.push(chunk_id);
                }
            }
        }

        for report in inventory {
            let Some(chunk) = self.get_chunk(&report.chunk_id) else {
                outcome
                    .commands
                    .push(NodeCommand::delete(&report.chunk_id, "unknown chunk"));
                continue;
            };

            if report.version < chunk.version {
                tracing::warn!(
                    node = node_id,
                    chunk = %report.chunk_id,
                    reported = report.version,
                    current = chunk.version,
                    "stale replica version"
                );
                let _ = self.remove_replica(&report.chunk_id, node_id);
                outcome
                    .commands
                    .push(NodeCommand::delete(&report.chunk_id, "stale version"));
                continue;
            }

            if let (Some(expected), Some(actual)) = (&chunk.checksum, &report.checksum) {
                if expected != actual {
                    tracing::warn!(
                        node = node_id,
                        chunk = %report.chunk_id,
                        "replica checksum mismatch"
                    );
                    let _ = self.remove_replica(&report.chunk_id, node_id);
                    outcome
                        .commands
                        .push(NodeCommand::delete(&report.chunk_id, "checksum mismatch"));
                    continue;
                }
            }

            if !chunk.replicas.contains(node_id) {
                // Rejoined node still holds a current copy; re-adopt it.
                // Over-replication, if any, is trimmed by reconciliation.
                if self.add_replica(&report.chunk_id, node_id).unwrap_or(false) {
                    outcome.adopted.push(report.chunk_id.clone());
                }
            }
        }

        outcome
    }

    // === Garbage collection ===

    /// Stamp chunks unreachable from any live file as orphaned, and
    /// clear the stamp on chunks that became reachable again.
    pub fn mark_orphans(&self, now_ms: u64) {
        let mut reachable: BTreeSet<String> = BTreeSet::new();
        for file in self.files.iter().filter(|f| f.is_live()) {
            reachable.extend(file.chunks.iter().cloned());
        }

        for mut chunk in self.chunks.iter_mut() {
            if reachable.contains(&chunk.id) {
                chunk.orphaned_since_ms = None;
            } else if chunk.orphaned_since_ms.is_none() {
                chunk.orphaned_since_ms = Some(now_ms);
            }
        }
    }

    /// Remove orphans older than the grace period, returning their final
    /// metadata so delete commands can be issued to the holders. The
    /// grace period tolerates in-flight reads against freshly deleted
    /// files.
    pub fn collect_orphans(&self, now_ms: u64, grace_ms: u64) -> Vec<ChunkMeta> {
        let overdue: Vec<String> = self
            .chunks
            .iter()
            .filter(|c| {
                matches!(c.orphaned_since_ms, Some(since) if now_ms.saturating_sub(since) >= grace_ms)
            })
            .map(|c| c.id.clone())
            .collect();

        let mut collected = Vec::new();
        for chunk_id in overdue {
            if self
                .append_log(&LogOp::RemoveChunk {
                    chunk_id: chunk_id.clone(),
                })
                .is_err()
            {
                break;
            }
            if let Some((_, meta)) = self.chunks.remove(&chunk_id) {
                tracing::info!(chunk = %chunk_id, "orphaned chunk collected");
                collected.push(meta);
            }
        }
        collected
    }

    /// Drop tombstoned file entries once all their chunks are collected
    pub fn purge_tombstones(&self) -> Vec<String> {
        let purgeable: Vec<String> = self
            .files
            .iter()
            .filter(|f| f.deleted && f.chunks.iter().all(|id| !self.chunks.contains_key(id)))
            .map(|f| f.path.clone())
            .collect();

        let mut purged = Vec::new();
        for path in purgeable {
            if self
                .append_log(&LogOp::RemoveFile { path: path.clone() })
                .is_err()
            {
                break;
            }
            self.files.remove(&path);
            purged.push(path);
        }
        purged
    }

    // === Snapshots & counters ===

    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.id.clone()).collect()
    }

    pub fn chunks_snapshot(&self) -> Vec<ChunkMeta> {
        self.chunks.iter().map(|c| c.clone()).collect()
    }

    pub fn files_snapshot(&self) -> Vec<FileEntry> {
        self.files.iter().map(|f| f.clone()).collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_live()).count()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    // === Replay ===

    /// Apply one logged operation unconditionally (replay path)
    fn apply(&self, op: &LogOp) {
        match op {
            LogOp::CreateFile { path, at_ms } => {
                self.files.insert(
                    path.clone(),
                    FileEntry {
                        path: path.clone(),
                        chunks: Vec::new(),
                        created_at_ms: *at_ms,
                        deleted: false,
                        deleted_at_ms: None,
                    },
                );
            }
            LogOp::AppendChunk {
                path,
                chunk_id,
                target_replicas,
                replicas,
                ..
            } => {
                self.chunks.insert(
                    chunk_id.clone(),
                    ChunkMeta {
                        id: chunk_id.clone(),
                        version: 1,
                        target_replicas: *target_replicas,
                        replicas: replicas.iter().cloned().collect(),
                        primary: None,
                        lease_expires_at_ms: None,
                        checksum: None,
                        orphaned_since_ms: None,
                    },
                );
                if let Some(mut file) = self.files.get_mut(path) {
                    file.chunks.push(chunk_id.clone());
                }
            }
            LogOp::DeleteFile { path, at_ms } => {
                if let Some(mut file) = self.files.get_mut(path) {
                    file.deleted = true;
                    file.deleted_at_ms = Some(*at_ms);
                }
            }
            LogOp::SetReplicas { chunk_id, replicas } => {
                if let Some(mut chunk) = self.chunks.get_mut(chunk_id) {
                    chunk.replicas = replicas.iter().cloned().collect();
                }
            }
            LogOp::GrantLease {
                chunk_id,
                holder,
                version,
                expires_at_ms,
            } => {
                if let Some(mut chunk) = self.chunks.get_mut(chunk_id) {
                    chunk.version = chunk.version.max(*version);
                    chunk.primary = Some(holder.clone());
                    chunk.lease_expires_at_ms = Some(*expires_at_ms);
                }
            }
            LogOp::CommitWrite { chunk_id, checksum } => {
                if let Some(mut chunk) = self.chunks.get_mut(chunk_id) {
                    chunk.checksum = Some(checksum.clone());
                }
            }
            LogOp::RemoveChunk { chunk_id } => {
                self.chunks.remove(chunk_id);
            }
            LogOp::RemoveFile { path } => {
                self.files.remove(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> NamespaceStore {
        NamespaceStore::open(dir.path().join("oplog"), LogSyncPolicy::Always, 2).unwrap()
    }

    #[test]
    fn test_create_append_lookup() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.create_file("data/a.log").unwrap();
        let chunk = store
            .append_chunk("data/a.log", new_chunk_id(), vec!["node-1".into(), "node-2".into()])
            .unwrap();

        assert_eq!(chunk.version, 1);
        assert_eq!(chunk.replicas.len(), 2);

        let chunks = store.lookup("data/a.log").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, chunk.id);
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.create_file("a").unwrap();
        assert!(matches!(
            store.create_file("a"),
            Err(Error::FileExists(_))
        ));
    }

    #[test]
    fn test_delete_is_tombstone() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.create_file("a").unwrap();
        let chunk = store.append_chunk("a", new_chunk_id(), vec!["node-1".into()]).unwrap();
        store.delete_file("a").unwrap();

        // Lookup refuses tombstoned files but the chunk record survives
        assert!(store.lookup("a").is_err());
        assert!(store.get_chunk(&chunk.id).is_some());
        assert!(store.get_file("a").unwrap().deleted);

        // Re-creating the path starts fresh
        store.create_file("a").unwrap();
        assert!(store.lookup("a").unwrap().is_empty());
    }

    #[test]
    fn test_replica_updates() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.create_file("a").unwrap();
        let chunk = store.append_chunk("a", new_chunk_id(), vec!["node-1".into()]).unwrap();

        assert!(store.add_replica(&chunk.id, "node-2").unwrap());
        assert!(!store.add_replica(&chunk.id, "node-2").unwrap());
        assert!(store.remove_replica(&chunk.id, "node-1").unwrap());
        assert!(!store.remove_replica(&chunk.id, "node-1").unwrap());

        let meta = store.get_chunk(&chunk.id).unwrap();
        assert_eq!(meta.replicas.len(), 1);
        assert!(meta.replicas.contains("node-2"));
    }

    #[test]
    fn test_replay_reproduces_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("oplog");

        let chunk_id;
        {
            let store =
                NamespaceStore::open(&path, LogSyncPolicy::Always, 2).unwrap();
            store.create_file("a").unwrap();
            let chunk = store
                .append_chunk("a", new_chunk_id(), vec!["node-1".into(), "node-2".into()])
                .unwrap();
            chunk_id = chunk.id.clone();
            store.apply_lease(&chunk_id, "node-1", 2, 99_999).unwrap();
            store.commit_write(&chunk_id, "abc123").unwrap();
            store.create_file("b").unwrap();
            store.delete_file("b").unwrap();
        }

        let replayed = NamespaceStore::open(&path, LogSyncPolicy::Always, 2).unwrap();
        assert!(!replayed.is_read_only());

        let chunk = replayed.get_chunk(&chunk_id).unwrap();
        assert_eq!(chunk.version, 2);
        assert_eq!(chunk.primary.as_deref(), Some("node-1"));
        assert_eq!(chunk.checksum.as_deref(), Some("abc123"));
        assert_eq!(chunk.replicas.len(), 2);

        assert!(replayed.get_file("b").unwrap().deleted);
        assert_eq!(replayed.lookup("a").unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_log_forces_read_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("oplog");

        {
            let store =
                NamespaceStore::open(&path, LogSyncPolicy::Always, 2).unwrap();
            store.create_file("a").unwrap();
            store.create_file("b").unwrap();
        }

        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let store = NamespaceStore::open(&path, LogSyncPolicy::Always, 2).unwrap();
        assert!(store.is_read_only());

        // Valid prefix still readable
        assert!(store.get_file("a").is_some());
        // Writes refused
        assert!(matches!(store.create_file("c"), Err(Error::ReadOnly)));
    }

    #[test]
    fn test_orphan_sweep() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.create_file("a").unwrap();
        let chunk = store.append_chunk("a", new_chunk_id(), vec!["node-1".into()]).unwrap();
        store.delete_file("a").unwrap();

        // First sweep stamps, grace not yet elapsed
        store.mark_orphans(1_000);
        assert!(store.collect_orphans(1_500, 1_000).is_empty());

        // After the grace period the chunk is collected
        let collected = store.collect_orphans(2_500, 1_000);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].id, chunk.id);
        assert!(store.get_chunk(&chunk.id).is_none());

        // And the tombstone can now be purged
        let purged = store.purge_tombstones();
        assert_eq!(purged, vec!["a".to_string()]);
        assert!(store.get_file("a").is_none());
    }

    #[test]
    fn test_orphan_stamp_cleared_when_reachable_again() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.create_file("a").unwrap();
        store.append_chunk("a", new_chunk_id(), vec!["node-1".into()]).unwrap();

        store.mark_orphans(1_000);
        let chunk = store.chunks_snapshot().pop().unwrap();
        assert!(chunk.orphaned_since_ms.is_none());
    }
}
