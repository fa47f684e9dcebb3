//! HTTP API for the master
//!
//! This module provides the public surface of the coordination engine:
//! the registration handshake and heartbeat ingestion for storage
//! nodes, namespace operations and chunk lookups for clients, lease
//! requests for writers, and health/status probes.
//!
//! File paths travel percent-encoded as a single URL path segment.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::common::{decode_path, timestamp_now_millis, Error, MasterConfig, NodeState};
use crate::master::heartbeat::{HeartbeatMonitor, HeartbeatRequest};
use crate::master::lease::LeaseManager;
use crate::master::namespace::{new_chunk_id, NamespaceStore};
use crate::master::replication::ReplicationManager;
use crate::master::ring::HashRing;

/// Shared master state for HTTP handlers.
#[derive(Clone)]
pub struct MasterState {
    pub namespace: Arc<NamespaceStore>,
    pub ring: Arc<RwLock<HashRing>>,
    pub monitor: Arc<HeartbeatMonitor>,
    pub leases: Arc<LeaseManager>,
    pub replication: Arc<ReplicationManager>,
    pub config: Arc<MasterConfig>,
}

fn error_response(err: &Error) -> Response {
    let body = match err {
        Error::LeaseConflict {
            holder,
            expires_at_ms,
            ..
        } => json!({
            "error": err.to_string(),
            "holder": holder,
            "expires_at_ms": expires_at_ms,
        }),
        _ => json!({ "error": err.to_string() }),
    };
    (err.to_http_status(), Json(body)).into_response()
}

// === Storage node endpoints ===

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    node_id: String,
    address: String,
    #[serde(default)]
    capacity_bytes: u64,
}

/// Registration handshake. The only path that revives a dead node.
async fn register_node(
    State(state): State<MasterState>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let info = state
        .monitor
        .register(&req.node_id, &req.address, req.capacity_bytes);

    state.ring.write().unwrap().join(&req.node_id);
    // Fresh capacity may unblock chunks parked as unresolved
    state.replication.reset_unresolved();

    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "node_id": info.node_id,
            "state": info.state,
            "heartbeat_interval_secs": state.config.heartbeat_interval_secs,
        })),
    )
        .into_response()
}

/// Heartbeat ingestion. The response piggybacks deletion commands for
/// stale, corrupt or unknown replicas found in the reported inventory.
async fn heartbeat(State(state): State<MasterState>, Json(req): Json<HeartbeatRequest>) -> Response {
    let node_state = match state
        .monitor
        .heartbeat(&req.node_id, req.capacity_bytes, req.used_bytes)
    {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    let outcome =
        state
            .namespace
            .reconcile_inventory(&req.node_id, &req.chunks, timestamp_now_millis());

    if !outcome.lost.is_empty() || !outcome.adopted.is_empty() {
        tracing::info!(
            node = %req.node_id,
            lost = outcome.lost.len(),
            adopted = outcome.adopted.len(),
            "inventory reconciled"
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "state": node_state,
            "commands": outcome.commands,
        })),
    )
        .into_response()
}

// === File namespace endpoints ===

async fn create_file(State(state): State<MasterState>, Path(path): Path<String>) -> Response {
    let path = match decode_path(&path) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    match state.namespace.create_file(&path) {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "path": path }))).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Serialize)]
struct ReplicaRef {
    node_id: String,
    address: Option<String>,
    state: Option<NodeState>,
}

/// Append a chunk: allocate an id, place replicas via the ring over
/// live nodes, record the chunk. A placement short of the target is
/// accepted and repaired by reconciliation rather than refused.
async fn append_chunk(State(state): State<MasterState>, Path(path): Path<String>) -> Response {
    let path = match decode_path(&path) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    let chunk_id = new_chunk_id();
    let target = state.namespace.target_replicas();

    let replicas = {
        let ring = state.ring.read().unwrap();
        ring.locate_where(&chunk_id, target, |n| state.monitor.is_alive(n))
    };

    if replicas.is_empty() {
        return error_response(&Error::NoLiveNodes);
    }
    if replicas.len() < target {
        tracing::warn!(
            chunk = %chunk_id,
            placed = replicas.len(),
            target,
            "chunk created under-replicated"
        );
    }

    match state.namespace.append_chunk(&path, chunk_id, replicas) {
        Ok(meta) => {
            let replicas: Vec<ReplicaRef> = meta
                .replicas
                .iter()
                .map(|n| replica_ref(&state.monitor, n))
                .collect();
            (
                StatusCode::CREATED,
                Json(json!({
                    "chunk_id": meta.id,
                    "version": meta.version,
                    "target_replicas": meta.target_replicas,
                    "replicas": replicas,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

fn replica_ref(monitor: &HeartbeatMonitor, node_id: &str) -> ReplicaRef {
    let info = monitor.get(node_id);
    ReplicaRef {
        node_id: node_id.to_string(),
        address: info.as_ref().map(|i| i.address.clone()),
        state: info.map(|i| i.state),
    }
}

#[derive(Debug, Deserialize)]
struct LookupQuery {
    /// Optional chunk index within the file
    chunk: Option<usize>,
}

/// Lookup: ordered chunk list with versions, primary holder (while
/// leased) and replica locations.
async fn lookup(
    State(state): State<MasterState>,
    Path(path): Path<String>,
    Query(query): Query<LookupQuery>,
) -> Response {
    let path = match decode_path(&path) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    let chunks = match state.namespace.lookup(&path) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };

    let now = timestamp_now_millis();
    let selected: Vec<_> = match query.chunk {
        Some(index) => match chunks.get(index) {
            Some(c) => vec![c.clone()],
            None => {
                return error_response(&Error::ChunkNotFound(format!(
                    "{} chunk index {}",
                    path, index
                )))
            }
        },
        None => chunks,
    };

    let entries: Vec<serde_json::Value> = selected
        .iter()
        .map(|chunk| {
            let replicas: Vec<ReplicaRef> = chunk
                .replicas
                .iter()
                .map(|n| replica_ref(&state.monitor, n))
                .collect();
            let live = chunk.live_replicas(|n| state.monitor.is_alive(n));
            json!({
                "chunk_id": chunk.id,
                "version": chunk.version,
                "primary": chunk.primary_if_leased(now),
                "replicas": replicas,
                "degraded": live.is_empty(),
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({ "path": path, "chunks": entries })),
    )
        .into_response()
}

async fn delete_file(State(state): State<MasterState>, Path(path): Path<String>) -> Response {
    let path = match decode_path(&path) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    match state.namespace.delete_file(&path) {
        Ok(()) => (StatusCode::OK, Json(json!({ "deleted": path }))).into_response(),
        Err(e) => error_response(&e),
    }
}

// === Chunk endpoints ===

async fn get_chunk(State(state): State<MasterState>, Path(chunk_id): Path<String>) -> Response {
    match state.namespace.get_chunk(&chunk_id) {
        Some(meta) => (StatusCode::OK, Json(json!(meta))).into_response(),
        None => error_response(&Error::ChunkNotFound(chunk_id)),
    }
}

#[derive(Debug, Deserialize)]
struct CommitWriteRequest {
    node_id: String,
    checksum: String,
}

/// Record a committed write. Rejected synchronously unless the writer
/// holds the chunk's active lease.
async fn commit_write(
    State(state): State<MasterState>,
    Path(chunk_id): Path<String>,
    Json(req): Json<CommitWriteRequest>,
) -> Response {
    if let Err(e) = state.leases.check_write(&chunk_id, &req.node_id) {
        return error_response(&e);
    }

    match state.namespace.commit_write(&chunk_id, &req.checksum) {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(e) => error_response(&e),
    }
}

// === Lease endpoint ===

#[derive(Debug, Deserialize)]
struct LeaseRequest {
    chunk_id: String,
    node_id: String,
}

async fn request_lease(
    State(state): State<MasterState>,
    Json(req): Json<LeaseRequest>,
) -> Response {
    match state
        .leases
        .grant(&state.namespace, &state.monitor, &req.chunk_id, &req.node_id)
    {
        Ok(lease) => (StatusCode::OK, Json(json!(lease))).into_response(),
        Err(e) => error_response(&e),
    }
}

// === Health & status ===

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Liveness probe: if we can respond, we're alive
async fn health_live() -> impl IntoResponse {
    Json(json!({
        "alive": true,
        "timestamp": crate::common::timestamp_now(),
    }))
}

/// Readiness probe: writable log and at least one live storage node
async fn health_ready(State(state): State<MasterState>) -> Response {
    let alive = state.monitor.alive_nodes().len();
    let read_only = state.namespace.is_read_only();

    if alive > 0 && !read_only {
        (
            StatusCode::OK,
            Json(json!({ "ready": true, "alive_nodes": alive })),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ready": false,
                "alive_nodes": alive,
                "reason": if read_only { "operation log corrupted" } else { "no live storage nodes" },
            })),
        )
            .into_response()
    }
}

/// Minimal cluster status: node table, namespace counters, degraded
/// chunks and in-flight replication tasks.
async fn admin_status(State(state): State<MasterState>) -> impl IntoResponse {
    let nodes = state.monitor.nodes_snapshot();
    let degraded = state
        .replication
        .degraded_chunks(&state.namespace, &state.monitor);
    let tasks = state.replication.tasks_snapshot();

    Json(json!({
        "read_only": state.namespace.is_read_only(),
        "nodes": nodes,
        "files": state.namespace.file_count(),
        "chunks": state.namespace.chunk_count(),
        "ring_members": state.ring.read().unwrap().len(),
        "degraded_chunks": degraded,
        "replication_tasks": tasks,
    }))
}

/// Creates the HTTP router with all public endpoints.
pub fn create_router(state: MasterState) -> Router {
    Router::new()
        // Storage node surface
        .route("/register", axum::routing::post(register_node))
        .route("/heartbeat", axum::routing::post(heartbeat))
        // File namespace
        .route("/files/:path", axum::routing::post(create_file))
        .route("/files/:path", axum::routing::get(lookup))
        .route("/files/:path", axum::routing::delete(delete_file))
        .route("/files/:path/chunks", axum::routing::post(append_chunk))
        // Chunks & leases
        .route("/chunks/:id", axum::routing::get(get_chunk))
        .route("/chunks/:id/commit", axum::routing::post(commit_write))
        .route("/lease", axum::routing::post(request_lease))
        // Health & status
        .route("/health", axum::routing::get(health))
        .route("/health/live", axum::routing::get(health_live))
        .route("/health/ready", axum::routing::get(health_ready))
        .route("/admin/status", axum::routing::get(admin_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
        .with_state(state)
}
