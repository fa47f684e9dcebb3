//! # minigfs
//!
//! The coordination master of a GFS-style distributed storage system:
//! - File namespace decomposed into fixed-size, replicated chunks
//! - Consistent-hash placement with virtual nodes
//! - Heartbeat-driven failure detection (alive / suspect / dead)
//! - Time-bounded chunk leases coordinating concurrent writers
//! - Self-healing replication with bounded retries
//! - Durable operation log replayed on restart
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Master                   │
//! │  namespace ── op log (durable)           │
//! │  hash ring ── heartbeat monitor          │
//! │  leases ───── replication manager        │
//! └───────────┬─────────────────────────────┘
//!             │ HTTP (heartbeats, commands)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐  ┌─────▼──────┐  ┌───▼────────┐
//! │ Chunk node │  │ Chunk node │  │ Chunk node │
//! │ (replicas) │  │ (replicas) │  │ (replicas) │
//! └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the master
//! ```bash
//! minigfs-master serve \
//!   --bind 0.0.0.0:5000 \
//!   --log ./master-data/oplog \
//!   --replicas 3
//! ```
//!
//! Storage nodes register with `POST /register`, then push heartbeats
//! with their chunk inventory; clients create files, append chunks and
//! look up replica locations; writers take chunk leases before
//! mutating data.

pub mod common;
pub mod master;

// Re-export commonly used types
pub use common::{Error, MasterConfig, Result};
pub use master::Master;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
