//! Master implementation
//!
//! The master is responsible for:
//! - Namespace metadata (file -> chunks -> replica placement)
//! - Placement decisions (consistent-hash ring)
//! - Failure detection (heartbeat state machine)
//! - Write coordination (chunk leases)
//! - Self-healing replication (reconciliation loop)
//! - Durability (operation log replayed on restart)

pub mod chunk_client;
pub mod heartbeat;
pub mod http;
pub mod lease;
pub mod namespace;
pub mod oplog;
pub mod replication;
pub mod ring;
pub mod server;

pub use server::Master;
