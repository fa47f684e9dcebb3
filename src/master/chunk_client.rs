//! Outbound command client for storage nodes
//!
//! The master never moves chunk bytes itself: it instructs one node to
//! pull a chunk from another, or to drop a replica it holds. The trait
//! seam lets the replication manager run against a mock transport in
//! tests.

use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replication command (master -> storage node)
///
/// The destination pulls the chunk from `source_address` and verifies
/// the payload against `expected_checksum` before acknowledging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateCommand {
    pub chunk_id: String,
    pub version: u64,
    pub source_address: String,
    #[serde(default)]
    pub expected_checksum: Option<String>,
}

#[async_trait]
pub trait ChunkServerClient: Send + Sync {
    /// Ask the node at `dest_address` to copy a chunk from its source
    async fn replicate(&self, dest_address: &str, command: &ReplicateCommand) -> Result<()>;

    /// Ask the node at `address` to delete its replica of a chunk
    async fn delete_chunk(&self, address: &str, chunk_id: &str) -> Result<()>;
}

/// HTTP implementation used in production
pub struct HttpChunkClient {
    http: reqwest::Client,
}

impl HttpChunkClient {
    pub fn new(request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

#[async_trait]
impl ChunkServerClient for HttpChunkClient {
    async fn replicate(&self, dest_address: &str, command: &ReplicateCommand) -> Result<()> {
        let url = format!("{}/admin/replicate", dest_address.trim_end_matches('/'));
        self.http
            .post(&url)
            .json(command)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| crate::Error::Http(e.to_string()))?;
        Ok(())
    }

    async fn delete_chunk(&self, address: &str, chunk_id: &str) -> Result<()> {
        let url = format!("{}/chunks/{}", address.trim_end_matches('/'), chunk_id);
        self.http
            .delete(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| crate::Error::Http(e.to_string()))?;
        Ok(())
    }
}
