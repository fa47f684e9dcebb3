//! Common utilities and types shared across minigfs

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::{LogSyncPolicy, MasterConfig};
pub use error::{Error, Result};
pub use hash::{blake3_hash, ring_position, Blake3Hasher};
pub use utils::{
    crc32, decode_path, encode_path, format_bytes, parse_duration, timestamp_now,
    timestamp_now_millis, validate_path, NodeState,
};
